//! Pipeline orchestrator - the top-level loop coordinating readers and the
//! trial extractor until sources exhaust.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use contracts::{ContractError, Plotter, Trial};
use observability::record_trial_metrics;
use trial_file::{RetryingTrialWriter, TrialFileSink};

use super::{PipelineContext, PipelineStats};

/// Consecutive all-empty polling sweeps tolerated while draining readers
/// for the final trial.
const FINAL_DRAIN_EMPTY_SWEEPS: usize = 3;

/// One running pipeline: context plus run-mode options.
pub struct Pipeline {
    context: PipelineContext,
    plotters: Vec<Box<dyn Plotter>>,
    gui_mode: bool,
    plot_update_period: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(context: PipelineContext, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            context,
            plotters: Vec::new(),
            gui_mode: false,
            plot_update_period: Duration::from_millis(25),
            shutdown,
        }
    }

    /// Enable gui mode: plotter callbacks and wall-clock paced updates.
    pub fn with_plotters(
        mut self,
        plotters: Vec<Box<dyn Plotter>>,
        plot_update_period: Duration,
    ) -> Self {
        self.plotters = plotters;
        self.gui_mode = true;
        self.plot_update_period = plot_update_period;
        self
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Offset applied to start-buffer times to reach the reference clock.
    fn start_offset(&self) -> f64 {
        let router = &self.context.routers[self.context.start_router_index];
        let Some(sync_name) = router.sync_reader_name() else {
            return 0.0;
        };
        let hint = self
            .context
            .zone
            .end_time(self.context.delimiter.start_buffer())
            .unwrap_or(0.0);
        self.context.sync_registry.offset_at(sync_name, hint).unwrap_or(0.0)
    }

    /// Per-buffer clock offsets at a given reference time.
    fn resolve_offsets(&self, t_reference: f64) -> BTreeMap<String, f64> {
        let mut offsets = BTreeMap::new();
        for router in &self.context.routers {
            let offset = match router.sync_reader_name() {
                Some(sync_name) => self
                    .context
                    .sync_registry
                    .offset_at(sync_name, t_reference)
                    .unwrap_or(0.0),
                None => 0.0,
            };
            for buffer_name in router.buffer_names() {
                offsets.insert(buffer_name.clone(), offset);
            }
        }
        offsets
    }

    /// Extract, enhance, emit, and garbage-collect one delimited window.
    async fn handle_window(
        &mut self,
        trial_number: usize,
        mut trial: Trial,
        writer: &mut RetryingTrialWriter,
        retained: &mut Vec<(usize, Trial)>,
        stats: &mut PipelineStats,
    ) -> Result<(), ContractError> {
        // Let every reader catch up to the window end before snapshotting,
        // so late-arriving in-window data is not missed. After a shutdown
        // request readers are not polled again; the window flushes with
        // whatever is buffered.
        if let Some(end) = trial.end_time.filter(|_| !self.shutting_down()) {
            let ctx = &mut self.context;
            for router in ctx.routers.iter_mut() {
                let offset = match router.sync_reader_name() {
                    Some(sync_name) => ctx.sync_registry.offset_at(sync_name, end),
                    None => Some(0.0),
                };
                router.route_until(
                    end,
                    trial.start_time,
                    offset,
                    &mut ctx.zone,
                    &mut ctx.sync_registry,
                );
            }
        }

        let offsets = self.resolve_offsets(trial.start_time);
        self.context.extractor.populate_trial(
            &mut trial,
            trial_number,
            &self.context.zone,
            &offsets,
            &self.context.experiment,
            &self.context.subject,
        );

        writer.append(trial_number, &trial).await?;
        record_trial_metrics(&trial, trial_number);
        stats.trials_emitted += 1;

        for plotter in &mut self.plotters {
            if let Err(e) = plotter.plot_next(&trial, trial_number) {
                warn!(plotter = plotter.name(), error = %e, "plotter failed on trial");
            }
        }

        // Earlier data is unreachable by any future trial; let buffers
        // release it.
        let start_buffer_offset = offsets
            .get(self.context.delimiter.start_buffer())
            .copied()
            .unwrap_or(0.0);
        self.context.delimiter.discard_before(
            &mut self.context.zone,
            trial.start_time,
            start_buffer_offset,
        );
        self.context
            .extractor
            .discard_before(&mut self.context.zone, trial.start_time, &offsets);

        if self.context.extractor.has_collecters() {
            retained.push((trial_number, trial));
        }
        Ok(())
    }

    /// Run to completion and return the per-run counts.
    pub async fn run(mut self, trial_file: &Path) -> Result<PipelineStats, ContractError> {
        let started = Instant::now();
        let mut stats = PipelineStats {
            readers_total: self.context.routers.len(),
            ..Default::default()
        };

        let sink = TrialFileSink::for_path(trial_file)?;
        let mut writer = RetryingTrialWriter::new(sink, trial_file);

        for router in self.context.routers.iter_mut() {
            router.open()?;
        }
        for plotter in &mut self.plotters {
            plotter.open(&self.context.experiment, &self.context.subject)?;
        }
        info!(
            readers = self.context.routers.len(),
            buffers = self.context.zone.len(),
            gui_mode = self.gui_mode,
            "pipeline running"
        );

        let mut retained: Vec<(usize, Trial)> = Vec::new();
        let mut next_plot_update = Instant::now();

        // Main loop: poll every reader one increment, flush any windows the
        // delimiter produced, repeat until the start reader is done.
        loop {
            if self.shutting_down() {
                warn!("shutdown requested, stopping reader polling");
                break;
            }
            if self.context.routers[self.context.start_router_index].exhausted() {
                break;
            }

            let ctx = &mut self.context;
            let mut any_data = false;
            for router in ctx.routers.iter_mut() {
                if router.route_next(&mut ctx.zone, &mut ctx.sync_registry) {
                    any_data = true;
                }
            }

            let windows = {
                let offset = self.start_offset();
                self.context.delimiter.next(&self.context.zone, offset)
            };
            for (trial_number, trial) in windows {
                self.handle_window(trial_number, trial, &mut writer, &mut retained, &mut stats)
                    .await?;
            }

            if self.gui_mode && Instant::now() >= next_plot_update {
                next_plot_update = Instant::now() + self.plot_update_period;
                for plotter in &mut self.plotters {
                    match plotter.update() {
                        Ok(true) => {}
                        Ok(false) => {
                            info!(plotter = plotter.name(), "plotter requested shutdown");
                            self.shutdown.store(true, Ordering::Relaxed);
                        }
                        Err(e) => warn!(plotter = plotter.name(), error = %e, "plotter update failed"),
                    }
                }
            }

            if !any_data {
                // Nothing arrived this cycle; yield so live sources and the
                // shutdown signal can make progress.
                tokio::time::sleep(Duration::from_millis(1)).await;
            } else {
                tokio::task::yield_now().await;
            }
        }

        // On shutdown, windows the delimiter already closed (their end
        // times are known) still flush; only the in-progress open-ended
        // window is dropped.
        if self.shutting_down() {
            let offset = self.start_offset();
            let windows = self.context.delimiter.next(&self.context.zone, offset);
            for (trial_number, trial) in windows {
                self.handle_window(trial_number, trial, &mut writer, &mut retained, &mut stats)
                    .await?;
            }
        }

        // Final trial: wait for every reader to exhaust, then close the
        // open-ended window. A shutdown drops the in-progress window
        // instead, because its end time is unknown.
        if !self.shutting_down() {
            let mut empty_sweeps = 0;
            while empty_sweeps < FINAL_DRAIN_EMPTY_SWEEPS
                && self.context.routers.iter().any(|r| !r.exhausted())
                && !self.shutting_down()
            {
                let ctx = &mut self.context;
                let mut any_data = false;
                for router in ctx.routers.iter_mut() {
                    if router.route_next(&mut ctx.zone, &mut ctx.sync_registry) {
                        any_data = true;
                    }
                }
                if any_data {
                    empty_sweeps = 0;
                } else {
                    empty_sweeps += 1;
                }
                tokio::task::yield_now().await;
            }

            let offset = self.start_offset();
            let windows = self.context.delimiter.next(&self.context.zone, offset);
            for (trial_number, trial) in windows {
                self.handle_window(trial_number, trial, &mut writer, &mut retained, &mut stats)
                    .await?;
            }
            let (trial_number, trial) = self.context.delimiter.last(offset);
            self.handle_window(trial_number, trial, &mut writer, &mut retained, &mut stats)
                .await?;
        }

        // Deferred global augments: collect across all trials, then revise
        // each trial and hand the sink a rewrite.
        if self.context.extractor.has_collecters() && !retained.is_empty() {
            info!(trials = retained.len(), "running collecters");
            self.context.extractor.collect_trials(
                &retained,
                &self.context.experiment,
                &self.context.subject,
            );
            for (trial_number, trial) in retained.iter_mut() {
                let revised = self.context.extractor.revise_trial(
                    trial,
                    *trial_number,
                    &self.context.experiment,
                    &self.context.subject,
                );
                if revised {
                    writer.rewrite(*trial_number, trial).await?;
                    stats.trials_rewritten += 1;
                }
            }
        }

        let sink_result = writer.finish().await;
        for plotter in &mut self.plotters {
            plotter.close();
        }

        for router in self.context.routers.iter_mut() {
            if router.exhausted() {
                stats.readers_exhausted += 1;
                observability::record_reader_exhausted(router.name());
            }
            stats.out_of_order_dropped += router.counts.out_of_order_dropped;
            stats.transformer_failures += router.counts.transformer_failures;
            stats.read_failures += router.counts.read_failures;
            router.close();
        }
        stats.enhancer_failures = self.context.extractor.enhancer_failures();
        stats.sink_retries = writer.retries;
        stats.duration = started.elapsed();

        info!(
            trials = stats.trials_emitted,
            duration_secs = stats.duration.as_secs_f64(),
            "pipeline finished"
        );

        sink_result?;
        Ok(stats)
    }
}
