//! Pipeline run statistics.

use std::time::Duration;

/// Per-run counts surfaced at the end of every run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Trials written to the sink
    pub trials_emitted: u64,

    /// Trials revised by collecters after the run
    pub trials_rewritten: u64,

    /// Readers configured
    pub readers_total: usize,

    /// Readers that ended or failed permanently
    pub readers_exhausted: usize,

    /// Data increments dropped for violating buffer ordering
    pub out_of_order_dropped: u64,

    /// Route increments dropped by failing transformers
    pub transformer_failures: u64,

    /// Readers disabled by read failures
    pub read_failures: u64,

    /// Enhancer and collecter errors (trials kept, partially enhanced)
    pub enhancer_failures: u64,

    /// Sink write retries
    pub sink_retries: u64,

    /// Wall-clock duration of the run
    pub duration: Duration,
}

impl PipelineStats {
    /// Trials per wall-clock second.
    pub fn trials_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.trials_emitted as f64 / secs
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        println!("\n=== Run Summary ===");
        println!("  duration:             {:.2}s", self.duration.as_secs_f64());
        println!("  trials emitted:       {}", self.trials_emitted);
        if self.trials_rewritten > 0 {
            println!("  trials rewritten:     {}", self.trials_rewritten);
        }
        println!("  trials/sec:           {:.2}", self.trials_per_second());
        println!(
            "  readers exhausted:    {}/{}",
            self.readers_exhausted, self.readers_total
        );
        if self.out_of_order_dropped > 0 {
            println!("  out-of-order dropped: {}", self.out_of_order_dropped);
        }
        if self.transformer_failures > 0 {
            println!("  transformer failures: {}", self.transformer_failures);
        }
        if self.read_failures > 0 {
            println!("  read failures:        {}", self.read_failures);
        }
        if self.enhancer_failures > 0 {
            println!("  enhancer failures:    {}", self.enhancer_failures);
        }
        if self.sink_retries > 0 {
            println!("  sink retries:         {}", self.sink_retries);
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trials_per_second_handles_zero_duration() {
        let stats = PipelineStats::default();
        assert_eq!(stats.trials_per_second(), 0.0);
        let stats = PipelineStats {
            trials_emitted: 10,
            duration: Duration::from_secs(2),
            ..Default::default()
        };
        assert_eq!(stats.trials_per_second(), 5.0);
    }
}
