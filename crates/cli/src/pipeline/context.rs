//! Pipeline context: everything a run needs, built from a blueprint.

use std::collections::BTreeMap;

use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use tracing::info;

use contracts::expression::CompiledExpression;
use contracts::{ContractError, ExperimentBlueprint, FileFinder};
use ingestion::{DelaySimulatorReader, ReaderRegistry, ReaderRoute, ReaderRouter, TransformerRegistry};
use neutral_zone::{Buffer, NeutralZone, Transformer};
use trial_engine::{
    CollecterRegistry, ConfiguredCollecter, ConfiguredEnhancer, EnhancerRegistry, SyncRegistry,
    TrialDelimiter, TrialExtractor,
};

/// Route description kept for the `graph` command.
pub struct RouteLabel {
    pub reader_name: String,
    pub reader_result_name: String,
    pub buffer_name: String,
    pub transformer_classes: Vec<String>,
}

/// Everything needed to run one session.
pub struct PipelineContext {
    pub experiment: JsonMap<String, JsonValue>,
    pub subject: JsonMap<String, JsonValue>,
    pub zone: NeutralZone,
    pub routers: Vec<ReaderRouter>,
    pub start_router_index: usize,
    pub delimiter: TrialDelimiter,
    pub extractor: TrialExtractor,
    pub sync_registry: SyncRegistry,
    pub route_labels: Vec<RouteLabel>,
    pub finder: FileFinder,
}

impl PipelineContext {
    /// Instantiate readers, buffers, routers, the delimiter, and the
    /// extractor from a validated blueprint. Any failure here is a config
    /// error surfaced before the run starts.
    pub fn from_blueprint(
        blueprint: &ExperimentBlueprint,
        subject: JsonMap<String, JsonValue>,
        finder: FileFinder,
        allow_simulate_delay: bool,
    ) -> Result<Self, ContractError> {
        let reader_registry = ReaderRegistry::with_defaults();
        let transformer_registry = TransformerRegistry::with_defaults();
        let enhancer_registry = EnhancerRegistry::with_defaults();
        let collecter_registry = CollecterRegistry::with_defaults();

        let mut zone = NeutralZone::new();
        let mut routers = Vec::new();
        let mut sync_registry = SyncRegistry::new(None);
        let mut route_labels = Vec::new();

        info!(readers = blueprint.readers.len(), "configuring readers");
        for (reader_name, reader_config) in &blueprint.readers {
            info!(reader = %reader_name, class = %reader_config.class, "configuring reader");
            let mut reader =
                reader_registry.create(&reader_config.class, &reader_config.args, &finder)?;
            if allow_simulate_delay && reader_config.simulate_delay {
                reader = Box::new(DelaySimulatorReader::new(reader));
            }
            let initial = reader.initial();

            // Default pass-through routes, one per reader result.
            let mut named_routes: BTreeMap<String, (String, Vec<Box<dyn Transformer>>)> = initial
                .keys()
                .map(|result_name| (result_name.clone(), (result_name.clone(), Vec::new())))
                .collect();

            // Explicitly configured derived buffers with transformer chains.
            for (buffer_name, extra) in &reader_config.extra_buffers {
                let result_name =
                    extra.reader_result_name.clone().unwrap_or_else(|| buffer_name.clone());
                let mut transformers = Vec::new();
                for transformer_config in &extra.transformers {
                    transformers.push(transformer_registry
                        .create(&transformer_config.class, &transformer_config.args)?);
                }
                named_routes.insert(buffer_name.clone(), (result_name, transformers));
            }

            // One buffer per route, typed by the transformed prototype.
            let mut routes = Vec::new();
            for (buffer_name, (result_name, mut transformers)) in named_routes {
                let prototype = initial.get(&result_name).ok_or_else(|| {
                    ContractError::config_validation(
                        format!("readers[{reader_name}].extra_buffers[{buffer_name}]"),
                        format!("reader has no result named '{result_name}'"),
                    )
                })?;
                let transformed_prototype = transformers
                    .iter_mut()
                    .try_fold(prototype.clone(), |piece, t| t.transform(piece))?;
                zone.insert(buffer_name.clone(), Buffer::from_prototype(&transformed_prototype))?;
                route_labels.push(RouteLabel {
                    reader_name: reader_name.clone(),
                    reader_result_name: result_name.clone(),
                    buffer_name: buffer_name.clone(),
                    transformer_classes: Vec::new(),
                });
                routes.push(ReaderRoute {
                    reader_result_name: result_name,
                    buffer_name,
                    transformers,
                });
            }
            // Fill in transformer labels now that routes are final.
            for (buffer_name, extra) in &reader_config.extra_buffers {
                if let Some(label) = route_labels
                    .iter_mut()
                    .find(|l| l.reader_name == *reader_name && l.buffer_name == *buffer_name)
                {
                    label.transformer_classes =
                        extra.transformers.iter().map(|t| t.class.clone()).collect();
                }
            }

            if let Some(sync) = &reader_config.sync {
                let sync_name = reader_config
                    .sync_reader_name(reader_name)
                    .expect("sync config implies a sync name");
                if sync.is_reference {
                    sync_registry.set_reference_reader(sync_name);
                }
                sync_registry.set_strategy(sync_name, sync.pairing_strategy);
            }

            routers.push(ReaderRouter::new(
                reader_name.clone(),
                reader,
                routes,
                reader_config.empty_reads_allowed,
                reader_config.sync.as_ref(),
            )?);
        }

        info!(buffers = zone.len(), "neutral zone configured");
        for name in zone.names() {
            info!(buffer = name, "  buffer");
        }

        // Trials section: delimiter, extractor, enhancers, collecters.
        let trials = &blueprint.trials;
        if !zone.contains(&trials.start_buffer) {
            return Err(ContractError::config_validation(
                "trials.start_buffer",
                format!("no buffer named '{}'", trials.start_buffer),
            ));
        }
        if !zone.contains(&trials.wrt_buffer) {
            return Err(ContractError::config_validation(
                "trials.wrt_buffer",
                format!("no buffer named '{}'", trials.wrt_buffer),
            ));
        }
        let delimiter = TrialDelimiter::new(
            trials.start_buffer.clone(),
            trials.start_value.clone(),
            trials.start_value_index,
            trials.trial_start_time,
        );

        let other_buffers: Vec<String> = zone
            .names()
            .filter(|name| *name != trials.start_buffer && *name != trials.wrt_buffer)
            .map(str::to_string)
            .collect();

        let mut enhancers = Vec::new();
        for config in &trials.enhancers {
            enhancers.push(ConfiguredEnhancer {
                name: config.class.clone(),
                enhancer: enhancer_registry.create(&config.class, &config.args, &finder)?,
                when: config.when.as_deref().map(CompiledExpression::parse).transpose()?,
            });
        }
        let mut collecters = Vec::new();
        for config in &trials.collecters {
            collecters.push(ConfiguredCollecter {
                name: config.class.clone(),
                collecter: collecter_registry.create(&config.class, &config.args, &finder)?,
                when: config.when.as_deref().map(CompiledExpression::parse).transpose()?,
            });
        }
        info!(
            enhancers = enhancers.len(),
            collecters = collecters.len(),
            "trial pipeline configured"
        );

        let extractor = TrialExtractor::new(
            trials.wrt_buffer.clone(),
            trials.wrt_value.clone(),
            trials.wrt_value_index,
            other_buffers,
            enhancers,
            collecters,
        );

        let start_router_index = routers
            .iter()
            .position(|router| router.buffer_names().iter().any(|b| *b == trials.start_buffer))
            .ok_or_else(|| {
                ContractError::config_validation(
                    "trials.start_buffer",
                    "no reader routes into the start buffer",
                )
            })?;

        Ok(Self {
            experiment: blueprint.experiment.clone(),
            subject,
            zone,
            routers,
            start_router_index,
            delimiter,
            extractor,
            sync_registry,
            route_labels,
            finder,
        })
    }

    /// Describe the configured pipeline as a Graphviz digraph.
    ///
    /// Rendering to an image is left to the graphviz tools; the DOT text is
    /// the durable artifact.
    pub fn to_dot(&self, graph_name: &str) -> String {
        let mut dot = String::new();
        dot.push_str(&format!("digraph \"{graph_name}\" {{\n"));
        dot.push_str("  rankdir=LR;\n  node [shape=record, penwidth=2.0];\n\n");

        for router in &self.routers {
            dot.push_str(&format!(
                "  \"reader_{0}\" [label=\"{0}\"];\n",
                router.name()
            ));
        }
        for name in self.zone.names() {
            let kind = self.zone.get(name).map(|b| b.kind().to_string()).unwrap_or_default();
            dot.push_str(&format!("  \"buffer_{name}\" [label=\"{name}|{kind}\"];\n"));
        }
        for (index, label) in self.route_labels.iter().enumerate() {
            let route_node = format!("route_{index}");
            let route_label = if label.transformer_classes.is_empty() {
                "as is".to_string()
            } else {
                label.transformer_classes.join("|")
            };
            dot.push_str(&format!("  \"{route_node}\" [label=\"{route_label}\"];\n"));
            dot.push_str(&format!(
                "  \"reader_{}\" -> \"{route_node}\" [label=\"{}\"];\n",
                label.reader_name, label.reader_result_name
            ));
            dot.push_str(&format!("  \"{route_node}\" -> \"buffer_{}\";\n", label.buffer_name));
        }
        dot.push_str(&format!(
            "  \"trial_delimiter\" [label=\"TrialDelimiter|start\"];\n  \"buffer_{}\" -> \"trial_delimiter\" [label=\"start\", arrowhead=none];\n",
            self.delimiter.start_buffer()
        ));
        dot.push_str(&format!(
            "  \"trial_extractor\" [label=\"TrialExtractor|wrt\"];\n  \"buffer_{}\" -> \"trial_extractor\" [label=\"wrt\", arrowhead=none];\n",
            self.extractor.wrt_buffer()
        ));
        dot.push_str("}\n");
        dot
    }
}
