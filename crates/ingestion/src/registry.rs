//! Static component registries: config class names to factories.
//!
//! Config documents name components by class, optionally as a dotted path
//! whose final segment is the class name. Resolution is a lookup in a table
//! built at startup; custom extensions register their own factories before
//! the pipeline is built. Unknown names are config errors.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use contracts::{ContractError, FileFinder, Reader};
use neutral_zone::{FilterRange, OffsetThenGain, SparseSignal, Transformer};

use crate::{CsvNumericEventReader, CsvSignalReader, CsvTextEventReader};

/// The class name proper: the final segment of a dotted path.
pub(crate) fn class_name(class: &str) -> &str {
    class.rsplit('.').next().unwrap_or(class)
}

type ReaderFactory =
    Box<dyn Fn(&JsonValue, &FileFinder) -> Result<Box<dyn Reader>, ContractError> + Send + Sync>;

/// Name-to-factory table for readers.
pub struct ReaderRegistry {
    factories: BTreeMap<String, ReaderFactory>,
}

impl ReaderRegistry {
    /// Registry with the built-in file readers.
    pub fn with_defaults() -> Self {
        let mut registry = Self { factories: BTreeMap::new() };
        registry.register("CsvNumericEventReader", |args, finder| {
            Ok(Box::new(CsvNumericEventReader::from_args(args, finder)?))
        });
        registry.register("CsvTextEventReader", |args, finder| {
            Ok(Box::new(CsvTextEventReader::from_args(args, finder)?))
        });
        registry.register("CsvSignalReader", |args, finder| {
            Ok(Box::new(CsvSignalReader::from_args(args, finder)?))
        });
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&JsonValue, &FileFinder) -> Result<Box<dyn Reader>, ContractError>
            + Send
            + Sync
            + 'static,
    ) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn create(
        &self,
        class: &str,
        args: &JsonValue,
        finder: &FileFinder,
    ) -> Result<Box<dyn Reader>, ContractError> {
        match self.factories.get(class_name(class)) {
            Some(factory) => factory(args, finder),
            None => Err(ContractError::unknown_component("reader", class)),
        }
    }
}

type TransformerFactory =
    Box<dyn Fn(&JsonValue) -> Result<Box<dyn Transformer>, ContractError> + Send + Sync>;

/// Name-to-factory table for transformers.
pub struct TransformerRegistry {
    factories: BTreeMap<String, TransformerFactory>,
}

impl TransformerRegistry {
    /// Registry with the standard transformers.
    pub fn with_defaults() -> Self {
        let mut registry = Self { factories: BTreeMap::new() };
        registry.register("OffsetThenGain", |args| {
            Ok(Box::new(OffsetThenGain::from_args(args)?))
        });
        registry.register("FilterRange", |args| Ok(Box::new(FilterRange::from_args(args)?)));
        registry.register("SparseSignal", |args| Ok(Box::new(SparseSignal::from_args(args)?)));
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&JsonValue) -> Result<Box<dyn Transformer>, ContractError>
            + Send
            + Sync
            + 'static,
    ) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn create(&self, class: &str, args: &JsonValue) -> Result<Box<dyn Transformer>, ContractError> {
        match self.factories.get(class_name(class)) {
            Some(factory) => factory(args),
            None => Err(ContractError::unknown_component("transformer", class)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_paths_resolve_by_final_segment() {
        let registry = TransformerRegistry::with_defaults();
        assert!(registry
            .create("neutral_zone.transformers.OffsetThenGain", &json!({"gain": 2.0}))
            .is_ok());
    }

    #[test]
    fn unknown_class_is_a_config_error() {
        let registry = ReaderRegistry::with_defaults();
        match registry.create("NoSuchReader", &JsonValue::Null, &FileFinder::default()) {
            Err(err) => assert!(matches!(err, ContractError::UnknownComponent { .. })),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn custom_factories_can_be_registered() {
        struct NullReader;
        impl Reader for NullReader {
            fn read_next(&mut self) -> Result<contracts::ReadOutcome, contracts::ReadError> {
                Err(contracts::ReadError::EndOfStream)
            }
            fn initial(&self) -> contracts::ReaderBatch {
                contracts::ReaderBatch::new()
            }
        }
        let mut registry = ReaderRegistry::with_defaults();
        registry.register("NullReader", |_, _| Ok(Box::new(NullReader)));
        assert!(registry
            .create("NullReader", &JsonValue::Null, &FileFinder::default())
            .is_ok());
    }
}
