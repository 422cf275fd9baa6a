//! Static registries for enhancers and collecters.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use contracts::{ContractError, FileFinder};

use crate::{
    Collecter, Enhancer, EventTimesEnhancer, ExpressionEnhancer, PairedCodesEnhancer,
    SessionPercentageCollecter, SignalNormalizer, SignalSmoother, TrialDurationEnhancer,
};

fn class_name(class: &str) -> &str {
    class.rsplit('.').next().unwrap_or(class)
}

type EnhancerFactory =
    Box<dyn Fn(&JsonValue, &FileFinder) -> Result<Box<dyn Enhancer>, ContractError> + Send + Sync>;

/// Name-to-factory table for per-trial enhancers.
pub struct EnhancerRegistry {
    factories: BTreeMap<String, EnhancerFactory>,
}

impl EnhancerRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self { factories: BTreeMap::new() };
        registry.register("TrialDurationEnhancer", |args, _| {
            Ok(Box::new(TrialDurationEnhancer::from_args(args)?))
        });
        registry.register("ExpressionEnhancer", |args, _| {
            Ok(Box::new(ExpressionEnhancer::from_args(args)?))
        });
        registry.register("SignalSmoother", |args, _| {
            Ok(Box::new(SignalSmoother::from_args(args)?))
        });
        registry.register("PairedCodesEnhancer", |args, finder| {
            Ok(Box::new(PairedCodesEnhancer::from_args(args, finder)?))
        });
        registry.register("EventTimesEnhancer", |args, finder| {
            Ok(Box::new(EventTimesEnhancer::from_args(args, finder)?))
        });
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&JsonValue, &FileFinder) -> Result<Box<dyn Enhancer>, ContractError>
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
    ) -> Result<Box<dyn Enhancer>, ContractError> {
        match self.factories.get(class_name(class)) {
            Some(factory) => factory(args, finder),
            None => Err(ContractError::unknown_component("enhancer", class)),
        }
    }
}

type CollecterFactory =
    Box<dyn Fn(&JsonValue, &FileFinder) -> Result<Box<dyn Collecter>, ContractError> + Send + Sync>;

/// Name-to-factory table for end-of-run collecters.
pub struct CollecterRegistry {
    factories: BTreeMap<String, CollecterFactory>,
}

impl CollecterRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self { factories: BTreeMap::new() };
        registry.register("SessionPercentageCollecter", |args, _| {
            Ok(Box::new(SessionPercentageCollecter::from_args(args)?))
        });
        registry.register("SignalNormalizer", |args, _| {
            Ok(Box::new(SignalNormalizer::from_args(args)?))
        });
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&JsonValue, &FileFinder) -> Result<Box<dyn Collecter>, ContractError>
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
    ) -> Result<Box<dyn Collecter>, ContractError> {
        match self.factories.get(class_name(class)) {
            Some(factory) => factory(args, finder),
            None => Err(ContractError::unknown_component("collecter", class)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_enhancers_resolve_by_name_or_dotted_path() {
        let registry = EnhancerRegistry::with_defaults();
        assert!(registry
            .create("TrialDurationEnhancer", &JsonValue::Null, &FileFinder::default())
            .is_ok());
        assert!(registry
            .create(
                "trials.standard.ExpressionEnhancer",
                &json!({"expression": "1 + 1", "value_name": "two"}),
                &FileFinder::default()
            )
            .is_ok());
    }

    #[test]
    fn unknown_collecter_is_a_config_error() {
        let registry = CollecterRegistry::with_defaults();
        match registry.create("NoSuchCollecter", &JsonValue::Null, &FileFinder::default()) {
            Err(err) => assert!(matches!(err, ContractError::UnknownComponent { .. })),
            Ok(_) => panic!("expected an error"),
        }
    }
}
