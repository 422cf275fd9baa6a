//! Config validation beyond what serde enforces.
//!
//! Rules:
//! - reader and component classes are non-empty
//! - at most one reader is the sync reference, and exactly one when any
//!   reader carries a sync descriptor
//! - a sync descriptor either observes its own buffer or borrows another
//!   reader's list, not both; borrowed names must exist
//! - all `when`, `filter`, and `pairing_key` expressions parse
//! - keyed pairing requires a pairing key

use contracts::expression::CompiledExpression;
use contracts::{ContractError, ExperimentBlueprint, PairingStrategy};
use validator::Validate;

pub fn validate(blueprint: &ExperimentBlueprint) -> Result<(), ContractError> {
    blueprint
        .validate()
        .map_err(|e| ContractError::config_validation("blueprint", e.to_string()))?;
    validate_classes(blueprint)?;
    validate_sync(blueprint)?;
    validate_expressions(blueprint)?;
    Ok(())
}

fn validate_classes(blueprint: &ExperimentBlueprint) -> Result<(), ContractError> {
    for (name, reader) in &blueprint.readers {
        if reader.class.is_empty() {
            return Err(ContractError::config_validation(
                format!("readers[{name}].class"),
                "reader class cannot be empty",
            ));
        }
        for (buffer_name, extra) in &reader.extra_buffers {
            for transformer in &extra.transformers {
                if transformer.class.is_empty() {
                    return Err(ContractError::config_validation(
                        format!("readers[{name}].extra_buffers[{buffer_name}]"),
                        "transformer class cannot be empty",
                    ));
                }
            }
        }
    }
    for enhancer in blueprint.trials.enhancers.iter().chain(&blueprint.trials.collecters) {
        if enhancer.class.is_empty() {
            return Err(ContractError::config_validation(
                "trials.enhancers",
                "enhancer class cannot be empty",
            ));
        }
    }
    Ok(())
}

fn validate_sync(blueprint: &ExperimentBlueprint) -> Result<(), ContractError> {
    let mut reference_count = 0usize;
    let mut any_sync = false;
    for (name, reader) in &blueprint.readers {
        let Some(sync) = &reader.sync else {
            continue;
        };
        any_sync = true;
        if sync.is_reference {
            reference_count += 1;
        }
        if sync.reader_name.is_some() && sync.observes() {
            return Err(ContractError::config_validation(
                format!("readers[{name}].sync"),
                "use either buffer_name or reader_name, not both",
            ));
        }
        if let Some(borrowed) = &sync.reader_name {
            if !blueprint.readers.contains_key(borrowed) {
                return Err(ContractError::config_validation(
                    format!("readers[{name}].sync.reader_name"),
                    format!("unknown reader '{borrowed}'"),
                ));
            }
        }
        if sync.pairing_strategy == PairingStrategy::Keyed && sync.pairing_key.is_none() {
            return Err(ContractError::config_validation(
                format!("readers[{name}].sync"),
                "keyed pairing requires a pairing_key expression",
            ));
        }
    }
    if any_sync && reference_count != 1 {
        return Err(ContractError::config_validation(
            "readers.*.sync.is_reference",
            format!("exactly one reader must be the sync reference, found {reference_count}"),
        ));
    }
    Ok(())
}

fn validate_expressions(blueprint: &ExperimentBlueprint) -> Result<(), ContractError> {
    for (name, reader) in &blueprint.readers {
        if let Some(sync) = &reader.sync {
            for expression in [&sync.filter, &sync.pairing_key].into_iter().flatten() {
                CompiledExpression::parse(expression).map_err(|e| {
                    ContractError::config_validation(format!("readers[{name}].sync"), e.to_string())
                })?;
            }
        }
    }
    for enhancer in blueprint.trials.enhancers.iter().chain(&blueprint.trials.collecters) {
        if let Some(when) = &enhancer.when {
            CompiledExpression::parse(when).map_err(|e| {
                ContractError::config_validation(
                    format!("trials enhancer '{}' when", enhancer.class),
                    e.to_string(),
                )
            })?;
        }
    }
    Ok(())
}
