//! # Config Loader
//!
//! Loads and validates experiment documents (TOML primary, JSON optional),
//! applies command-line reader overrides, and loads the optional subject
//! document.
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("experiment.toml")).unwrap();
//! println!("readers: {}", blueprint.readers.len());
//! ```

mod parser;
mod validator;

pub use parser::ConfigFormat;

use std::path::Path;

use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::info;

use contracts::{ContractError, ExperimentBlueprint};

/// Static entry points for loading config documents.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load an experiment document, detecting the format from the file
    /// extension (`.toml` / `.json`).
    pub fn load_from_path(path: &Path) -> Result<ExperimentBlueprint, ContractError> {
        let format = Self::detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load an experiment document from a string.
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<ExperimentBlueprint, ContractError> {
        let blueprint = parser::parse(content, format)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }

    /// Load the optional subject document: an arbitrary mapping merged into
    /// the experiment metadata handed to enhancers and the sink header.
    pub fn load_subject(path: &Path) -> Result<JsonMap<String, JsonValue>, ContractError> {
        let format = Self::detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        let value: JsonValue = match format {
            ConfigFormat::Toml => {
                let value: toml::Value = toml::from_str(&content)
                    .map_err(|e| ContractError::config_parse(format!("TOML parse error: {e}")))?;
                serde_json::to_value(value)
                    .map_err(|e| ContractError::config_parse(e.to_string()))?
            }
            ConfigFormat::Json => serde_json::from_str(&content)
                .map_err(|e| ContractError::config_parse(format!("JSON parse error: {e}")))?,
        };
        match value {
            JsonValue::Object(map) => Ok(map),
            _ => Err(ContractError::config_parse("subject document must be a mapping")),
        }
    }

    /// Apply `--readers reader_name.arg_name=value` overrides in place.
    ///
    /// Values parse as JSON where possible (numbers, booleans) and fall back
    /// to plain strings, so `--readers r.csv_file=real.csv` works unquoted.
    pub fn apply_reader_overrides(
        blueprint: &mut ExperimentBlueprint,
        overrides: &[String],
    ) -> Result<(), ContractError> {
        for entry in overrides {
            let (reader_name, assignment) = entry.split_once('.').ok_or_else(|| {
                ContractError::config_validation(
                    "--readers",
                    format!("expected reader_name.arg_name=value, got '{entry}'"),
                )
            })?;
            let (arg_name, raw_value) = assignment.split_once('=').ok_or_else(|| {
                ContractError::config_validation(
                    "--readers",
                    format!("expected reader_name.arg_name=value, got '{entry}'"),
                )
            })?;
            let reader = blueprint.readers.get_mut(reader_name).ok_or_else(|| {
                ContractError::config_validation(
                    "--readers",
                    format!("unknown reader '{reader_name}'"),
                )
            })?;
            let value = serde_json::from_str(raw_value)
                .unwrap_or_else(|_| JsonValue::String(raw_value.to_string()));
            if !reader.args.is_object() {
                reader.args = JsonValue::Object(JsonMap::new());
            }
            reader
                .args
                .as_object_mut()
                .expect("args coerced to object above")
                .insert(arg_name.to_string(), value);
            info!(reader = reader_name, arg = arg_name, "applied reader override");
        }
        Ok(())
    }

    /// Serialize a blueprint back to pretty TOML.
    pub fn to_toml(blueprint: &ExperimentBlueprint) -> Result<String, ContractError> {
        toml::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine config format from extension")
        })?;
        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }
}
