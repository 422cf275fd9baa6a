//! Error taxonomy, layered by source: config / source / buffer / enhancer / sink.

use thiserror::Error;

/// Unified error type shared across crates.
#[derive(Debug, Error)]
pub enum ContractError {
    /// Config document could not be parsed
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Config document parsed but is invalid
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    /// Config named a component the registry does not know
    #[error("unknown {kind} '{name}'")]
    UnknownComponent { kind: &'static str, name: String },

    /// Expression mini-language parse error (config load time)
    #[error("expression error in '{expression}': {message}")]
    Expression { expression: String, message: String },

    /// Data source failed permanently
    #[error("source error for reader '{reader}': {message}")]
    Source { reader: String, message: String },

    /// Incoming data violated buffer ordering or typing
    #[error("buffer '{buffer}' rejected data: {message}")]
    BufferRejected { buffer: String, message: String },

    /// Enhancer or collecter failed on one trial
    #[error("enhancer '{name}' failed on trial {trial_number}: {message}")]
    Enhancer { name: String, trial_number: usize, message: String },

    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    /// Sink could not be created
    #[error("failed to create sink for '{path}': {message}")]
    SinkCreation { path: String, message: String },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse { message: message.into(), source: None }
    }

    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation { field: field.into(), message: message.into() }
    }

    pub fn unknown_component(kind: &'static str, name: impl Into<String>) -> Self {
        Self::UnknownComponent { kind, name: name.into() }
    }

    pub fn expression(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Expression { expression: expression.into(), message: message.into() }
    }

    pub fn source(reader: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source { reader: reader.into(), message: message.into() }
    }

    pub fn buffer_rejected(buffer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BufferRejected { buffer: buffer.into(), message: message.into() }
    }

    pub fn enhancer(
        name: impl Into<String>,
        trial_number: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::Enhancer { name: name.into(), trial_number, message: message.into() }
    }

    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite { sink_name: sink_name.into(), message: message.into() }
    }

    pub fn sink_creation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation { path: path.into(), message: message.into() }
    }

    /// Whether this error should abort the run (config and sink errors do,
    /// everything else is logged and counted).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ContractError::ConfigParse { .. }
                | ContractError::ConfigValidation { .. }
                | ContractError::UnknownComponent { .. }
                | ContractError::Expression { .. }
                | ContractError::SinkCreation { .. }
        )
    }
}
