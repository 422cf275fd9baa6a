//! Trial Syncer library surface: CLI definitions, pipeline assembly, and
//! command implementations, shared by the binary and the end-to-end tests.

pub mod cli;
pub mod commands;
pub mod pipeline;
pub mod plotters;
