//! The shared set of named buffers.

use std::collections::BTreeMap;

use contracts::ContractError;

use crate::Buffer;

/// All named buffers of one running pipeline.
///
/// Buffers are created during reader instantiation and live until shutdown.
/// Names are global across readers; a duplicate name is a config error
/// because it would give one buffer two writers.
#[derive(Debug, Default)]
pub struct NeutralZone {
    buffers: BTreeMap<String, Buffer>,
}

impl NeutralZone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, buffer: Buffer) -> Result<(), ContractError> {
        let name = name.into();
        if self.buffers.contains_key(&name) {
            return Err(ContractError::config_validation(
                format!("buffers[{name}]"),
                "duplicate buffer name across readers",
            ));
        }
        self.buffers.insert(name, buffer);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Buffer> {
        self.buffers.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Buffer> {
        self.buffers.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.buffers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// End time of the named buffer, `None` when absent or empty.
    pub fn end_time(&self, name: &str) -> Option<f64> {
        self.buffers.get(name).and_then(Buffer::end_time)
    }
}
