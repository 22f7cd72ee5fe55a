// ABOUTME: Key/value context threaded through every step of one pipeline run.
// ABOUTME: Values are stored as JSON so steps can share typed data without a shared struct.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("pipeline context is missing `{0}`")]
    Missing(String),

    #[error("pipeline context value `{key}` has an unexpected shape: {source}")]
    Invalid {
        key: String,
        source: serde_json::Error,
    },
}

/// Data accumulated by the steps of one run. Keys are never removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineContext {
    values: BTreeMap<String, Value>,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), ContextError> {
        let value = serde_json::to_value(value).map_err(|source| ContextError::Invalid {
            key: key.to_string(),
            source,
        })?;
        if self.values.insert(key.to_string(), value).is_some() {
            tracing::debug!(key, "pipeline context value replaced");
        }
        Ok(())
    }

    /// Builder form of `insert`.
    pub fn with<T: Serialize>(mut self, key: &str, value: T) -> Result<Self, ContextError> {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ContextError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|source| ContextError::Invalid {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T, ContextError> {
        self.get(key)?
            .ok_or_else(|| ContextError::Missing(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
