use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::EngineError;

/// Append-only bag of named step outputs threaded through a pipeline.
///
/// It is never persisted: on resume the pipeline rebuilds it from memoized
/// step results in the same order.
#[derive(Debug, Clone, Default)]
pub struct Context {
    values: BTreeMap<String, serde_json::Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), EngineError> {
        if self.values.contains_key(key) {
            return Err(EngineError::ContextOverwrite {
                key: key.to_string(),
            });
        }
        let value = serde_json::to_value(value).map_err(|source| EngineError::Codec {
            step: key.to_string(),
            source,
        })?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, EngineError> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| EngineError::ContextMissing {
                key: key.to_string(),
            })?;
        serde_json::from_value(value.clone()).map_err(|source| EngineError::Codec {
            step: key.to_string(),
            source,
        })
    }
}
