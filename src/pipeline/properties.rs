//! Node parameters bound before a graph starts running.
//!
//! Parameters are plain key/value pairs (`"x" = 12`, `"pipe-name" = "/tmp/f"`).
//! They are handed to a filter's constructor through the registry and are
//! immutable for the rest of the run.

use crate::pipeline::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<u32> for ConfigValue {
    fn from(v: u32) -> Self {
        ConfigValue::Int(v as i64)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::String(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::String(v)
    }
}

/// Named parameters for one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, ConfigValue>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<ConfigValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<ConfigValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Non-negative integer parameter, `default` when absent.
    pub fn get_uint(&self, key: &str, default: u64) -> PipelineResult<u64> {
        match self.0.get(key) {
            None => Ok(default),
            Some(value) => value
                .as_int()
                .and_then(|v| u64::try_from(v).ok())
                .ok_or_else(|| {
                    PipelineError::Configuration(format!(
                        "'{}' must be a non-negative integer, got {:?}",
                        key, value
                    ))
                }),
        }
    }

    pub fn get_float(&self, key: &str, default: f64) -> PipelineResult<f64> {
        match self.0.get(key) {
            None => Ok(default),
            Some(value) => value.as_float().ok_or_else(|| {
                PipelineError::Configuration(format!("'{}' must be a number, got {:?}", key, value))
            }),
        }
    }

    pub fn get_str(&self, key: &str) -> PipelineResult<Option<&str>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(value) => value.as_str().map(Some).ok_or_else(|| {
                PipelineError::Configuration(format!("'{}' must be a string, got {:?}", key, value))
            }),
        }
    }
}
