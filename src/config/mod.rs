//! Typed configuration from environment variables or TOML.
//!
//! Loads once at startup and fails fast on malformed values. Every setting
//! has a default, so an empty environment yields a working config.

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::FieldPolicy;
use crate::storage::{DEFAULT_HEAP_KEY, DEFAULT_REGISTRY_KEY, SegmentKey};

/// Default capacity of both the heap and the registry.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub heap_capacity: usize,
    pub registry_capacity: usize,
    pub heap_key: SegmentKey,
    pub registry_key: SegmentKey,
    pub field_policy: FieldPolicy,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heap_capacity: DEFAULT_CAPACITY,
            registry_capacity: DEFAULT_CAPACITY,
            heap_key: DEFAULT_HEAP_KEY,
            registry_key: DEFAULT_REGISTRY_KEY,
            field_policy: FieldPolicy::Truncate,
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            heap_capacity: parsed_var("DISPATCH_HEAP_CAPACITY")?.unwrap_or(defaults.heap_capacity),
            registry_capacity: parsed_var("DISPATCH_REGISTRY_CAPACITY")?
                .unwrap_or(defaults.registry_capacity),
            heap_key: parsed_var("DISPATCH_HEAP_KEY")?
                .map(SegmentKey)
                .unwrap_or(defaults.heap_key),
            registry_key: parsed_var("DISPATCH_REGISTRY_KEY")?
                .map(SegmentKey)
                .unwrap_or(defaults.registry_key),
            field_policy: parsed_var("DISPATCH_FIELD_POLICY")?.unwrap_or(defaults.field_policy),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok().filter(|s| !s.is_empty()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.heap_capacity == 0 || self.registry_capacity == 0 {
            return Err(Error::Config("capacities must be at least 1".to_string()));
        }
        if self.heap_key == self.registry_key {
            return Err(Error::Config(format!(
                "heap and registry share block key {}",
                self.heap_key
            )));
        }
        Ok(())
    }
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}
