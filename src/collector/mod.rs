//! Collector module
//!
//! This module groups everything a data-source plugin needs:
//! - The `Collector` capability contract
//! - `ConfigMap`, the flat key/value config handed to `init`
//! - The `CollectorRegistry` that owns every registered model
//!
//! Concrete collectors (databases, caches, ...) live outside the
//! core and only talk to it through this trait. `tcp` ships one
//! built-in connectivity probe.

pub mod registry;
pub mod tcp;

use std::collections::HashMap;
use std::time::Duration;

use humantime_serde::re::humantime;

use crate::error::CollectorError;
use crate::sample::SampleList;

pub use registry::CollectorRegistry;

/// Capability contract implemented by every data source.
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - The registry serializes `init` and `gather` for one model,
///   so implementations may freely mutate `self`
///
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    /// Stable identifier, used as the registry key and sample source.
    fn name(&self) -> &str;

    /// Validates and stores connection parameters.
    ///
    /// CONTRACT:
    /// - Called on every reconcile of the monitor
    /// - Must fully replace the previous configuration
    /// - Must fail fast on missing required fields
    ///
    async fn init(&mut self, config: &ConfigMap) -> Result<(), CollectorError>;

    /// Pushes zero or more samples into `out`.
    ///
    /// On error, samples already pushed stay in `out` and are
    /// shipped as a partial result. Must not retain `out`.
    async fn gather(&mut self, out: &SampleList) -> Result<(), CollectorError>;
}

// ------------------------------------------------------------
// ConfigMap
// ------------------------------------------------------------
//
// Collector-specific configuration as delivered by the host:
// a flat string -> string mapping. Typed accessors report
// errors against the offending key.
//
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMap(HashMap<String, String>);

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn require(&self, key: &str) -> Result<&str, CollectorError> {
        self.get(key)
            .ok_or_else(|| CollectorError::MissingField(key.to_string()))
    }

    /// Comma separated list, blank entries dropped.
    pub fn parse_slice(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Absent means `false`.
    pub fn parse_bool(&self, key: &str) -> Result<bool, CollectorError> {
        match self.get(key) {
            None => Ok(false),
            Some(v) => v.parse().map_err(|_| invalid(key, v, "expected true or false")),
        }
    }

    pub fn parse_int(&self, key: &str) -> Result<Option<i64>, CollectorError> {
        self.get(key)
            .map(|v| v.parse().map_err(|_| invalid(key, v, "expected an integer")))
            .transpose()
    }

    /// Human readable duration such as `3s` or `250ms`.
    pub fn parse_duration(&self, key: &str) -> Result<Option<Duration>, CollectorError> {
        self.get(key)
            .map(|v| humantime::parse_duration(v).map_err(|e| invalid(key, v, &e.to_string())))
            .transpose()
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> CollectorError {
    CollectorError::InvalidField {
        key: key.to_string(),
        reason: format!("{value:?}: {reason}"),
    }
}

impl From<HashMap<String, String>> for ConfigMap {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConfigMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
