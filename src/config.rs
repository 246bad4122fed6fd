use std::path::Path;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::core::{CoreSettings, MonitorSpec};
use crate::error::{Error, Result};
use crate::metrics;
use crate::normalizer::DEFAULT_GLOBAL_LABELS;
use crate::sample::Labels;
use crate::writer::{DestinationOptions, WriterSettings};

// ------------------------------------------------------------
// Command line
// ------------------------------------------------------------
//
// Process-level knobs. Everything the host would normally hand
// over as declarative objects lives in the config file instead.
//
#[derive(Debug, Clone, Parser)]
#[command(name = "monitor-relay", version, about)]
pub struct Args {
    /// Address the host's metrics endpoint binds to
    #[arg(long, default_value = ":8080")]
    pub metrics_bind_address: String,

    /// Address the host's health probe binds to
    #[arg(long, default_value = ":8081")]
    pub health_probe_bind_address: String,

    /// Enable leader election in the host
    #[arg(long)]
    pub leader_elect: bool,

    /// One of error, warn, info, debug, trace
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Maximum number of series waiting for delivery
    #[arg(long, default_value_t = 1_000_000)]
    pub max_writer_queue_size: usize,

    /// Series per remote-write request
    #[arg(long, default_value_t = 1_000)]
    pub writer_batch: usize,

    /// Value of the `region` label on self metrics
    #[arg(long, default_value = "local")]
    pub region: String,

    /// Path of the JSON object file
    #[arg(long, default_value = "config.json")]
    pub config: String,
}

impl Args {
    pub fn writer_settings(&self) -> WriterSettings {
        WriterSettings {
            queue_capacity: self.max_writer_queue_size,
            batch_size: self.writer_batch,
            ..WriterSettings::default()
        }
    }
}

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Stands in for the host's remote-write and monitor objects when
// the relay runs on its own.
//
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,

    #[serde(default)]
    pub monitors: Vec<MonitorSpec>,

    /// Replaces the default `{"source": "monitor-relay"}`
    pub global_labels: Option<Labels>,

    #[serde(default, with = "humantime_serde")]
    pub self_metrics_interval: Option<Duration>,
}

impl Config {
    pub fn core_settings(&self, args: &Args) -> CoreSettings {
        CoreSettings {
            writer: args.writer_settings(),
            global_labels: self
                .global_labels
                .clone()
                .unwrap_or_else(|| DEFAULT_GLOBAL_LABELS.clone()),
        }
    }

    pub fn self_metrics_interval(&self) -> Duration {
        self.self_metrics_interval
            .filter(|d| !d.is_zero())
            .unwrap_or(metrics::DEFAULT_INTERVAL)
    }
}

// ------------------------------------------------------------
// Destination configuration
// ------------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DestinationConfig {
    pub name: String,

    #[serde(flatten)]
    pub options: DestinationOptions,
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads a JSON configuration file from disk and deserializes
// it into the strongly typed `Config` structure.
//
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
    parse_config(&data).map_err(|e| match e {
        Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
        other => other,
    })
}

pub fn parse_config(data: &str) -> Result<Config> {
    let cfg: Config = serde_json::from_str(data).map_err(|e| Error::Config(e.to_string()))?;

    for m in &cfg.monitors {
        if m.model.name.is_empty() {
            return Err(Error::Config(format!("monitor `{}`: empty model name", m.name)));
        }
    }
    Ok(cfg)
}
