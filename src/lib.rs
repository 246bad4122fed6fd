// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - sample:     Metric sample model and the pending-sample list
// - queue:      Bounded, all-or-nothing FIFO shared by producers
// - normalizer: Stamps time and merges global / per-monitor labels
// - collector:  Collector trait, registry and built-in collectors
// - scheduler:  Named periodic tasks
// - writer:     Remote-write destinations, queue drain and fan-out
// - metrics:    Self-observability samples
// - core:       Host-facing context tying everything together
// - config:     CLI flags and the JSON object file
//
pub mod collector;
pub mod config;
pub mod core;
pub mod error;
pub mod metrics;
pub mod normalizer;
pub mod queue;
pub mod sample;
pub mod scheduler;
pub mod util;
pub mod writer;

pub use crate::core::{Core, CoreSettings, ModelSpec, MonitorSpec};
pub use error::{CollectorError, DeliveryError, Error, Result};
pub use sample::{Labels, Sample, SampleList, Value};
