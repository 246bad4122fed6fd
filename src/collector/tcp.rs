//! TCP connectivity probe.
//!
//! Config keys:
//! - `address` (required): `host:port`
//! - `timeout` (optional): connect timeout, e.g. `500ms`, default 3s

use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{Collector, ConfigMap};
use crate::error::CollectorError;
use crate::sample::{Labels, SampleList};

pub const NAME: &str = "tcp_probe";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
struct Target {
    address: String,
    timeout: Duration,
}

/// Emits `up` (1/0) and `connect_seconds` for one `host:port`.
#[derive(Debug, Default)]
pub struct TcpProbe {
    target: Option<Target>,
}

impl TcpProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Collector for TcpProbe {
    fn name(&self) -> &str {
        NAME
    }

    async fn init(&mut self, config: &ConfigMap) -> Result<(), CollectorError> {
        let address = config.require("address")?;
        if !address.contains(':') {
            return Err(CollectorError::InvalidField {
                key: "address".into(),
                reason: format!("{address:?}: expected host:port"),
            });
        }

        self.target = Some(Target {
            address: address.to_string(),
            timeout: config.parse_duration("timeout")?.unwrap_or(DEFAULT_TIMEOUT),
        });
        Ok(())
    }

    async fn gather(&mut self, out: &SampleList) -> Result<(), CollectorError> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| CollectorError::Other("probe used before init".into()))?;

        let labels = Labels::from([("address".to_string(), target.address.clone())]);
        let begun = Instant::now();

        let result = match timeout(target.timeout, TcpStream::connect(&target.address)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(CollectorError::Io(e)),
            Err(_) => Err(CollectorError::Timeout(target.timeout)),
        };

        out.push_sample(NAME, "connect_seconds", begun.elapsed().as_secs_f64(), &labels);
        out.push_sample(NAME, "up", result.is_ok(), &labels);

        if let Err(e) = &result {
            log::warn!("tcp probe to {} failed: {e}", target.address);
        }
        result
    }
}
