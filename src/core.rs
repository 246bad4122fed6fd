//! Host-facing context object.
//!
//! `Core` owns every process-wide table (collectors, tasks,
//! destinations) and exposes the operations the orchestration host
//! calls when its declarative objects change.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collector::{Collector, CollectorRegistry, ConfigMap};
use crate::error::Result;
use crate::metrics::SelfMetrics;
use crate::normalizer::Normalizer;
use crate::sample::Labels;
use crate::scheduler::Scheduler;
use crate::writer::{DestinationOptions, WriterManager, WriterSettings};

// ------------------------------------------------------------
// Monitor spec
// ------------------------------------------------------------
//
// Desired collection for one model: which collector, how often,
// with which config and extra labels.
//
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelSpec {
    pub name: String,

    #[serde(default)]
    pub config: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MonitorSpec {
    /// Name of the host object, used in logs only.
    #[serde(default)]
    pub name: String,

    pub model: ModelSpec,

    #[serde(with = "humantime_serde")]
    pub period: Duration,

    #[serde(default)]
    pub labels: Labels,
}

#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub writer: WriterSettings,
    pub global_labels: Labels,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            writer: WriterSettings::default(),
            global_labels: Normalizer::default().global_labels().clone(),
        }
    }
}

/// Everything the pipeline shares, constructed once at startup.
///
/// Must be created inside a tokio runtime.
pub struct Core {
    registry: Arc<CollectorRegistry>,
    scheduler: Scheduler,
    writers: Arc<WriterManager>,
    normalizer: Normalizer,
    last_push: Arc<DashMap<String, DateTime<Utc>>>,
    shutdown: CancellationToken,
    emitter: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("registry", &self.registry)
            .field("scheduler", &self.scheduler)
            .field("writers", &self.writers)
            .finish_non_exhaustive()
    }
}

impl Core {
    pub fn new(settings: CoreSettings) -> Self {
        Self {
            registry: Arc::new(CollectorRegistry::new()),
            scheduler: Scheduler::new(),
            writers: Arc::new(WriterManager::new(settings.writer)),
            normalizer: Normalizer::new(settings.global_labels),
            last_push: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
            emitter: parking_lot::Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &CollectorRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn writers(&self) -> &Arc<WriterManager> {
        &self.writers
    }

    /// Static registration of a collector type, at startup.
    pub fn register_collector(&self, collector: Box<dyn Collector>) {
        self.registry.register(collector);
    }

    // --------------------------------------------------------
    // Monitors
    // --------------------------------------------------------

    /// Create / update of a monitor: re-init the collector, then
    /// (re)start its periodic gather -> normalize -> write loop.
    ///
    /// The task is keyed by model name.
    pub async fn apply_monitor(&self, spec: &MonitorSpec) -> Result<()> {
        let model = spec.model.name.clone();
        let config = ConfigMap::from(spec.model.config.clone());

        self.registry.init_config(&model, &config).await?;
        log::info!(
            "monitor `{}`: model `{model}` config applied, period {:?}",
            spec.name,
            spec.period
        );

        self.scheduler.add_task(&model);

        let registry = self.registry.clone();
        let writers = self.writers.clone();
        let normalizer = self.normalizer.clone();
        let last_push = self.last_push.clone();
        let labels = spec.labels.clone();
        let task = model.clone();

        self.scheduler
            .run(&model, spec.period, move || {
                let registry = registry.clone();
                let writers = writers.clone();
                let normalizer = normalizer.clone();
                let last_push = last_push.clone();
                let labels = labels.clone();
                let model = task.clone();

                async move {
                    collect_once(&registry, &writers, &normalizer, &model, &labels).await;
                    last_push.insert(model, Utc::now());
                }
            })
            .await
    }

    /// Delete of a monitor: stop its task and drop what it left pending.
    pub async fn remove_monitor(&self, model: &str) {
        self.scheduler.stop(model).await;
        self.last_push.remove(model);

        match self.registry.evict(model) {
            Ok(0) => {}
            Ok(n) => log::info!("model `{model}`: discarded {n} pending samples"),
            Err(e) => log::debug!("remove monitor: {e}"),
        }
    }

    /// Completion time of the model's last collection round, whether
    /// or not its gather succeeded.
    pub fn last_push(&self, model: &str) -> Option<DateTime<Utc>> {
        self.last_push.get(model).map(|t| *t)
    }

    // --------------------------------------------------------
    // Destinations
    // --------------------------------------------------------

    pub fn apply_destination(&self, name: &str, opts: DestinationOptions) -> Result<()> {
        self.writers.register(name, opts)
    }

    pub fn remove_destination(&self, name: &str) -> Result<()> {
        self.writers.deregister(name)
    }

    // --------------------------------------------------------
    // Self metrics & shutdown
    // --------------------------------------------------------

    /// Starts the self-metrics emitter. Replaces a running one.
    pub fn start_self_metrics(&self, region: &str, interval: Duration) {
        let emitter = SelfMetrics::new(
            self.writers.clone(),
            self.normalizer.clone(),
            region,
            interval,
        );
        let handle = emitter.spawn(self.shutdown.child_token());

        if let Some(previous) = self.emitter.lock().replace(handle) {
            previous.abort();
        }
    }

    /// StopAll, stop the emitter, then flush and close the writers.
    pub async fn shutdown(&self) {
        log::info!("shutting down, stopping {} tasks", self.scheduler.len());
        self.scheduler.stop_all().await;

        self.shutdown.cancel();
        let emitter = self.emitter.lock().take();
        if let Some(handle) = emitter {
            let _ = handle.await;
        }

        self.writers.close().await;
        log::info!("shutdown complete");
    }
}

/// One tick of a monitor. Failures are logged; partial results are
/// still forwarded.
async fn collect_once(
    registry: &CollectorRegistry,
    writers: &WriterManager,
    normalizer: &Normalizer,
    model: &str,
    labels: &Labels,
) {
    if let Err(e) = registry.gather(model).await {
        log::error!("{e}");
    }

    let pending = match registry.list(model) {
        Ok(list) => list,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };

    let samples = normalizer.process(&pending, labels).pop_back_all();
    let n = samples.len();
    if writers.write_samples(samples) {
        log::debug!("model `{model}`: wrote {n} samples");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CollectorError, Error};
    use crate::sample::SampleList;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Collector for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn init(&mut self, config: &ConfigMap) -> Result<(), CollectorError> {
            config.require("address")?;
            Ok(())
        }

        async fn gather(&mut self, out: &SampleList) -> Result<(), CollectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            out.push_sample("counting", "up", 1, &Labels::new());
            Ok(())
        }
    }

    fn core() -> (Core, Arc<AtomicUsize>) {
        let core = Core::new(CoreSettings {
            writer: WriterSettings {
                idle_interval: Duration::from_secs(3600),
                ..WriterSettings::default()
            },
            ..CoreSettings::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        core.register_collector(Box::new(Counting {
            calls: calls.clone(),
        }));
        (core, calls)
    }

    fn spec(period_ms: u64, address: &str) -> MonitorSpec {
        MonitorSpec {
            name: "counting-monitor".into(),
            model: ModelSpec {
                name: "counting".into(),
                config: HashMap::from([("address".to_string(), address.to_string())]),
            },
            period: Duration::from_millis(period_ms),
            labels: Labels::from([("team".to_string(), "infra".to_string())]),
        }
    }

    #[tokio::test]
    async fn bad_config_never_starts_a_task() {
        let (core, calls) = core();
        let err = core.apply_monitor(&spec(10, "")).await.unwrap_err();
        assert!(matches!(err, Error::ConfigInit { .. }));
        assert!(!core.scheduler().exists("counting"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_model_is_reported() {
        let (core, _) = core();
        let mut s = spec(10, "a");
        s.model.name = "mysql".into();
        assert!(core.apply_monitor(&s).await.unwrap_err().is_not_registered());
    }

    #[tokio::test]
    async fn reapplying_keeps_a_single_loop() {
        let (core, calls) = core();
        core.apply_monitor(&spec(20, "a")).await.unwrap();
        core.apply_monitor(&spec(20, "b")).await.unwrap();
        core.apply_monitor(&spec(20, "c")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(110)).await;
        core.remove_monitor("counting").await;

        let n = calls.load(Ordering::SeqCst);
        assert!(n <= 10, "duplicate loops suspected: {n} gathers");
        assert!(core.last_push("counting").is_none());
    }

    #[tokio::test]
    async fn ticks_flow_into_the_writer_queue() {
        let (core, calls) = core();
        core.apply_monitor(&spec(20, "a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(70)).await;

        assert!(core.last_push("counting").is_some());
        core.remove_monitor("counting").await;

        let gathers = calls.load(Ordering::SeqCst);
        assert!(gathers >= 2);
        assert_eq!(core.writers().queue_metrics().total_count, gathers as u64);

        let after = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after);
        core.shutdown().await;
    }

    struct Flaky;

    #[async_trait::async_trait]
    impl Collector for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn init(&mut self, _config: &ConfigMap) -> Result<(), CollectorError> {
            Ok(())
        }

        async fn gather(&mut self, out: &SampleList) -> Result<(), CollectorError> {
            out.push_sample("flaky", "up", 0, &Labels::new());
            Err(CollectorError::Other("backend unreachable".into()))
        }
    }

    #[tokio::test]
    async fn failed_rounds_still_record_last_push() {
        let (core, _) = core();
        core.register_collector(Box::new(Flaky));

        let mut s = spec(3_600_000, "a");
        s.model.name = "flaky".into();
        core.apply_monitor(&s).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(core.last_push("flaky").is_some());
        // the partial result is forwarded as well
        assert_eq!(core.writers().queue_metrics().total_count, 1);
        core.remove_monitor("flaky").await;
    }

    #[tokio::test]
    async fn destinations_register_and_remove() {
        let (core, _) = core();
        core.apply_destination("prom", DestinationOptions::new("http://localhost:9090/api/v1/write"))
            .unwrap();
        assert_eq!(core.writers().destinations(), vec!["prom"]);
        core.remove_destination("prom").unwrap();
        assert!(core.remove_destination("prom").unwrap_err().is_not_registered());
    }

    #[test]
    fn monitor_spec_deserializes() {
        let spec: MonitorSpec = serde_json::from_str(
            r#"{"name": "cache", "model": {"name": "redis", "config": {"address": "10.0.0.1"}},
                "period": "15s", "labels": {"team": "db"}}"#,
        )
        .unwrap();
        assert_eq!(spec.name, "cache");
        assert_eq!(spec.period, Duration::from_secs(15));
        assert_eq!(spec.model.config["address"], "10.0.0.1");
        assert_eq!(spec.labels["team"], "db");
    }
}
