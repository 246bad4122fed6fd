//! Collector registry
//!
//! Maps a model name to its collector instance and to the model's
//! private pending-sample list.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::{Collector, ConfigMap};
use crate::error::{CollectorError, Error, Kind, Result};
use crate::sample::{Sample, SampleList};

struct Model {
    collector: Mutex<Box<dyn Collector>>,
    pending: Arc<SampleList>,
}

/// Table of registered collectors.
///
/// DESIGN:
/// - Registration happens once per collector type at startup
/// - Each model owns one `SampleList` for the process lifetime
/// - `init` / `gather` on one model are serialized by a per-model
///   lock; different models never contend
///
#[derive(Default)]
pub struct CollectorRegistry {
    models: RwLock<HashMap<String, Arc<Model>>>,
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field("models", &self.models())
            .finish()
    }
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a collector under its own `name()`.
    ///
    /// A second registration under the same name replaces the first,
    /// together with its pending list.
    pub fn register(&self, collector: Box<dyn Collector>) {
        let name = collector.name().to_string();
        let model = Arc::new(Model {
            collector: Mutex::new(collector),
            pending: Arc::new(SampleList::new()),
        });

        if self.models.write().insert(name.clone(), model).is_some() {
            log::warn!("collector `{name}` registered twice, replacing");
        } else {
            log::info!("collector `{name}` registered");
        }
    }

    pub fn has_model(&self, model: &str) -> bool {
        self.models.read().contains_key(model)
    }

    /// Registered model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let mut names: Vec<_> = self.models.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn lookup(&self, model: &str) -> Result<Arc<Model>> {
        self.models
            .read()
            .get(model)
            .cloned()
            .ok_or_else(|| Error::not_registered(Kind::Model, model))
    }

    /// Re-applies the model's configuration.
    pub async fn init_config(&self, model: &str, config: &ConfigMap) -> Result<()> {
        let entry = self.lookup(model)?;
        let mut collector = entry.collector.lock().await;

        collector.init(config).await.map_err(|source| Error::ConfigInit {
            model: model.to_string(),
            source,
        })
    }

    /// Runs the collector against its private list.
    ///
    /// A panicking collector is reported as a gather error. Samples it
    /// pushed before failing stay pending.
    pub async fn gather(&self, model: &str) -> Result<()> {
        let entry = self.lookup(model)?;
        let mut collector = entry.collector.lock().await;

        let outcome = AssertUnwindSafe(collector.gather(&entry.pending))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => Err(CollectorError::Other(format!(
                "collector panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        result.map_err(|source| Error::Gather {
            model: model.to_string(),
            source,
        })
    }

    pub async fn init_config_with_gather(&self, model: &str, config: &ConfigMap) -> Result<()> {
        self.init_config(model, config).await?;
        self.gather(model).await
    }

    /// The model's pending list, shared with the collector.
    pub fn list(&self, model: &str) -> Result<Arc<SampleList>> {
        Ok(self.lookup(model)?.pending.clone())
    }

    pub fn pop_back_all(&self, model: &str) -> Result<Vec<Sample>> {
        Ok(self.lookup(model)?.pending.pop_back_all())
    }

    /// Discards whatever the model has pending.
    pub fn evict(&self, model: &str) -> Result<usize> {
        Ok(self.lookup(model)?.pending.clear())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Labels;

    #[derive(Default)]
    struct Fake {
        address: Option<String>,
        port: Option<String>,
        fail_after: Option<usize>,
        panic: bool,
    }

    #[async_trait::async_trait]
    impl Collector for Fake {
        fn name(&self) -> &str {
            "fake"
        }

        async fn init(&mut self, config: &ConfigMap) -> Result<(), CollectorError> {
            self.address = Some(config.require("address")?.to_string());
            self.port = config.get("port").map(str::to_string);
            self.fail_after = config.parse_int("fail_after")?.map(|n| n as usize);
            self.panic = config.parse_bool("panic")?;
            Ok(())
        }

        async fn gather(&mut self, out: &SampleList) -> Result<(), CollectorError> {
            if self.panic {
                panic!("boom");
            }
            let labels = Labels::from([(
                "address".to_string(),
                self.address.clone().unwrap_or_default(),
            )]);
            for i in 0..3 {
                if self.fail_after == Some(i) {
                    return Err(CollectorError::Other("backend went away".into()));
                }
                out.push_sample("fake", &format!("m{i}"), i, &labels);
            }
            Ok(())
        }
    }

    fn registry() -> CollectorRegistry {
        let registry = CollectorRegistry::new();
        registry.register(Box::new(Fake::default()));
        registry
    }

    #[tokio::test]
    async fn unknown_model_is_not_registered() {
        let registry = registry();
        assert!(registry.gather("mysql").await.unwrap_err().is_not_registered());
        assert!(registry.list("mysql").unwrap_err().is_not_registered());
        assert!(
            registry
                .init_config("mysql", &ConfigMap::new())
                .await
                .unwrap_err()
                .is_not_registered()
        );
    }

    #[tokio::test]
    async fn init_failure_is_wrapped() {
        let registry = registry();
        let err = registry.init_config("fake", &ConfigMap::new()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ConfigInit { ref model, source: CollectorError::MissingField(_) } if model == "fake"
        ));
    }

    #[tokio::test]
    async fn reinit_replaces_previous_config() {
        let registry = registry();
        let first: ConfigMap = [("address", "a"), ("port", "1")].into_iter().collect();
        let second: ConfigMap = [("address", "b")].into_iter().collect();

        registry.init_config("fake", &first).await.unwrap();
        registry.init_config("fake", &second).await.unwrap();
        registry.gather("fake").await.unwrap();

        let samples = registry.pop_back_all("fake").unwrap();
        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|s| s.labels["address"] == "b"));
    }

    #[tokio::test]
    async fn gather_error_keeps_partial_results() {
        let registry = registry();
        let cfg: ConfigMap = [("address", "a"), ("fail_after", "2")].into_iter().collect();
        registry.init_config("fake", &cfg).await.unwrap();

        let err = registry.gather("fake").await.unwrap_err();
        assert!(matches!(err, Error::Gather { .. }));
        assert_eq!(registry.list("fake").unwrap().len(), 2);

        // next cycle starts from a clean list after the drain
        assert_eq!(registry.pop_back_all("fake").unwrap().len(), 2);
        assert!(registry.list("fake").unwrap().is_empty());
    }

    #[tokio::test]
    async fn panicking_collector_becomes_gather_error() {
        let registry = registry();
        let cfg: ConfigMap = [("address", "a"), ("panic", "true")].into_iter().collect();
        registry.init_config("fake", &cfg).await.unwrap();

        let err = registry.gather("fake").await.unwrap_err();
        assert!(err.to_string().contains("boom"));

        // the registry is still usable afterwards
        let cfg: ConfigMap = [("address", "a")].into_iter().collect();
        registry.init_config_with_gather("fake", &cfg).await.unwrap();
        assert_eq!(registry.list("fake").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn evict_discards_pending() {
        let registry = registry();
        let cfg: ConfigMap = [("address", "a")].into_iter().collect();
        registry.init_config_with_gather("fake", &cfg).await.unwrap();

        assert_eq!(registry.evict("fake").unwrap(), 3);
        assert!(registry.pop_back_all("fake").unwrap().is_empty());
        assert_eq!(registry.models(), vec!["fake".to_string()]);
    }
}
