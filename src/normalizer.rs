use chrono::Utc;
use once_cell::sync::Lazy;

use crate::sample::{Labels, SampleList};

/// Labels stamped on every sample unless a collector already set them.
pub static DEFAULT_GLOBAL_LABELS: Lazy<Labels> = Lazy::new(|| {
    Labels::from([("source".to_string(), env!("CARGO_PKG_NAME").to_string())])
});

const ADDRESS_LABEL: &str = "address";
const INSTANCE_LABEL: &str = "instance";

/// Normalizes collector output before it is handed to the writers.
///
/// Labels are merged first-writer-wins, in this order:
/// 1. labels set by the collector itself
/// 2. process-wide global labels
/// 3. per-monitor extra labels
///
/// Later layers only fill keys that are still absent.
#[derive(Debug, Clone)]
pub struct Normalizer {
    global_labels: Labels,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_GLOBAL_LABELS.clone())
    }
}

impl Normalizer {
    pub fn new(global_labels: Labels) -> Self {
        Self { global_labels }
    }

    pub fn global_labels(&self) -> &Labels {
        &self.global_labels
    }

    /// Drains `pending` and returns a fresh list of normalized samples.
    ///
    /// - unset timestamps become "now" (one instant per call)
    /// - global labels are applied first, then `extra`; neither
    ///   overrides a key that already exists
    /// - `instance` mirrors `address` whenever `address` is present
    pub fn process(&self, pending: &SampleList, extra: &Labels) -> SampleList {
        let out = SampleList::new();
        if pending.is_empty() {
            return out;
        }

        let now = Utc::now();

        for mut sample in pending.pop_back_all() {
            sample.timestamp.get_or_insert(now);

            for layer in [&self.global_labels, extra] {
                for (k, v) in layer {
                    sample
                        .labels
                        .entry(k.clone())
                        .or_insert_with(|| v.clone());
                }
            }

            if let Some(address) = sample.labels.get(ADDRESS_LABEL).cloned() {
                sample.labels.insert(INSTANCE_LABEL.to_string(), address);
            }

            out.push_front(sample);
        }

        out
    }
}
