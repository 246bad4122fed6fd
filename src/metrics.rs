use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::normalizer::Normalizer;
use crate::sample::{Labels, SampleList};
use crate::writer::{Snapshot, WriterManager};

pub const METRIC_PREFIX: &str = "monitor_relay";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

const METRIC_ENQUEUE_SUM: &str = "metrics_enqueue_sum";
const METRIC_ENQUEUE_FAILED_SUM: &str = "metrics_enqueue_failed_sum";
const METRIC_ENQUEUE_FAILED_COUNT: &str = "metrics_enqueue_failed_count";
const METRIC_QUEUE_SIZE: &str = "current_queue_size";
const METRIC_WRITE_TOTAL: &str = "write_total";
const METRIC_WRITE_FAIL_TOTAL: &str = "write_fail_total";

/// Periodically feeds the writer's own counters and process health
/// back through the normalizer and the writer.
///
/// Purpose:
/// - Make queue overflow and delivery failures visible remotely
/// - Report liveness of this process on the same path as any collector
///
pub struct SelfMetrics {
    writers: Arc<WriterManager>,
    normalizer: Normalizer,
    labels: Labels,
    interval: Duration,
    system: System,
    pid: Option<Pid>,
}

impl SelfMetrics {
    pub fn new(
        writers: Arc<WriterManager>,
        normalizer: Normalizer,
        region: &str,
        interval: Duration,
    ) -> Self {
        let pid = sysinfo::get_current_pid()
            .inspect_err(|e| log::warn!("self metrics: no process stats available: {e}"))
            .ok();

        // cpu usage is a delta between two refreshes; take the first now
        let mut system = System::new();
        if let Some(pid) = pid {
            system.refresh_process(pid);
        }

        Self {
            writers,
            normalizer,
            labels: Labels::from([("region".to_string(), region.to_string())]),
            interval,
            system,
            pid,
        }
    }

    /// Runs until `shutdown` fires. The first report goes out after one
    /// full interval.
    pub fn spawn(mut self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }

                let written = self.emit();
                log::debug!("self metrics: wrote {written} samples");
            }
            log::info!("self metrics stopped");
        })
    }

    /// Collects one round and hands it to the writer. Returns the
    /// number of samples written.
    pub fn emit(&mut self) -> usize {
        let pending = SampleList::new();
        self.collect(&pending);

        let samples = self.normalizer.process(&pending, &self.labels).pop_back_all();
        let n = samples.len();
        if !self.writers.write_samples(samples) {
            log::warn!("self metrics: queue full, {n} samples dropped");
        }
        n
    }

    fn collect(&mut self, out: &SampleList) {
        let no_labels = Labels::new();
        push_snapshot(out, &self.writers.queue_metrics());

        out.push_sample(METRIC_PREFIX, "up", 1, &no_labels);

        let Some(pid) = self.pid else { return };
        if !self.system.refresh_process(pid) {
            return;
        }
        if let Some(process) = self.system.process(pid) {
            out.push_sample(METRIC_PREFIX, "process_resident_memory_bytes", process.memory(), &no_labels);
            out.push_sample(METRIC_PREFIX, "process_cpu_usage_percent", process.cpu_usage(), &no_labels);
            out.push_sample(METRIC_PREFIX, "process_uptime_seconds", process.run_time(), &no_labels);
        }
    }
}

fn push_snapshot(out: &SampleList, ss: &Snapshot) {
    let no_labels = Labels::new();
    for (metric, value) in [
        (METRIC_ENQUEUE_SUM, ss.total_count),
        (METRIC_ENQUEUE_FAILED_SUM, ss.fail_total),
        (METRIC_ENQUEUE_FAILED_COUNT, ss.fail_count),
        (METRIC_QUEUE_SIZE, ss.queue_size),
        (METRIC_WRITE_TOTAL, ss.write_total),
        (METRIC_WRITE_FAIL_TOTAL, ss.write_fail_total),
    ] {
        out.push_sample(METRIC_PREFIX, metric, value, &no_labels);
    }
}
