//! Writer manager
//!
//! Owns the bounded queue, the table of remote-write destinations,
//! the background drain loop and the delivery counters.
//!
//! DATA FLOW:
//!
//!   write_samples -> queue.push_many
//!   drain loop    -> queue.pop_back_n -> write_time_series
//!   write_time_series -> every destination, concurrently
//!
pub mod prompb;
pub mod remote;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{DeliveryError, Error, Kind, Result};
use crate::queue::BoundedQueue;
use crate::sample::Sample;

pub use prompb::TimeSeries;
pub use remote::{DestinationOptions, RemoteWriter};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1_000_000;
pub const DEFAULT_BATCH_SIZE: usize = 1_000;
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(400);
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Sizing of the queue and the drain loop.
#[derive(Debug, Clone, Copy)]
pub struct WriterSettings {
    pub queue_capacity: usize,
    /// Series popped per drain iteration
    pub batch_size: usize,
    /// Sleep between polls of an empty queue
    pub idle_interval: Duration,
    /// Overall budget of the final flush on `close`
    pub flush_timeout: Duration,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }
}

/// Point-in-time copy of the delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Series offered to the queue
    pub total_count: u64,
    /// Rejected `write_samples` calls
    pub fail_count: u64,
    /// Series in rejected calls
    pub fail_total: u64,
    /// Queue length after the last push
    pub queue_size: u64,
    /// Series handed to destinations (counted once per destination)
    pub write_total: u64,
    /// Series whose delivery to a destination failed
    pub write_fail_total: u64,
}

/// Outcome of one fan-out.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    pub failed: Vec<Error>,
}

impl DeliveryReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_destinations(&self) -> Vec<&str> {
        self.failed
            .iter()
            .filter_map(|e| match e {
                Error::Delivery { destination, .. } => Some(destination.as_str()),
                _ => None,
            })
            .collect()
    }
}

struct Shared {
    destinations: Mutex<HashMap<String, Arc<RemoteWriter>>>,
    queue: BoundedQueue<TimeSeries>,
    stats: Mutex<Snapshot>,
    settings: WriterSettings,
}

/// Fans queued series out to every registered destination.
///
/// Must be created inside a tokio runtime: `new` spawns the drain loop.
pub struct WriterManager {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for WriterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterManager")
            .field("destinations", &self.destinations())
            .field("queue_len", &self.shared.queue.len())
            .field("settings", &self.shared.settings)
            .finish()
    }
}

impl WriterManager {
    pub fn new(settings: WriterSettings) -> Self {
        let shared = Arc::new(Shared {
            destinations: Mutex::new(HashMap::new()),
            queue: BoundedQueue::new(settings.queue_capacity),
            stats: Mutex::new(Snapshot::default()),
            settings,
        });
        let shutdown = CancellationToken::new();

        let drain = tokio::spawn(drain_loop(shared.clone(), shutdown.clone()));

        Self {
            shared,
            shutdown,
            drain: Mutex::new(Some(drain)),
        }
    }

    /// Adds or replaces the destination `name`.
    ///
    /// The new client is built before the table is touched, so a bad
    /// config leaves any previous registration in place.
    pub fn register(&self, name: &str, opts: DestinationOptions) -> Result<()> {
        let writer = Arc::new(RemoteWriter::new(name, opts)?);
        let url = writer.options().url.clone();

        let replaced = self
            .shared
            .destinations
            .lock()
            .insert(name.to_string(), writer)
            .is_some();

        log::info!(
            "destination `{name}` {} ({url})",
            if replaced { "updated" } else { "registered" }
        );
        Ok(())
    }

    pub fn deregister(&self, name: &str) -> Result<()> {
        match self.shared.destinations.lock().remove(name) {
            Some(_) => {
                log::info!("destination `{name}` removed");
                Ok(())
            }
            None => Err(Error::not_registered(Kind::Destination, name)),
        }
    }

    /// Registered destination names, sorted.
    pub fn destinations(&self) -> Vec<String> {
        let mut names: Vec<_> = self.shared.destinations.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn destination(&self, name: &str) -> Option<Arc<RemoteWriter>> {
        self.shared.destinations.lock().get(name).cloned()
    }

    /// Converts and enqueues samples. Never waits on the network.
    ///
    /// Returns whether the batch was admitted. A rejected batch is
    /// counted and logged, not retried.
    pub fn write_samples(&self, samples: Vec<Sample>) -> bool {
        if samples.is_empty() {
            return true;
        }

        let series = prompb::to_time_series(&samples);
        let count = series.len() as u64;

        let admitted = self.shared.queue.push_many(series);
        let len = self.shared.queue.len();

        if !admitted {
            log::error!(
                "write {count} series failed, queue full ({len}/{}), increase queue size",
                self.shared.queue.capacity()
            );
        }

        let mut stats = self.shared.stats.lock();
        stats.total_count += count;
        stats.queue_size = len as u64;
        if !admitted {
            stats.fail_count += 1;
            stats.fail_total += count;
        }

        admitted
    }

    /// Delivers one batch to every destination concurrently.
    pub async fn write_time_series(&self, series: &[TimeSeries]) -> DeliveryReport {
        write_time_series(&self.shared, series).await
    }

    pub fn queue_metrics(&self) -> Snapshot {
        *self.shared.stats.lock()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Stops the drain loop after a final flush of the queue.
    ///
    /// The flush as a whole is bounded by `flush_timeout`; whatever is
    /// still queued after that is abandoned and logged. Calling it
    /// twice is harmless.
    pub async fn close(&self) {
        self.shutdown.cancel();

        let handle = self.drain.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("writer drain loop ended abnormally: {e}");
            }
        }
    }
}

impl Drop for WriterManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn drain_loop(shared: Arc<Shared>, shutdown: CancellationToken) {
    let batch_size = shared.settings.batch_size.max(1);

    while !shutdown.is_cancelled() {
        let batch = shared.queue.pop_back_n(batch_size);
        if batch.is_empty() {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(shared.settings.idle_interval) => {}
            }
            continue;
        }

        write_time_series(&shared, &batch).await;
    }

    // final flush
    let flush = async {
        loop {
            let batch = shared.queue.pop_back_n(batch_size);
            if batch.is_empty() {
                break;
            }
            write_time_series(&shared, &batch).await;
        }
    };

    let budget = shared.settings.flush_timeout;
    if tokio::time::timeout(budget, flush).await.is_err() {
        log::error!(
            "final flush exceeded {budget:?}, abandoning {} queued series",
            shared.queue.len()
        );
    }

    log::info!("writer drain loop stopped");
}

async fn write_time_series(shared: &Shared, series: &[TimeSeries]) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    if series.is_empty() {
        return report;
    }

    let writers: Vec<Arc<RemoteWriter>> =
        shared.destinations.lock().values().cloned().collect();
    if writers.is_empty() {
        log::debug!("no destinations registered, dropping {} series", series.len());
        return report;
    }

    let results = join_all(
        writers
            .iter()
            .map(|w| async move { (w.name().to_string(), w.write(series).await) }),
    )
    .await;

    let count = series.len() as u64;
    for (name, result) in results {
        match result {
            Ok(()) => report.delivered.push(name),
            Err(e) => {
                log::error!("post {count} series to `{name}` failed: {e}");
                report.failed.push(delivery_error(&name, e));
            }
        }
    }

    let mut stats = shared.stats.lock();
    stats.write_total += count * writers.len() as u64;
    stats.write_fail_total += count * report.failed.len() as u64;

    report
}

fn delivery_error(destination: &str, source: DeliveryError) -> Error {
    Error::Delivery {
        destination: destination.to_string(),
        source,
    }
}
