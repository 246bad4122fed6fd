use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Kind, Result};

struct Task {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    period: Option<Duration>,
}

impl Task {
    fn idle() -> Self {
        Self {
            token: CancellationToken::new(),
            handle: None,
            period: None,
        }
    }
}

/// Dynamic table of named periodic tasks.
///
/// LIFECYCLE:
///   absent -> registered (idle) -> running -> stopped (absent)
///
/// TIMING:
/// - The first invocation happens immediately on `run`
/// - Later invocations follow every `period`
/// - An invocation is awaited before the next tick is considered;
///   ticks missed meanwhile are skipped, never run back to back
///
/// GUARANTEES:
/// - At most one loop per task name
/// - Once `stop` returns, no invocation of that task starts again
///
#[derive(Default)]
pub struct Scheduler {
    tasks: DashMap<String, Task>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.names())
            .finish()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` as idle. No-op when the task already exists,
    /// so a running task keeps its stop signal.
    pub fn add_task(&self, name: &str) {
        self.tasks.entry(name.to_string()).or_insert_with(Task::idle);
    }

    pub fn exists(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.tasks
            .get(name)
            .is_some_and(|t| t.handle.as_ref().is_some_and(|h| !h.is_finished()))
    }

    pub fn period(&self, name: &str) -> Option<Duration> {
        self.tasks.get(name).and_then(|t| t.period)
    }

    /// Registered task names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tasks.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Starts invoking `f` every `period` until the task is stopped.
    ///
    /// Running an already running task replaces its loop: the old loop
    /// is cancelled, and the new one waits for it to exit before its
    /// first tick. The swap happens under the task's table entry, so
    /// concurrent `run` / `stop` calls on one name never leave a loop
    /// behind.
    pub async fn run<F, Fut>(&self, name: &str, period: Duration, f: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            return Err(Error::Config(format!("task `{name}`: period must be > 0")));
        }

        let mut task = self
            .tasks
            .get_mut(name)
            .ok_or_else(|| Error::not_registered(Kind::Task, name))?;

        let token = CancellationToken::new();
        std::mem::replace(&mut task.token, token.clone()).cancel();

        let previous = task.handle.take();
        if previous.is_some() {
            log::info!("task `{name}` restarting with period {period:?}");
        }

        task.handle = Some(tokio::spawn(run_loop(
            name.to_string(),
            period,
            token,
            previous,
            f,
        )));
        task.period = Some(period);
        drop(task);

        log::info!("task `{name}` running every {period:?}");
        Ok(())
    }

    /// Cancels the task and waits for its loop to exit.
    ///
    /// An invocation already in flight is allowed to finish. Stopping
    /// an unknown task is a no-op and returns `false`.
    pub async fn stop(&self, name: &str) -> bool {
        let Some((_, task)) = self.tasks.remove(name) else {
            log::debug!("stop: task `{name}` not registered");
            return false;
        };

        task.token.cancel();
        if let Some(handle) = task.handle {
            if let Err(e) = handle.await {
                log::error!("task `{name}` loop ended abnormally: {e}");
            }
        }

        log::info!("task `{name}` stopped");
        true
    }

    /// Stops every task. Used at shutdown.
    pub async fn stop_all(&self) {
        for name in self.names() {
            self.stop(&name).await;
        }
    }
}

async fn run_loop<F, Fut>(
    name: String,
    period: Duration,
    token: CancellationToken,
    previous: Option<JoinHandle<()>>,
    f: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    // the replaced loop may still be inside an invocation
    if let Some(handle) = previous {
        if let Err(e) = handle.await {
            log::error!("task `{name}` previous loop ended abnormally: {e}");
        }
    }

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        f().await;
    }

    log::debug!("task `{name}` loop exited");
}
