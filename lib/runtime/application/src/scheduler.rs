use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use fluxgauge_domain::{MetricQuery, PollOutcome};

use crate::connection::ConnectionHandle;
use crate::executor::QueryExecutor;
use crate::registry::MetricRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Scheduled,
    Running,
}

const MIN_INTERVAL: Duration = Duration::from_millis(1);
const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

const SCHEDULED: u8 = 1;
const RUNNING: u8 = 2;

/// Shared between one metric's poll loop and `stop`.
///
/// Registry writes happen under `open`, so once `close` returns no result of
/// this schedule can reach the registry.
struct PollGate {
    open: Mutex<bool>,
    state: AtomicU8,
}

impl PollGate {
    fn new() -> Self {
        Self {
            open: Mutex::new(true),
            state: AtomicU8::new(SCHEDULED),
        }
    }

    fn begin(&self) -> bool {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if *open {
            self.state.store(RUNNING, Ordering::SeqCst);
        }
        *open
    }

    fn finish(&self, publish: impl FnOnce()) -> bool {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if *open {
            publish();
            self.state.store(SCHEDULED, Ordering::SeqCst);
        }
        *open
    }

    fn close(&self) {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        *open = false;
    }

    fn state(&self) -> PollState {
        match self.state.load(Ordering::SeqCst) {
            RUNNING => PollState::Running,
            _ => PollState::Scheduled,
        }
    }
}

struct PollTask {
    gate: Arc<PollGate>,
    handle: JoinHandle<()>,
}

#[derive(Clone)]
struct PollContext {
    connection: ConnectionHandle,
    executor: QueryExecutor,
    registry: Arc<MetricRegistry>,
}

/// Drives one independent timer per metric against a single connection.
pub struct PollScheduler {
    context: PollContext,
    tasks: Mutex<HashMap<String, PollTask>>,
}

impl PollScheduler {
    pub fn new(
        connection: ConnectionHandle,
        executor: QueryExecutor,
        registry: Arc<MetricRegistry>,
    ) -> Self {
        Self {
            context: PollContext {
                connection,
                executor,
                registry,
            },
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Poll `metric` now and then every `interval`. A schedule already
    /// running for the same metric is stopped first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, metric: MetricQuery, interval: Duration) {
        let name = metric.name.clone();
        let interval = interval.clamp(MIN_INTERVAL, MAX_INTERVAL);
        // `cancel` waits for an in-flight publish, whose callbacks may read
        // `tasks`; it never runs under the `tasks` lock.
        let previous = self.lock_tasks().remove(&name);
        if let Some(previous) = previous {
            previous.cancel();
        }

        let gate = Arc::new(PollGate::new());
        let handle = tokio::spawn(poll_loop(
            self.context.clone(),
            metric,
            interval,
            Arc::clone(&gate),
        ));
        debug!(metric = %name, ?interval, "Poll scheduled");
        let raced = self.lock_tasks().insert(name, PollTask { gate, handle });
        if let Some(raced) = raced {
            raced.cancel();
        }
    }

    /// Stop polling `metric`. After this returns the registry receives no
    /// further update from this schedule, even from a poll still in flight.
    pub fn stop(&self, metric: &str) -> bool {
        let task = self.lock_tasks().remove(metric);
        match task {
            Some(task) => {
                task.cancel();
                debug!(metric, "Poll stopped");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let tasks: Vec<(String, PollTask)> = self.lock_tasks().drain().collect();
        for (metric, task) in tasks {
            task.cancel();
            debug!(%metric, "Poll stopped");
        }
    }

    pub fn state(&self, metric: &str) -> PollState {
        self.lock_tasks()
            .get(metric)
            .map(|task| task.gate.state())
            .unwrap_or(PollState::Idle)
    }

    pub fn is_running(&self, metric: &str) -> bool {
        self.state(metric) != PollState::Idle
    }

    pub fn scheduled(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock_tasks().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.context.registry
    }

    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<String, PollTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl PollTask {
    fn cancel(self) {
        self.gate.close();
        self.handle.abort();
    }
}

async fn poll_loop(context: PollContext, metric: MetricQuery, every: Duration, gate: Arc<PollGate>) {
    let mut due = Instant::now();
    let mut failing = false;

    loop {
        sleep_until(due).await;
        if !gate.begin() {
            break;
        }

        let outcome = PollOutcome::from(context.executor.run(&context.connection, &metric).await);
        match &outcome {
            PollOutcome::Scalar(scalar) => {
                if failing {
                    info!(metric = %metric.name, value = %scalar.value, "Metric recovered");
                } else {
                    debug!(metric = %metric.name, value = %scalar.value, "Metric updated");
                }
                failing = false;
            }
            PollOutcome::NoData => {
                debug!(metric = %metric.name, "Query returned no rows");
            }
            PollOutcome::Failed(err) => {
                warn!(
                    metric = %metric.name,
                    connection = %context.connection.name(),
                    error = %err,
                    "Poll failed"
                );
                failing = true;
            }
        }

        if !gate.finish(|| context.registry.update(&metric.name, outcome)) {
            break;
        }

        let (next, skipped) = next_due(due, every, Instant::now());
        if skipped > 0 {
            debug!(metric = %metric.name, skipped, "Skipped ticks that fell due while polling");
        }
        due = next;
    }
}

/// Next tick on the `every` grid after `now`, and how many grid points were
/// passed over while the previous poll was still running (saturating).
fn next_due(previous: Instant, every: Duration, now: Instant) -> (Instant, u32) {
    let next = previous + every;
    if next > now || every.is_zero() {
        return (next, 0);
    }
    let step = every.as_nanos();
    let behind = now.duration_since(next).as_nanos();
    let skipped = u32::try_from(behind / step + 1).unwrap_or(u32::MAX);
    let ahead = u64::try_from(step - behind % step).map_or(every, Duration::from_nanos);
    (now + ahead, skipped)
}
