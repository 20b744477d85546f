use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use fluxgauge_domain::{BackendError, MetricState, Row};
use fluxgauge_ports::{QueryClient, SharedClientFactory};

use crate::connection::{ConnectionHandle, ConnectionManager};
use crate::pool::WorkerPool;
use crate::registry::{Callback, MetricRegistry};

/// Client that sleeps before answering and records peak concurrency.
pub struct SlowClient {
    delay: Duration,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    pub calls: AtomicUsize,
    response: Mutex<Result<Vec<Row>, BackendError>>,
}

impl SlowClient {
    pub fn new(delay: Duration, response: Result<Vec<Row>, BackendError>) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            response: Mutex::new(response),
        }
    }
}

impl QueryClient for SlowClient {
    fn ready(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn query(&self, _query: &str) -> Result<Vec<Row>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.response.lock().expect("response lock").clone()
    }
}

pub fn pool() -> WorkerPool {
    WorkerPool::new(4, Duration::from_secs(5))
}

pub fn manager(client: Arc<dyn QueryClient>) -> ConnectionManager {
    ConnectionManager::new(Arc::new(SharedClientFactory::new(client)), pool())
}

pub async fn handle(client: Arc<dyn QueryClient>) -> ConnectionHandle {
    let config = fluxgauge_domain::ConnectionConfig::new("test", "token", "org");
    manager(client).connect(&config).await.expect("connect")
}

pub fn value_row(value: f64) -> Vec<Row> {
    vec![Row::new().with("_value", value).with("result", "_result")]
}

/// Forward every notification for `metric` into a channel.
pub fn watch(
    registry: &MetricRegistry,
    metric: &str,
) -> (crate::registry::SubscriptionId, mpsc::UnboundedReceiver<MetricState>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: Callback = Arc::new(move |_name: &str, state: &MetricState| {
        let _ = tx.send(state.clone());
    });
    (registry.subscribe(metric, callback), rx)
}

pub async fn next_state(rx: &mut mpsc::UnboundedReceiver<MetricState>) -> MetricState {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("notification in time")
        .expect("channel open")
}

/// Formatted log output of the current thread, for asserting on events.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Capture everything down to DEBUG until the guard drops. Thread-local,
    /// so async tests using it run on a current-thread runtime.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .without_time()
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn lines(&self) -> Vec<String> {
        let buffer = self.0.lock().expect("log buffer");
        String::from_utf8_lossy(&buffer)
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn count(&self, level: &str, message: &str) -> usize {
        self.lines()
            .iter()
            .filter(|line| line.contains(level) && line.contains(message))
            .count()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
