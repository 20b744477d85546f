//! Wiring for the `run` and `check` commands.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use fluxgauge_application::{
    Backoff, ConnectionManager, QueryExecutor, Supervisor, UpdateListener, WorkerPool,
};
use fluxgauge_domain::{ConnectionConfig, FluxgaugeConfig, MetricState, QueryOutcome, RuntimeConfig};
use fluxgauge_ports::ClientFactory;

pub fn connection_manager(runtime: &RuntimeConfig, factory: Arc<dyn ClientFactory>) -> ConnectionManager {
    let pool = WorkerPool::new(runtime.worker_threads, runtime.query_timeout());
    ConnectionManager::new(factory, pool)
}

pub fn setup_backoff(runtime: &RuntimeConfig) -> Backoff {
    Backoff::new(
        Duration::from_secs(runtime.retry_initial_secs),
        Duration::from_secs(runtime.retry_max_secs),
    )
}

/// Prints every update as one JSON line on stdout.
pub fn stdout_sink() -> UpdateListener {
    Arc::new(|connection: &str, metric: &str, state: &MetricState| {
        let line = json!({ "connection": connection, "metric": metric, "state": state });
        println!("{line}");
    })
}

/// Bring up every connection (retrying those whose backend is not ready),
/// poll until `shutdown` resolves, then unload everything.
pub async fn run<F>(
    config: FluxgaugeConfig,
    factory: Arc<dyn ClientFactory>,
    sink: Option<UpdateListener>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let mut supervisor = Supervisor::new(connection_manager(&config.runtime, factory));
    if let Some(sink) = sink {
        supervisor = supervisor.with_listener(sink);
    }
    let supervisor = Arc::new(supervisor);
    let mut setups = JoinSet::new();

    for connection in config.connections {
        let supervisor = Arc::clone(&supervisor);
        let backoff = setup_backoff(&config.runtime);
        setups.spawn(async move {
            let name = connection.name.clone();
            if let Err(err) = supervisor.setup_entry_with_retry(connection, backoff).await {
                error!(connection = %name, error = %err, "Connection setup abandoned");
            }
        });
    }

    info!("Polling; waiting for shutdown");
    shutdown.await;

    setups.abort_all();
    while let Some(joined) = setups.join_next().await {
        if let Err(err) = joined {
            if !err.is_cancelled() {
                warn!(error = %err, "Setup task failed");
            }
        }
    }
    supervisor.shutdown();
    Ok(())
}

/// Connect to every configured backend once and run each query once.
/// Failures are reported per connection and per metric, never returned.
pub async fn check(config: &FluxgaugeConfig, factory: Arc<dyn ClientFactory>) -> Vec<Value> {
    let connections = connection_manager(&config.runtime, factory);
    let executor = QueryExecutor::new(connections.pool().clone());
    let mut reports = Vec::with_capacity(config.connections.len());

    for connection in &config.connections {
        reports.push(check_connection(connection, &connections, &executor).await);
    }
    connections.pool().close();
    reports
}

async fn check_connection(
    config: &ConnectionConfig,
    connections: &ConnectionManager,
    executor: &QueryExecutor,
) -> Value {
    let handle = match connections.connect(config).await {
        Ok(handle) => handle,
        Err(err) => {
            return json!({
                "connection": config.name,
                "endpoint": config.endpoint(),
                "ready": false,
                "error": err.to_string(),
            });
        }
    };

    let mut metrics = Vec::with_capacity(config.metrics.len());
    for metric in &config.metrics {
        let report = match executor.run(&handle, metric).await {
            Ok(QueryOutcome::Scalar(scalar)) => json!({
                "metric": metric.name,
                "value": scalar.value,
                "attributes": scalar.attributes,
            }),
            Ok(QueryOutcome::NoData) => json!({ "metric": metric.name, "value": null }),
            Err(err) => json!({ "metric": metric.name, "error": err.to_string() }),
        };
        metrics.push(report);
    }

    json!({
        "connection": config.name,
        "endpoint": handle.endpoint(),
        "ready": true,
        "metrics": metrics,
    })
}
