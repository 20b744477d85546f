use std::sync::Arc;
use std::time::Duration;

use fluxgauge_domain::{
    BackendError, BridgeOptions, ConnectionConfig, MetricQuery, MetricValue, SetupError,
};
use fluxgauge_ports::InMemoryClient;

use crate::bridge::UNIT_ATTRIBUTE;
use crate::supervisor::{Backoff, Supervisor};
use crate::test_support::{manager, next_state, value_row, watch};

fn home_config() -> ConnectionConfig {
    ConnectionConfig::new("Home", "secret-token", "home-org")
        .with_metric(MetricQuery::new(
            "cpu_temp",
            "from(bucket: \"telegraf\") |> range(start: -5m) |> last()",
            "°C",
        ))
        .with_metric(MetricQuery::new(
            "load",
            "from(bucket: \"telegraf\") |> range(start: -5m) |> last()",
            "",
        ))
}

fn supervisor(client: &InMemoryClient) -> Supervisor {
    Supervisor::new(manager(Arc::new(client.clone())))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_backend_is_retryable() {
    let client = InMemoryClient::new();
    client.fail_ready(BackendError::Transport("connection refused".into()));
    let supervisor = supervisor(&client);

    let err = supervisor
        .setup_entry(home_config())
        .await
        .expect_err("backend down");
    assert!(matches!(err, SetupError::NotReady(_)));
    assert!(err.is_retryable());
    assert!(supervisor.entries().is_empty());

    // The failed attempt must not keep the name reserved.
    client.recover();
    supervisor
        .setup_entry(home_config())
        .await
        .expect("second attempt");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_config_is_not_retryable() {
    let client = InMemoryClient::new();
    let supervisor = supervisor(&client);

    let mut config = home_config();
    config.token.clear();
    let err = supervisor.setup_entry(config).await.expect_err("invalid");
    assert!(matches!(err, SetupError::Invalid(_)));
    assert!(!err.is_retryable());

    let duplicated = home_config().with_metric(MetricQuery::new("load", "q", ""));
    let err = supervisor
        .setup_entry(duplicated)
        .await
        .expect_err("duplicate metric");
    assert!(matches!(err, SetupError::Invalid(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_connection_name_is_rejected() {
    let client = InMemoryClient::new();
    let supervisor = supervisor(&client);

    supervisor
        .setup_entry(home_config())
        .await
        .expect("first entry");
    let err = supervisor
        .setup_entry(home_config())
        .await
        .expect_err("same name");
    assert!(matches!(err, SetupError::AlreadyConfigured(name) if name == "Home"));
    assert_eq!(supervisor.entries().len(), 1);
    supervisor.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn setup_registers_entities_and_polls() {
    let client = InMemoryClient::new();
    client.set_fallback(Ok(value_row(42.5)));
    let supervisor = supervisor(&client);

    let id = supervisor
        .setup_entry(home_config())
        .await
        .expect("setup");
    let bridge = supervisor.bridge(id).expect("bridge");

    let entities = bridge.entities();
    assert_eq!(entities.len(), 2);
    assert_eq!(entities[0].unique_id, "home_cpu_temp_sensor");
    assert_eq!(entities[0].unit.as_deref(), Some("°C"));
    assert_eq!(entities[1].unit, None);

    let (_, mut rx) = watch(bridge.registry(), "cpu_temp");
    let state = match bridge.get("cpu_temp") {
        Some(state) if state.available() => state,
        _ => next_state(&mut rx).await,
    };
    assert_eq!(state.value(), Some(&MetricValue::Float(42.5)));
    assert_eq!(
        state.attributes().get(UNIT_ATTRIBUTE).map(String::as_str),
        Some("°C")
    );
    assert!(bridge.get("load").expect("load").attributes().get(UNIT_ATTRIBUTE).is_none());
    assert!(supervisor.bridge_by_name("Home").is_some());
    supervisor.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_options_restarts_schedules() {
    let client = InMemoryClient::new();
    let supervisor = supervisor(&client);
    let mut config = home_config();
    config.options.scan_interval_secs = 3600;

    let id = supervisor.setup_entry(config).await.expect("setup");
    let bridge = supervisor.bridge(id).expect("bridge");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.queries().len(), 2);

    bridge.update_options(BridgeOptions {
        scan_interval_secs: 1800,
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bridge.options().scan_interval_secs, 1800);
    assert_eq!(client.queries().len(), 4);
    supervisor.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unload_stops_polling_but_keeps_state() {
    let client = InMemoryClient::new();
    client.set_fallback(Ok(value_row(1.5)));
    let supervisor = supervisor(&client);
    let mut config = home_config();
    config.options.scan_interval_secs = 1;

    let id = supervisor.setup_entry(config).await.expect("setup");
    let bridge = supervisor.bridge(id).expect("bridge");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(supervisor.unload_entry(id));
    assert!(!supervisor.unload_entry(id));
    assert!(supervisor.bridge(id).is_none());
    assert!(!bridge.connection().name().is_empty());

    let polled = client.queries().len();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(client.queries().len(), polled);
    assert!(bridge.get("cpu_temp").is_some());

    // The name is free again.
    supervisor
        .setup_entry(home_config())
        .await
        .expect("setup again");
    supervisor.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retry_succeeds_once_backend_is_up() {
    let client = InMemoryClient::new();
    client.fail_ready(BackendError::Status {
        status: 503,
        message: "starting".into(),
    });
    let supervisor = Arc::new(supervisor(&client));

    let task = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move {
            supervisor
                .setup_entry_with_retry(
                    home_config(),
                    Backoff::new(Duration::from_millis(10), Duration::from_millis(40)),
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(supervisor.entries().is_empty());
    client.recover();

    let id = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("retry finished")
        .expect("join")
        .expect("setup");
    assert_eq!(supervisor.entries(), vec![(id, "Home".to_string())]);
    supervisor.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_closes_pool() {
    let client = InMemoryClient::new();
    let supervisor = supervisor(&client);
    supervisor
        .setup_entry(home_config())
        .await
        .expect("setup");

    supervisor.shutdown();
    assert!(supervisor.entries().is_empty());

    let err = supervisor
        .setup_entry(home_config())
        .await
        .expect_err("pool closed");
    assert!(matches!(err, SetupError::NotReady(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bridge_forwards_updates_with_connection_name() {
    let client = InMemoryClient::new();
    client.set_fallback(Ok(value_row(3.0)));
    let connections = manager(Arc::new(client.clone()));

    let bridge = crate::bridge::Bridge::prepare(home_config(), &connections)
        .await
        .expect("prepare");
    assert!(client.queries().is_empty());
    assert_eq!(bridge.poll_state("cpu_temp"), crate::scheduler::PollState::Idle);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let listener: crate::bridge::UpdateListener =
        Arc::new(move |connection: &str, metric: &str, _state: &fluxgauge_domain::MetricState| {
            let _ = tx.send((connection.to_string(), metric.to_string()));
        });
    assert_eq!(bridge.forward_updates(&listener).len(), 2);

    bridge.start();
    let mut seen = Vec::new();
    for _ in 0..2 {
        let update = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("update in time")
            .expect("open");
        seen.push(update);
    }
    seen.sort();
    assert_eq!(
        seen,
        vec![
            ("Home".to_string(), "cpu_temp".to_string()),
            ("Home".to_string(), "load".to_string()),
        ]
    );
    bridge.unload();
    assert_eq!(bridge.poll_state("load"), crate::scheduler::PollState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bridge_setup_rejects_backend_down() {
    let client = InMemoryClient::new();
    client.fail_ready(BackendError::Unauthorized("bad token".into()));
    let connections = manager(Arc::new(client));

    let err = crate::bridge::Bridge::setup(home_config(), &connections)
        .await
        .err()
        .expect("setup fails");
    assert!(matches!(err, SetupError::NotReady(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retry_gives_up_after_shutdown() {
    let client = InMemoryClient::new();
    client.fail_ready(BackendError::Transport("connection refused".into()));
    let supervisor = Arc::new(supervisor(&client));

    let task = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move {
            supervisor
                .setup_entry_with_retry(
                    home_config(),
                    Backoff::new(Duration::from_millis(10), Duration::from_millis(20)),
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    supervisor.shutdown();
    assert!(supervisor.is_shut_down());

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("retry stopped")
        .expect("join");
    assert!(matches!(result, Err(SetupError::NotReady(_))));
}
