use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use fluxgauge_domain::{BridgeOptions, ConnectionConfig, EntityDescriptor, MetricState, SetupError};

use crate::connection::{ConnectionHandle, ConnectionManager};
use crate::executor::QueryExecutor;
use crate::registry::{Callback, MetricRegistry, SubscriptionId};
use crate::scheduler::{PollScheduler, PollState};

/// Attribute carrying a metric's unit, set at registration.
pub const UNIT_ATTRIBUTE: &str = "unit_of_measurement";

/// Receives `(connection, metric, state)` for every update of a bridge.
pub type UpdateListener = Arc<dyn Fn(&str, &str, &MetricState) + Send + Sync>;

/// One configured connection brought up: its checked client, the metric
/// states and the schedules that feed them.
pub struct Bridge {
    config: ConnectionConfig,
    options: Mutex<BridgeOptions>,
    connection: ConnectionHandle,
    registry: Arc<MetricRegistry>,
    scheduler: PollScheduler,
}

impl Bridge {
    /// Connect, register every metric and start polling.
    ///
    /// A backend that is not reachable yet yields `SetupError::NotReady`.
    pub async fn setup(
        config: ConnectionConfig,
        connections: &ConnectionManager,
    ) -> Result<Self, SetupError> {
        let bridge = Self::prepare(config, connections).await?;
        bridge.start();
        Ok(bridge)
    }

    /// Connect and register every metric without polling yet, so that
    /// subscribers attached before `start` see the first result.
    pub async fn prepare(
        config: ConnectionConfig,
        connections: &ConnectionManager,
    ) -> Result<Self, SetupError> {
        config.check_unique_metrics()?;
        let connection = connections.connect(&config).await?;
        let registry = Arc::new(MetricRegistry::new());
        let executor = QueryExecutor::new(connections.pool().clone());
        let scheduler = PollScheduler::new(connection.clone(), executor, Arc::clone(&registry));

        for metric in &config.metrics {
            let mut attributes = BTreeMap::new();
            if !metric.unit.is_empty() {
                attributes.insert(UNIT_ATTRIBUTE.to_string(), metric.unit.clone());
            }
            registry.register(&metric.name, attributes);
        }

        Ok(Self {
            options: Mutex::new(config.options),
            config,
            connection,
            registry,
            scheduler,
        })
    }

    /// Start one schedule per metric.
    pub fn start(&self) {
        self.start_all();
        info!(
            connection = %self.config.name,
            metrics = self.config.metrics.len(),
            "Bridge ready"
        );
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn options(&self) -> BridgeOptions {
        *self.options.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn entities(&self) -> Vec<EntityDescriptor> {
        self.config
            .metrics
            .iter()
            .map(|metric| EntityDescriptor::for_metric(&self.config, metric))
            .collect()
    }

    pub fn get(&self, metric: &str) -> Option<MetricState> {
        self.registry.get(metric)
    }

    pub fn subscribe(&self, metric: &str, callback: Callback) -> SubscriptionId {
        self.registry.subscribe(metric, callback)
    }

    pub fn unsubscribe(&self, metric: &str, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(metric, id)
    }

    /// Subscribe `listener` to every configured metric.
    pub fn forward_updates(&self, listener: &UpdateListener) -> Vec<SubscriptionId> {
        self.config
            .metrics
            .iter()
            .map(|metric| {
                let listener = Arc::clone(listener);
                let connection = self.config.name.clone();
                let callback: Callback = Arc::new(move |metric: &str, state: &MetricState| {
                    listener(&connection, metric, state)
                });
                self.registry.subscribe(&metric.name, callback)
            })
            .collect()
    }

    pub fn poll_state(&self, metric: &str) -> PollState {
        self.scheduler.state(metric)
    }

    /// Apply new options and restart every schedule with them.
    pub fn update_options(&self, options: BridgeOptions) {
        *self.options.lock().unwrap_or_else(PoisonError::into_inner) = options;
        info!(
            connection = %self.config.name,
            scan_interval_secs = options.scan_interval_secs,
            "Options updated"
        );
        self.start_all();
    }

    /// Stop every schedule. Metric states stay readable.
    pub fn unload(&self) {
        self.scheduler.stop_all();
        info!(connection = %self.config.name, "Bridge unloaded");
    }

    fn start_all(&self) {
        let options = self.options();
        for metric in &self.config.metrics {
            self.scheduler
                .start(metric.clone(), options.interval_for(metric));
        }
    }
}
