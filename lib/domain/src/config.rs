use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::ConfigError;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8086;
pub const DEFAULT_NAME: &str = "InfluxDB";
pub const DEFAULT_QUERY: &str = r#"from(bucket: "telegraf") |> range(start: -1h) |> last()"#;
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_VALUE_FIELD: &str = "_value";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct FluxgaugeConfig {
    #[serde(default)]
    #[validate(nested)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    #[validate(nested)]
    pub connections: Vec<ConnectionConfig>,
}

impl FluxgaugeConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        config.check_unique_names()?;
        Ok(config)
    }

    fn check_unique_names(&self) -> Result<(), ConfigError> {
        let mut connections = HashSet::new();
        for connection in &self.connections {
            if !connections.insert(connection.name.as_str()) {
                return Err(ConfigError::DuplicateConnection(connection.name.clone()));
            }
            connection.check_unique_metrics()?;
        }
        Ok(())
    }
}

/// Process-wide knobs shared by every connection.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on concurrently executing backend calls.
    #[validate(range(min = 1, max = 256))]
    pub worker_threads: usize,
    #[validate(range(min = 1, max = 600))]
    pub query_timeout_secs: u64,
    #[validate(range(min = 1))]
    pub retry_initial_secs: u64,
    #[validate(range(min = 1))]
    pub retry_max_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            query_timeout_secs: 15,
            retry_initial_secs: 5,
            retry_max_secs: 300,
        }
    }
}

impl RuntimeConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

/// User-editable options of a connection, applied without reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BridgeOptions {
    #[validate(range(min = 1))]
    pub scan_interval_secs: u64,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
        }
    }
}

impl BridgeOptions {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// A metric's own interval wins over the connection-wide one.
    pub fn interval_for(&self, metric: &MetricQuery) -> Duration {
        metric
            .scan_interval_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.scan_interval())
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ConnectionConfig {
    #[serde(default = "default_name")]
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default = "default_host")]
    #[validate(length(min = 1))]
    pub host: String,
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
    #[validate(length(min = 1))]
    pub token: String,
    #[validate(length(min = 1))]
    pub org: String,
    #[serde(default)]
    #[validate(nested)]
    pub options: BridgeOptions,
    #[serde(default)]
    #[validate(nested)]
    pub metrics: Vec<MetricQuery>,
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl ConnectionConfig {
    pub fn new(name: impl Into<String>, token: impl Into<String>, org: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: default_host(),
            port: DEFAULT_PORT,
            ssl: false,
            token: token.into(),
            org: org.into(),
            options: BridgeOptions::default(),
            metrics: Vec::new(),
        }
    }

    pub fn with_metric(mut self, metric: MetricQuery) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn endpoint(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Effective poll interval for one metric of this connection.
    pub fn interval_for(&self, metric: &MetricQuery) -> Duration {
        self.options.interval_for(metric)
    }

    pub fn check_unique_metrics(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for metric in &self.metrics {
            if !seen.insert(metric.name.as_str()) {
                return Err(ConfigError::DuplicateMetric {
                    connection: self.name.clone(),
                    metric: metric.name.clone(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint())
            .field("token", &"<redacted>")
            .field("org", &self.org)
            .field("options", &self.options)
            .field("metrics", &self.metrics)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct MetricQuery {
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default = "default_query")]
    #[validate(length(min = 1))]
    pub query: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default = "default_value_field")]
    #[validate(length(min = 1))]
    pub value_field: String,
    #[serde(default)]
    #[validate(range(min = 1))]
    pub scan_interval_secs: Option<u64>,
}

fn default_query() -> String {
    DEFAULT_QUERY.to_string()
}

fn default_value_field() -> String {
    DEFAULT_VALUE_FIELD.to_string()
}

impl MetricQuery {
    pub fn new(name: impl Into<String>, query: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            unit: unit.into(),
            value_field: default_value_field(),
            scan_interval_secs: None,
        }
    }
}
