//! Domain models and invariants.

pub mod config;
pub mod entity;
pub mod error;
pub mod metrics;

pub use config::{
    BridgeOptions, ConnectionConfig, FluxgaugeConfig, MetricQuery, RuntimeConfig,
    DEFAULT_HOST, DEFAULT_NAME, DEFAULT_PORT, DEFAULT_QUERY, DEFAULT_SCAN_INTERVAL_SECS,
    DEFAULT_VALUE_FIELD,
};
pub use entity::{EntityDescriptor, slugify};
pub use error::{BackendError, ConfigError, ConnectionError, QueryError, SetupError};
pub use metrics::{MetricState, MetricValue, PollOutcome, QueryOutcome, Row, ScalarResult};
