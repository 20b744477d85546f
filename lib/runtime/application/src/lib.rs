//! Polling runtime: connection checks, query execution, metric state and
//! per-metric schedules.

pub mod bridge;
pub mod connection;
pub mod executor;
pub mod pool;
pub mod registry;
pub mod scheduler;
pub mod supervisor;

pub use bridge::{Bridge, UpdateListener};
pub use connection::{ConnectionHandle, ConnectionManager};
pub use executor::QueryExecutor;
pub use pool::{PoolError, WorkerPool};
pub use registry::{Callback, MetricRegistry, SubscriptionId};
pub use scheduler::{PollScheduler, PollState};
pub use supervisor::{Backoff, EntryId, Supervisor};

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod supervisor_test;
