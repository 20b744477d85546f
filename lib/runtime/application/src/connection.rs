use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use fluxgauge_domain::{BackendError, ConnectionConfig, ConnectionError};
use fluxgauge_ports::{ClientFactory, QueryClient};

use crate::pool::{PoolError, WorkerPool};

/// A checked, reusable client for one configured connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    name: String,
    endpoint: String,
    client: Arc<dyn QueryClient>,
}

impl ConnectionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn client(&self) -> Arc<dyn QueryClient> {
        Arc::clone(&self.client)
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

enum SetupStage {
    Create(BackendError),
    Ready(BackendError),
}

#[derive(Clone)]
pub struct ConnectionManager {
    factory: Arc<dyn ClientFactory>,
    pool: WorkerPool,
}

impl ConnectionManager {
    pub fn new(factory: Arc<dyn ClientFactory>, pool: WorkerPool) -> Self {
        Self { factory, pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Build a client and run one readiness check on the worker pool.
    ///
    /// The handle is never reconnected; call `connect` again to retry.
    pub async fn connect(&self, config: &ConnectionConfig) -> Result<ConnectionHandle, ConnectionError> {
        let endpoint = config.endpoint();
        debug!(connection = %config.name, %endpoint, "Connecting");

        let factory = Arc::clone(&self.factory);
        let job_config = config.clone();
        let result = self
            .pool
            .run(move || {
                let client = factory.create(&job_config).map_err(SetupStage::Create)?;
                client.ready().map_err(SetupStage::Ready)?;
                Ok::<_, SetupStage>(client)
            })
            .await;

        let client = match result {
            Ok(Ok(client)) => client,
            Ok(Err(SetupStage::Create(err))) => {
                return Err(ConnectionError::Client {
                    endpoint,
                    reason: err.to_string(),
                });
            }
            Ok(Err(SetupStage::Ready(err))) => {
                let err = ConnectionError::from_backend(&endpoint, err);
                warn!(connection = %config.name, error = %err, "Backend not ready");
                return Err(err);
            }
            Err(PoolError::Timeout(after)) => {
                warn!(connection = %config.name, %endpoint, ?after, "Readiness check timed out");
                return Err(ConnectionError::Timeout { endpoint, after });
            }
            Err(PoolError::Closed) => return Err(ConnectionError::PoolClosed),
        };

        info!(connection = %config.name, %endpoint, "Connected");
        Ok(ConnectionHandle {
            name: config.name.clone(),
            endpoint,
            client,
        })
    }
}
