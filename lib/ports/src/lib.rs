//! Seams between the polling runtime and a query backend.
//!
//! Client calls are blocking; the runtime moves them onto its worker pool.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use fluxgauge_domain::{BackendError, ConnectionConfig, Row};

pub trait QueryClient: Send + Sync {
    /// Lightweight readiness check.
    fn ready(&self) -> Result<(), BackendError>;

    /// Run `query` and return its rows in backend order.
    fn query(&self, query: &str) -> Result<Vec<Row>, BackendError>;
}

pub trait ClientFactory: Send + Sync {
    fn create(&self, config: &ConnectionConfig) -> Result<Arc<dyn QueryClient>, BackendError>;
}

/// Scripted client that replays queued responses, then repeats the fallback.
#[derive(Clone, Default)]
pub struct InMemoryClient {
    ready: Arc<Mutex<Option<BackendError>>>,
    responses: Arc<Mutex<VecDeque<Result<Vec<Row>, BackendError>>>>,
    fallback: Arc<Mutex<Option<Result<Vec<Row>, BackendError>>>>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl InMemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_ready(&self, err: BackendError) {
        if let Ok(mut guard) = self.ready.lock() {
            *guard = Some(err);
        }
    }

    /// Make `ready` succeed again.
    pub fn recover(&self) {
        if let Ok(mut guard) = self.ready.lock() {
            *guard = None;
        }
    }

    pub fn push(&self, response: Result<Vec<Row>, BackendError>) {
        if let Ok(mut guard) = self.responses.lock() {
            guard.push_back(response);
        }
    }

    pub fn set_fallback(&self, response: Result<Vec<Row>, BackendError>) {
        if let Ok(mut guard) = self.fallback.lock() {
            *guard = Some(response);
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl QueryClient for InMemoryClient {
    fn ready(&self) -> Result<(), BackendError> {
        match self.ready.lock() {
            Ok(guard) => guard.clone().map_or(Ok(()), Err),
            Err(_) => Err(BackendError::Transport("client state poisoned".into())),
        }
    }

    fn query(&self, query: &str) -> Result<Vec<Row>, BackendError> {
        if let Ok(mut guard) = self.queries.lock() {
            guard.push(query.to_string());
        }
        let queued = self
            .responses
            .lock()
            .ok()
            .and_then(|mut guard| guard.pop_front());
        if let Some(response) = queued {
            return response;
        }
        self.fallback
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Hands out the same shared client for every connection.
#[derive(Clone)]
pub struct SharedClientFactory {
    client: Arc<dyn QueryClient>,
}

impl SharedClientFactory {
    pub fn new(client: Arc<dyn QueryClient>) -> Self {
        Self { client }
    }
}

impl ClientFactory for SharedClientFactory {
    fn create(&self, _config: &ConnectionConfig) -> Result<Arc<dyn QueryClient>, BackendError> {
        Ok(Arc::clone(&self.client))
    }
}
