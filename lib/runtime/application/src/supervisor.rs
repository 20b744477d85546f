//! Registry of configured connections and their setup/unload lifecycle.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use fluxgauge_domain::{ConfigError, ConnectionConfig, SetupError};

use crate::bridge::{Bridge, UpdateListener};
use crate::connection::ConnectionManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(Uuid);

impl EntryId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Exponential retry delay between failed setup attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to `max`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[derive(Default)]
struct Entries {
    bridges: HashMap<EntryId, Arc<Bridge>>,
    pending: HashSet<String>,
}

impl Entries {
    fn name_taken(&self, name: &str) -> bool {
        self.pending.contains(name) || self.bridges.values().any(|bridge| bridge.name() == name)
    }
}

/// Holds a connection name while its setup is in flight, so a concurrent
/// setup with the same name is rejected. Released on drop.
struct Reservation<'a> {
    supervisor: &'a Supervisor,
    name: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.supervisor.lock().pending.remove(&self.name);
    }
}

pub struct Supervisor {
    connections: ConnectionManager,
    entries: Mutex<Entries>,
    listener: Option<UpdateListener>,
}

impl Supervisor {
    pub fn new(connections: ConnectionManager) -> Self {
        Self {
            connections,
            entries: Mutex::new(Entries::default()),
            listener: None,
        }
    }

    /// Forward every metric update of every entry set up from now on.
    pub fn with_listener(mut self, listener: UpdateListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Bring up one connection. Connection names are unique across entries.
    pub async fn setup_entry(&self, config: ConnectionConfig) -> Result<EntryId, SetupError> {
        config.validate().map_err(ConfigError::from)?;
        let name = config.name.clone();
        let _reservation = self.reserve(&name)?;

        let bridge = Bridge::prepare(config, &self.connections).await?;
        if let Some(listener) = &self.listener {
            bridge.forward_updates(listener);
        }
        bridge.start();
        let id = EntryId::new();
        self.lock().bridges.insert(id, Arc::new(bridge));
        info!(connection = %name, entry = %id, "Entry set up");
        Ok(id)
    }

    /// Like `setup_entry`, but keeps retrying while the backend is not ready.
    /// Other errors, and any error once `shutdown` has run, are returned at
    /// once.
    pub async fn setup_entry_with_retry(
        &self,
        config: ConnectionConfig,
        mut backoff: Backoff,
    ) -> Result<EntryId, SetupError> {
        loop {
            match self.setup_entry(config.clone()).await {
                Err(err) if err.is_retryable() && !self.is_shut_down() => {
                    let delay = backoff.next_delay();
                    warn!(
                        connection = %config.name,
                        error = %err,
                        retry_in = ?delay,
                        "Setup failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Stop and forget an entry.
    pub fn unload_entry(&self, id: EntryId) -> bool {
        let removed = self.lock().bridges.remove(&id);
        match removed {
            Some(bridge) => {
                bridge.unload();
                info!(connection = %bridge.name(), entry = %id, "Entry unloaded");
                true
            }
            None => false,
        }
    }

    pub fn bridge(&self, id: EntryId) -> Option<Arc<Bridge>> {
        self.lock().bridges.get(&id).cloned()
    }

    pub fn bridge_by_name(&self, name: &str) -> Option<Arc<Bridge>> {
        self.lock()
            .bridges
            .values()
            .find(|bridge| bridge.name() == name)
            .cloned()
    }

    pub fn entries(&self) -> Vec<(EntryId, String)> {
        let entries = self.lock();
        let mut listed: Vec<(EntryId, String)> = entries
            .bridges
            .iter()
            .map(|(id, bridge)| (*id, bridge.name().to_string()))
            .collect();
        listed.sort_by(|a, b| a.1.cmp(&b.1));
        listed
    }

    /// Unload every entry and refuse further backend work.
    pub fn shutdown(&self) {
        let bridges: Vec<(EntryId, Arc<Bridge>)> = self.lock().bridges.drain().collect();
        for (_, bridge) in bridges {
            bridge.unload();
        }
        self.connections.pool().close();
        info!("Supervisor shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.connections.pool().is_closed()
    }

    fn reserve(&self, name: &str) -> Result<Reservation<'_>, SetupError> {
        let mut entries = self.lock();
        if entries.name_taken(name) {
            return Err(SetupError::AlreadyConfigured(name.to_string()));
        }
        entries.pending.insert(name.to_string());
        Ok(Reservation {
            supervisor: self,
            name: name.to_string(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_max() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn backoff_max_never_below_initial() {
        let mut backoff = Backoff::new(Duration::from_secs(3), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
    }
}
