//! Current state of every metric and the subscribers watching them.
//!
//! The map lock is only held to find or create a metric's slot. Everything
//! after that (state mutation, notification, subscription changes) locks the
//! slot alone, so metrics never wait on one another.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use fluxgauge_domain::{MetricState, PollOutcome};

/// Invoked with the metric name and its new snapshot.
///
/// Runs synchronously inside `update`; it must not subscribe to,
/// unsubscribe from or stop the schedule of the metric it is called for.
pub type Callback = Arc<dyn Fn(&str, &MetricState) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct MetricSlot {
    state: RwLock<MetricState>,
    subscribers: RwLock<Vec<(SubscriptionId, Callback)>>,
    updating: Mutex<()>,
}

#[derive(Default)]
pub struct MetricRegistry {
    slots: RwLock<HashMap<String, Arc<MetricSlot>>>,
    next_subscription: AtomicU64,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `metric` as unavailable with the given static attributes.
    /// An existing metric keeps its state.
    pub fn register(&self, metric: &str, attributes: BTreeMap<String, String>) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.entry(metric.to_string()).or_insert_with(|| {
            Arc::new(MetricSlot {
                state: RwLock::new(MetricState::with_attributes(attributes)),
                ..MetricSlot::default()
            })
        });
    }

    /// Fold `outcome` into the metric, then notify its subscribers with the
    /// finished snapshot. Updates to one metric are applied one at a time.
    pub fn update(&self, metric: &str, outcome: PollOutcome) {
        let slot = self.slot_or_insert(metric);
        let _serial = slot.updating.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = {
            let mut state = slot.state.write().unwrap_or_else(PoisonError::into_inner);
            state.apply(&outcome);
            state.clone()
        };
        let subscribers = slot.subscribers.read().unwrap_or_else(PoisonError::into_inner);
        for (_, callback) in subscribers.iter() {
            callback(metric, &snapshot);
        }
    }

    pub fn get(&self, metric: &str) -> Option<MetricState> {
        let slot = self.slot(metric)?;
        let state = slot.state.read().unwrap_or_else(PoisonError::into_inner);
        Some(state.clone())
    }

    /// Snapshot of every metric, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, MetricState)> {
        let slots: Vec<(String, Arc<MetricSlot>)> = {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            slots
                .iter()
                .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
                .collect()
        };
        let mut states: Vec<(String, MetricState)> = slots
            .into_iter()
            .map(|(name, slot)| {
                let state = slot.state.read().unwrap_or_else(PoisonError::into_inner);
                (name, state.clone())
            })
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    pub fn metrics(&self) -> Vec<String> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = slots.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn subscribe(&self, metric: &str, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let slot = self.slot_or_insert(metric);
        slot.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback));
        id
    }

    /// Remove a subscription. Once this returns the callback is never invoked
    /// again; a notification already running is waited for.
    pub fn unsubscribe(&self, metric: &str, id: SubscriptionId) -> bool {
        let Some(slot) = self.slot(metric) else {
            return false;
        };
        let mut subscribers = slot.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self, metric: &str) -> usize {
        self.slot(metric)
            .map(|slot| {
                slot.subscribers
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len()
            })
            .unwrap_or(0)
    }

    /// Forget a metric along with its subscriptions.
    pub fn remove(&self, metric: &str) -> bool {
        let removed = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            slots.remove(metric)
        };
        match removed {
            Some(slot) => {
                slot.subscribers
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
                true
            }
            None => false,
        }
    }

    fn slot(&self, metric: &str) -> Option<Arc<MetricSlot>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(metric).cloned()
    }

    fn slot_or_insert(&self, metric: &str) -> Arc<MetricSlot> {
        if let Some(slot) = self.slot(metric) {
            return slot;
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(metric.to_string()).or_default())
    }
}
