use crate::settings::SupervisorSettings;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use toolmesh_core::{ConnectionStatus, EventSink};
use toolmesh_transport::TransportFactory;

struct StatusEntry {
    seq: u64,
    status: ConnectionStatus,
}

/// State shared by the supervisor and its per-server actors. Each status
/// entry is written only by the actor that owns its name.
pub(crate) struct Shared {
    pub(crate) factory: Arc<TransportFactory>,
    pub(crate) events: EventSink,
    pub(crate) settings: SupervisorSettings,
    statuses: RwLock<HashMap<String, StatusEntry>>,
    next_seq: AtomicU64,
}

impl Shared {
    pub(crate) fn new(
        factory: Arc<TransportFactory>,
        events: EventSink,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            factory,
            events,
            settings,
            statuses: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Create a `connecting` entry for `name` unless one exists.
    pub(crate) fn register(&self, name: &str) {
        self.upsert(name, |_| ());
    }

    /// Apply `f` to the entry for `name`, creating it if needed.
    pub(crate) fn upsert<R>(&self, name: &str, f: impl FnOnce(&mut ConnectionStatus) -> R) -> R {
        let mut statuses = self.statuses.write();
        let entry = statuses
            .entry(name.to_string())
            .or_insert_with(|| StatusEntry {
                seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
                status: ConnectionStatus::new(name),
            });
        f(&mut entry.status)
    }

    /// Apply `f` to an existing entry only.
    pub(crate) fn modify(&self, name: &str, f: impl FnOnce(&mut ConnectionStatus)) {
        if let Some(entry) = self.statuses.write().get_mut(name) {
            f(&mut entry.status);
        }
    }

    pub(crate) fn remove(&self, name: &str) -> bool {
        self.statuses.write().remove(name).is_some()
    }

    /// Drop every entry, returning the names that were present.
    pub(crate) fn clear(&self) -> Vec<String> {
        self.statuses.write().drain().map(|(name, _)| name).collect()
    }

    pub(crate) fn get(&self, name: &str) -> Option<ConnectionStatus> {
        self.statuses.read().get(name).map(|e| e.status.clone())
    }

    /// Every entry in registration order.
    pub(crate) fn snapshot(&self) -> Vec<ConnectionStatus> {
        let statuses = self.statuses.read();
        let mut entries: Vec<&StatusEntry> = statuses.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.status.clone()).collect()
    }
}
