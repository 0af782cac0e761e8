//! Versioned snapshot cache with a per-pin scan guard.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use arbor_core::types::{ObservedSnapshot, PinId};
use tracing::debug;

use crate::persistence::{PersistenceError, SqliteStore};

pub type SharedStore = Arc<Mutex<SqliteStore>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedSnapshot {
    Ready {
        snapshot: Arc<ObservedSnapshot>,
        version: u64,
    },
    NotScanned,
}

/// Proof that a scan of `pin_id` is running. Dropping it releases the guard.
#[derive(Debug)]
pub struct ScanTicket {
    pin_id: PinId,
    scanning: Arc<Mutex<HashSet<PinId>>>,
}

impl ScanTicket {
    pub fn pin_id(&self) -> PinId {
        self.pin_id
    }
}

impl Drop for ScanTicket {
    fn drop(&mut self) {
        lock(&self.scanning).remove(&self.pin_id);
    }
}

pub struct SnapshotCache {
    store: SharedStore,
    entries: RwLock<HashMap<PinId, (Arc<ObservedSnapshot>, u64)>>,
    scanning: Arc<Mutex<HashSet<PinId>>>,
}

impl SnapshotCache {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
            scanning: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Claims the scan guard for `pin_id`. `None` when a scan is already running.
    pub fn start_scan(&self, pin_id: PinId) -> Option<ScanTicket> {
        if !lock(&self.scanning).insert(pin_id) {
            debug!(%pin_id, "scan already running");
            return None;
        }
        Some(ScanTicket {
            pin_id,
            scanning: Arc::clone(&self.scanning),
        })
    }

    pub fn is_scanning(&self, pin_id: PinId) -> bool {
        lock(&self.scanning).contains(&pin_id)
    }

    /// Persists the snapshot, publishes it to readers and releases the guard.
    pub fn finish_scan(
        &self,
        ticket: ScanTicket,
        snapshot: ObservedSnapshot,
    ) -> Result<u64, PersistenceError> {
        let version = lock(&self.store).store_snapshot(ticket.pin_id, &snapshot)?;
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let newer_cached = entries
            .get(&ticket.pin_id)
            .is_some_and(|(_, cached)| *cached > version);
        if !newer_cached {
            entries.insert(ticket.pin_id, (Arc::new(snapshot), version));
        }
        drop(entries);
        drop(ticket);
        Ok(version)
    }

    /// Releases the guard and keeps whatever was cached before.
    pub fn abandon_scan(&self, ticket: ScanTicket) {
        debug!(pin_id = %ticket.pin_id, "scan abandoned");
        drop(ticket);
    }

    pub fn read(&self, pin_id: PinId) -> Result<CachedSnapshot, PersistenceError> {
        {
            let entries = match self.entries.read() {
                Ok(entries) => entries,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some((snapshot, version)) = entries.get(&pin_id) {
                return Ok(CachedSnapshot::Ready {
                    snapshot: Arc::clone(snapshot),
                    version: *version,
                });
            }
        }

        let loaded = lock(&self.store).load_snapshot(pin_id)?;
        let Some((snapshot, version)) = loaded else {
            return Ok(CachedSnapshot::NotScanned);
        };
        let snapshot = Arc::new(snapshot);
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (snapshot, version) = entries
            .entry(pin_id)
            .or_insert((snapshot, version))
            .clone();
        Ok(CachedSnapshot::Ready { snapshot, version })
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
