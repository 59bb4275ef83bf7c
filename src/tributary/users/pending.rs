use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::{debug, error};

use crate::tributary::cluster::Partition;


/// Rows a fragment is known to be missing or to hold stale, keyed by user id.
///
/// A marker is recorded whenever a fragment write could not be applied after the
/// primary committed, and removed once the Reconciler copied the row over.
#[derive(Debug, Default)]
pub struct PendingRepairs {
    rows: Mutex<BTreeMap<u64, Partition>>,
}

impl PendingRepairs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, id: u64, partition: Partition) {
        match self.rows.lock() {
            Ok(mut rows) => {
                rows.insert(id, partition);
                debug!(id, %partition, pending = rows.len(), "fragment marked behind primary");
            },
            Err(e) => error!(id, %partition, %e, "could not record pending fragment repair"),
        }
    }

    /// Remove and return every marker.
    pub fn take(&self) -> Vec<(u64, Partition)> {
        match self.rows.lock() {
            Ok(mut rows) => std::mem::take(&mut *rows).into_iter().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Drop the markers of a partition that was just fully synced.
    pub fn clear_partition(&self, partition: Partition) {
        if let Ok(mut rows) = self.rows.lock() {
            rows.retain(|_, p| *p != partition);
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.rows.lock().map(|rows| rows.contains_key(&id)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
