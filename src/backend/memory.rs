//! In-memory backend.
//!
//! Serves a fixed seed list and keeps the last written copy of every
//! record, so a later `load` observes earlier writes.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{BackendKind, RemoteChange, Result, SyncBackend};
use crate::signal::{Intersection, IntersectionId, IntersectionRecord};

/// Seed-list backend with no remote peers.
#[derive(Debug)]
pub struct MemoryBackend {
    order: Vec<IntersectionId>,
    records: DashMap<IntersectionId, IntersectionRecord>,
    writes: AtomicU64,
}

impl MemoryBackend {
    /// Creates a backend serving `seeds` in the given order.
    #[must_use]
    pub fn new(seeds: Vec<Intersection>) -> Self {
        let records = DashMap::with_capacity(seeds.len());
        let mut order = Vec::with_capacity(seeds.len());
        for seed in seeds {
            if records.insert(seed.id.clone(), seed.record).is_none() {
                order.push(seed.id);
            }
        }
        Self {
            order,
            records,
            writes: AtomicU64::new(0),
        }
    }

    /// Number of writes received so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns the last written (or seeded) copy of a record.
    #[must_use]
    pub fn get(&self, id: &IntersectionId) -> Option<IntersectionRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }
}

#[async_trait]
impl SyncBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn load(&self) -> Result<Vec<Intersection>> {
        Ok(self
            .order
            .iter()
            .filter_map(|id| {
                self.records.get(id).map(|r| Intersection {
                    id: id.clone(),
                    record: r.value().clone(),
                })
            })
            .collect())
    }

    async fn write(&self, item: &Intersection) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.records.insert(item.id.clone(), item.record.clone());
        Ok(())
    }

    async fn subscribe(
        &self,
        _cancel: CancellationToken,
    ) -> Result<Option<mpsc::Receiver<RemoteChange>>> {
        Ok(None)
    }
}
