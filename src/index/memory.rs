use super::{Cluster, ClusterFilter, DedupStore};
use crate::error::Result;
use crate::keys::{Fingerprint, KeyRecord, SchemeTag};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Dedup store held in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    clusters: Mutex<BTreeMap<(SchemeTag, Fingerprint), Cluster>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn clusters(&self) -> MutexGuard<'_, BTreeMap<(SchemeTag, Fingerprint), Cluster>> {
        self.clusters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.clusters().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters().is_empty()
    }

    pub fn get(&self, scheme: SchemeTag, fingerprint: &Fingerprint) -> Option<Cluster> {
        self.clusters().get(&(scheme, fingerprint.clone())).cloned()
    }
}

impl DedupStore for MemoryStore {
    fn upsert_batch(&self, batch: &[KeyRecord], updated_at: DateTime<Utc>) -> Result<()> {
        let mut clusters = self.clusters();
        for record in batch {
            clusters
                .entry((record.scheme, record.fingerprint.clone()))
                .and_modify(|cluster| cluster.absorb(record, updated_at))
                .or_insert_with(|| Cluster::from_record(record, updated_at));
        }
        Ok(())
    }

    fn list_clusters(&self, scheme: SchemeTag, filter: &ClusterFilter) -> Result<Vec<Cluster>> {
        Ok(self
            .clusters()
            .values()
            .filter(|cluster| cluster.scheme == scheme && filter.matches(cluster))
            .cloned()
            .collect())
    }
}
