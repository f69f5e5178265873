//! Incrementally maintained dedup index.
//!
//! A cluster is keyed by `(scheme, fingerprint)` and holds the set of citation
//! full ids and the set of citing-document ids seen for that key. Stores apply
//! upserts with set-union semantics so that replaying a batch, or running two
//! writers on the same fingerprint, never grows a set beyond its distinct
//! values. Clusters are never deleted here.
//!
//! Writers go through [`DedupIndex`], which buffers upserts and flushes them
//! in bounded batches.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::canonical::CanonicalFields;
use crate::error::Result;
use crate::keys::{Fingerprint, KeyRecord, SchemeTag};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A set of citations sharing one fingerprint under one scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub scheme: SchemeTag,
    pub fingerprint: Fingerprint,
    /// Citation full ids, in first-seen order, without repeats.
    pub cit_full_ids: Vec<String>,
    /// Citing-document ids, in first-seen order, without repeats.
    pub citing_docs: Vec<String>,
    /// Canonical values the fingerprint was computed from.
    pub fields: CanonicalFields,
    pub update_date: DateTime<Utc>,
}

impl Cluster {
    /// A new cluster holding a single upsert.
    pub fn from_record(record: &KeyRecord, updated_at: DateTime<Utc>) -> Self {
        Self {
            scheme: record.scheme,
            fingerprint: record.fingerprint.clone(),
            cit_full_ids: vec![record.citation_full_id.clone()],
            citing_docs: vec![record.citing_doc_id.clone()],
            fields: record.fields.clone(),
            update_date: updated_at,
        }
    }

    /// Union `record` into this cluster.
    pub fn absorb(&mut self, record: &KeyRecord, updated_at: DateTime<Utc>) {
        push_distinct(&mut self.cit_full_ids, &record.citation_full_id);
        push_distinct(&mut self.citing_docs, &record.citing_doc_id);
        self.fields = record.fields.clone();
        self.update_date = updated_at;
    }

    /// Only clusters with more than one citation are merge candidates.
    pub fn is_mergeable(&self) -> bool {
        self.cit_full_ids.len() > 1
    }
}

fn push_distinct(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

/// Selection of clusters for a merge run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterFilter {
    /// Keep clusters updated on or after this day.
    pub updated_since: Option<NaiveDate>,
}

impl ClusterFilter {
    pub fn updated_since(date: NaiveDate) -> Self {
        Self {
            updated_since: Some(date),
        }
    }

    pub fn matches(&self, cluster: &Cluster) -> bool {
        self.updated_since
            .is_none_or(|since| cluster.update_date.date_naive() >= since)
    }
}

/// Persistent mapping from `(scheme, fingerprint)` to [`Cluster`].
///
/// Implementations must make [`DedupStore::upsert_batch`] safe for concurrent
/// callers touching the same fingerprint and idempotent per record.
pub trait DedupStore: Send + Sync {
    /// Apply every record of `batch` as a set-union upsert stamped `updated_at`.
    fn upsert_batch(&self, batch: &[KeyRecord], updated_at: DateTime<Utc>) -> Result<()>;

    /// Clusters of `scheme` accepted by `filter`, ordered by fingerprint.
    fn list_clusters(&self, scheme: SchemeTag, filter: &ClusterFilter) -> Result<Vec<Cluster>>;
}

/// Counters reported by [`DedupIndex::finish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub upserts: usize,
    pub flushes: usize,
}

/// Buffered writer over a [`DedupStore`].
///
/// Upserts accumulate locally and are flushed whenever `batch_size` of them
/// are pending. [`DedupIndex::finish`] flushes the remainder; dropping the
/// writer with pending upserts loses them and logs a warning.
pub struct DedupIndex<'s, S: DedupStore + ?Sized> {
    store: &'s S,
    batch_size: usize,
    pending: Vec<KeyRecord>,
    stats: IndexStats,
}

impl<'s, S: DedupStore + ?Sized> DedupIndex<'s, S> {
    pub fn new(store: &'s S, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            batch_size,
            pending: Vec::with_capacity(batch_size),
            stats: IndexStats::default(),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn upsert(&mut self, record: KeyRecord) -> Result<()> {
        self.pending.push(record);
        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = KeyRecord>) -> Result<()> {
        for record in records {
            self.upsert(record)?;
        }
        Ok(())
    }

    /// Write every pending upsert to the store.
    ///
    /// On failure the pending batch is kept so the caller may retry.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.store.upsert_batch(&self.pending, Utc::now())?;
        self.stats.upserts += self.pending.len();
        self.stats.flushes += 1;
        tracing::debug!(
            upserts = self.pending.len(),
            flushes = self.stats.flushes,
            "flushed dedup upserts"
        );
        self.pending.clear();
        Ok(())
    }

    /// Flush the final partial batch and return the run counters.
    pub fn finish(mut self) -> Result<IndexStats> {
        self.flush()?;
        Ok(self.stats)
    }
}

impl<S: DedupStore + ?Sized> Drop for DedupIndex<'_, S> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(
                pending = self.pending.len(),
                "dedup index dropped with unflushed upserts"
            );
        }
    }
}
