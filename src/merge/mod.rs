//! Merge engine.
//!
//! Each cluster read from the dedup index walks through [`ClusterState`]:
//! a cluster with a single citation stays a candidate and is skipped; an
//! eligible cluster has its search documents fetched, the smallest id chosen
//! as primary and every other document folded into it; the resulting
//! upsert, back-reference patches and deletions are staged into the current
//! [`MergeBatch`], and the batch is committed when a [`MergeSink`] accepts it.
//!
//! Ids removed during a run are remembered for the rest of the run, so a
//! document shared by two clusters is deleted once and never resurrected as a
//! primary. Until the sink applies them, primaries merged earlier in the run
//! shadow the list fields of their stale copy in the search index. Both only
//! outlive their batch once the sink has accepted it.

mod sink;

pub use sink::{ArtifactWriter, IndexSink, MergeSink};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::Cluster;
use crate::keys::{Fingerprint, SchemeTag};
use crate::search::{fetch_by_ids, CitingDocumentPatch, DeleteCommand, SearchDocument, SearchIndex};
use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use std::ops::AddAssign;

/// Lifecycle of one cluster during a merge run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    /// Read from the dedup index.
    Candidate,
    /// More than one citation id.
    Eligible,
    /// Primary chosen and secondaries merged.
    Resolved,
    /// Instructions queued in the current batch.
    Staged,
    /// Batch accepted by the sink.
    Committed,
}

fn transition(scheme: SchemeTag, fingerprint: &Fingerprint, state: ClusterState) {
    tracing::trace!(%scheme, %fingerprint, ?state, "cluster state");
}

/// One merged cluster, ready to be staged.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMerge {
    pub fingerprint: Fingerprint,
    pub primary: SearchDocument,
    pub patches: Vec<CitingDocumentPatch>,
    /// Secondary ids folded into the primary.
    pub removed: Vec<String>,
}

/// What happened to a cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// One citation id; nothing to merge.
    Single,
    /// Fewer than two documents still live in the search index.
    Stale { live: usize },
    Merged(ResolvedMerge),
}

/// Instructions flushed together, the unit of durability of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeBatch {
    pub scheme: SchemeTag,
    /// 1-based, increasing across the whole run.
    pub number: usize,
    pub clusters: Vec<Fingerprint>,
    /// Primaries to upsert.
    pub merged: Vec<SearchDocument>,
    /// Citing documents to patch.
    pub patches: Vec<CitingDocumentPatch>,
    /// Secondaries to delete, chunked to the query clause limit.
    pub deletes: Vec<DeleteCommand>,
}

/// Merged list fields of a primary, overlaid on its index copy until the
/// merge is visible in the index.
#[derive(Debug, Clone, PartialEq)]
struct MergedLists {
    document_fk: Vec<String>,
    collections: Vec<String>,
    document_fk_au: Option<Vec<String>>,
    document_fk_ta: Option<Vec<String>>,
}

impl MergedLists {
    fn of(document: &SearchDocument) -> Self {
        Self {
            document_fk: document.document_fk.clone(),
            collections: document.collections.clone(),
            document_fk_au: document.document_fk_au.clone(),
            document_fk_ta: document.document_fk_ta.clone(),
        }
    }

    fn apply_to(&self, document: &mut SearchDocument) {
        document.document_fk = self.document_fk.clone();
        document.collections = self.collections.clone();
        document.document_fk_au = self.document_fk_au.clone();
        document.document_fk_ta = self.document_fk_ta.clone();
        document.total_received = Some(document.document_fk.len().to_string());
        document.version = None;
    }
}

/// Merges staged since the last confirmed flush. Dropping it rolls the
/// engine back to that flush.
#[derive(Debug, Default)]
struct PendingBatch {
    clusters: Vec<Fingerprint>,
    merged: Vec<SearchDocument>,
    patches: Vec<CitingDocumentPatch>,
    removed: HashSet<String>,
    primaries: HashMap<String, MergedLists>,
}

impl PendingBatch {
    fn stage(&mut self, resolved: ResolvedMerge) {
        for id in resolved.removed {
            self.primaries.remove(&id);
            self.removed.insert(id);
        }
        self.primaries
            .insert(resolved.primary.id.clone(), MergedLists::of(&resolved.primary));
        self.clusters.push(resolved.fingerprint);
        self.merged.push(resolved.primary);
        self.patches.extend(resolved.patches);
    }

    fn is_empty(&self) -> bool {
        self.merged.is_empty() && self.patches.is_empty() && self.removed.is_empty()
    }
}

/// Counters for a merge run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub clusters: usize,
    pub skipped_single: usize,
    pub skipped_stale: usize,
    pub merged: usize,
    pub patches: usize,
    pub removed: usize,
    pub batches: usize,
}

impl AddAssign for MergeStats {
    fn add_assign(&mut self, other: Self) {
        self.clusters += other.clusters;
        self.skipped_single += other.skipped_single;
        self.skipped_stale += other.skipped_stale;
        self.merged += other.merged;
        self.patches += other.patches;
        self.removed += other.removed;
        self.batches += other.batches;
    }
}

/// Fold `secondaries` into `primary` and return the secondary ids.
///
/// List fields are unioned, sorted and deduplicated. The author and journal
/// lists are created on the primary the first time a secondary carries them.
/// `total_received` becomes the number of distinct citing documents and the
/// version stamp is dropped so the primary can be written back freely.
pub fn merge_documents(primary: &mut SearchDocument, secondaries: &[SearchDocument]) -> Vec<String> {
    primary.version = None;

    for secondary in secondaries {
        primary.document_fk.extend(secondary.document_fk.iter().cloned());
        primary.collections.extend(secondary.collections.iter().cloned());
        if let Some(authors) = &secondary.document_fk_au {
            primary
                .document_fk_au
                .get_or_insert_with(Vec::new)
                .extend(authors.iter().cloned());
        }
        if let Some(titles) = &secondary.document_fk_ta {
            primary
                .document_fk_ta
                .get_or_insert_with(Vec::new)
                .extend(titles.iter().cloned());
        }
    }

    sort_distinct(&mut primary.document_fk);
    sort_distinct(&mut primary.collections);
    if let Some(authors) = primary.document_fk_au.as_mut() {
        sort_distinct(authors);
    }
    if let Some(titles) = primary.document_fk_ta.as_mut() {
        sort_distinct(titles);
    }
    primary.total_received = Some(primary.document_fk.len().to_string());

    secondaries.iter().map(|s| s.id.clone()).collect()
}

fn sort_distinct(values: &mut Vec<String>) {
    values.sort();
    values.dedup();
}

/// Merges clusters against a search index, one cluster at a time.
///
/// Removed ids and merged primaries only become part of the engine state once
/// the batch holding them is accepted by the sink. A failed call leaves the
/// engine at its last confirmed flush, so the same clusters can be merged
/// again.
pub struct MergeEngine<'a, I: SearchIndex + ?Sized> {
    index: &'a I,
    max_clauses: usize,
    flush_threshold: usize,
    removed: HashSet<String>,
    primaries: HashMap<String, MergedLists>,
    batches: usize,
    stats: MergeStats,
}

impl<'a, I: SearchIndex + ?Sized> MergeEngine<'a, I> {
    pub fn new(index: &'a I, config: &Config) -> Self {
        Self {
            index,
            max_clauses: config.max_query_clauses,
            flush_threshold: config.merge_flush_threshold.max(1),
            removed: HashSet::new(),
            primaries: HashMap::new(),
            batches: 0,
            stats: MergeStats::default(),
        }
    }

    /// Ids removed by confirmed batches of this run.
    pub fn removed(&self) -> &HashSet<String> {
        &self.removed
    }

    /// Totals over every successful call to [`MergeEngine::merge_clusters`].
    pub fn stats(&self) -> MergeStats {
        self.stats
    }

    /// Resolve one cluster against the confirmed state: pick the primary,
    /// merge, and build patches. Nothing is recorded.
    pub fn resolve(&self, scheme: SchemeTag, cluster: &Cluster) -> Result<Resolution> {
        self.resolve_staged(scheme, cluster, &PendingBatch::default())
    }

    fn resolve_staged(
        &self,
        scheme: SchemeTag,
        cluster: &Cluster,
        pending: &PendingBatch,
    ) -> Result<Resolution> {
        transition(scheme, &cluster.fingerprint, ClusterState::Candidate);
        if !cluster.is_mergeable() {
            return Ok(Resolution::Single);
        }
        transition(scheme, &cluster.fingerprint, ClusterState::Eligible);

        let lookup: Vec<String> = cluster
            .cit_full_ids
            .iter()
            .unique()
            .filter(|id| !self.removed.contains(*id) && !pending.removed.contains(*id))
            .cloned()
            .collect();
        let mut documents = fetch_by_ids(self.index, &lookup, self.max_clauses)?;
        for document in &mut documents {
            if let Some(lists) = pending
                .primaries
                .get(&document.id)
                .or_else(|| self.primaries.get(&document.id))
            {
                lists.apply_to(document);
            }
        }

        if documents.len() < 2 {
            tracing::warn!(
                %scheme,
                fingerprint = %cluster.fingerprint,
                ids = cluster.cit_full_ids.len(),
                live = documents.len(),
                "fewer than two live documents, skipping cluster"
            );
            return Ok(Resolution::Stale {
                live: documents.len(),
            });
        }

        documents.sort_by(|a, b| a.id.cmp(&b.id));
        let mut primary = documents.remove(0);
        let removed = merge_documents(&mut primary, &documents);
        transition(scheme, &cluster.fingerprint, ClusterState::Resolved);

        let targets: Vec<String> = cluster
            .citing_docs
            .iter()
            .chain(documents.iter().flat_map(|d| d.document_fk.iter()))
            .unique()
            .cloned()
            .collect();
        let patches = fetch_by_ids(self.index, &targets, self.max_clauses)?
            .into_iter()
            .map(|citing| CitingDocumentPatch::new(citing.id, removed.clone(), primary.id.clone()))
            .collect();

        tracing::debug!(
            %scheme,
            fingerprint = %cluster.fingerprint,
            primary = %primary.id,
            removed = removed.len(),
            "merged cluster"
        );
        Ok(Resolution::Merged(ResolvedMerge {
            fingerprint: cluster.fingerprint.clone(),
            primary,
            patches,
            removed,
        }))
    }

    /// Merge every cluster of `scheme` and hand the batches to `sink`.
    ///
    /// A batch is flushed once it holds `merge_flush_threshold` merges, and
    /// the remainder at the end. A sink failure aborts the call with
    /// [`Error::Flush`]; batches flushed before it stay valid and the merges
    /// of the failed batch are forgotten, so calling again with the same
    /// clusters resumes from the last confirmed batch.
    pub fn merge_clusters<S: MergeSink + ?Sized>(
        &mut self,
        scheme: SchemeTag,
        clusters: impl IntoIterator<Item = Cluster>,
        sink: &mut S,
    ) -> Result<MergeStats> {
        let mut stats = MergeStats::default();
        let mut pending = PendingBatch::default();

        for cluster in clusters {
            stats.clusters += 1;
            match self.resolve_staged(scheme, &cluster, &pending)? {
                Resolution::Single => stats.skipped_single += 1,
                Resolution::Stale { .. } => stats.skipped_stale += 1,
                Resolution::Merged(resolved) => {
                    stats.merged += 1;
                    stats.patches += resolved.patches.len();
                    stats.removed += resolved.removed.len();
                    pending.stage(resolved);
                    transition(scheme, &cluster.fingerprint, ClusterState::Staged);
                }
            }

            if pending.merged.len() >= self.flush_threshold {
                self.flush(scheme, std::mem::take(&mut pending), sink)?;
                stats.batches += 1;
            }
        }
        if !pending.is_empty() {
            self.flush(scheme, pending, sink)?;
            stats.batches += 1;
        }

        tracing::info!(
            %scheme,
            clusters = stats.clusters,
            merged = stats.merged,
            skipped_single = stats.skipped_single,
            skipped_stale = stats.skipped_stale,
            removed = stats.removed,
            batches = stats.batches,
            "merge finished"
        );
        self.stats += stats;
        Ok(stats)
    }

    fn flush<S: MergeSink + ?Sized>(
        &mut self,
        scheme: SchemeTag,
        pending: PendingBatch,
        sink: &mut S,
    ) -> Result<()> {
        let number = self.batches + 1;
        let removals: Vec<String> = pending.removed.iter().cloned().sorted().collect();

        let batch = MergeBatch {
            scheme,
            number,
            clusters: pending.clusters,
            merged: pending.merged,
            patches: pending.patches,
            deletes: DeleteCommand::chunked(&removals, self.max_clauses),
        };
        sink.write_batch(&batch)
            .map_err(|source| Error::flush(number, source))?;
        self.batches = number;

        for id in pending.removed {
            self.primaries.remove(&id);
            self.removed.insert(id);
        }
        // the index holds the merged primaries now
        if sink.applies_to_index() {
            self.primaries.clear();
        } else {
            self.primaries.extend(pending.primaries);
        }

        for fingerprint in &batch.clusters {
            transition(scheme, fingerprint, ClusterState::Committed);
        }
        tracing::info!(
            %scheme,
            batch = number,
            merged = batch.merged.len(),
            patches = batch.patches.len(),
            deletes = batch.deletes.len(),
            "flushed merge batch"
        );
        Ok(())
    }
}
