use super::MergeBatch;
use crate::error::Result;
use crate::search::SearchIndex;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Destination of flushed merge batches.
pub trait MergeSink {
    /// Persist or apply one batch. An error means the batch is not durable.
    fn write_batch(&mut self, batch: &MergeBatch) -> Result<()>;

    /// Whether an accepted batch is already visible in the search index the
    /// engine reads from.
    fn applies_to_index(&self) -> bool {
        false
    }

    /// Called once after the last batch of the run.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes every batch as JSON artifacts for later application.
///
/// A batch produces `<scheme>-<run>-<batch>-0_cits_for_merging.json` (merged
/// primaries), `...-1_docs_for_updating.json` (citing-document patches) and
/// one `...-2_cits_for_removing_<n>.json` per delete command. Files are
/// written and synced under a temporary name, then renamed once every file of
/// the batch is on disk. `0_cits_for_merging` is renamed last, so its presence
/// marks a complete batch. The directory is synced after the renames.
#[derive(Debug)]
pub struct ArtifactWriter {
    out_dir: PathBuf,
    run: String,
    written: Vec<PathBuf>,
}

impl ArtifactWriter {
    pub fn new(out_dir: impl AsRef<Path>, started: DateTime<Utc>) -> Result<Self> {
        let out_dir = out_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&out_dir)?;
        Ok(Self {
            out_dir,
            run: started.format("%Y%m%dT%H%M%S%.3fZ").to_string(),
            written: Vec::new(),
        })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Artifacts written so far, in write order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl MergeSink for ArtifactWriter {
    fn write_batch(&mut self, batch: &MergeBatch) -> Result<()> {
        let prefix = format!("{}-{}-{:04}", batch.scheme, self.run, batch.number);

        let mut files = vec![
            (
                format!("{prefix}-0_cits_for_merging.json"),
                serde_json::to_vec(&batch.merged)?,
            ),
            (
                format!("{prefix}-1_docs_for_updating.json"),
                serde_json::to_vec(&batch.patches)?,
            ),
        ];
        for (n, command) in batch.deletes.iter().enumerate() {
            files.push((
                format!("{prefix}-2_cits_for_removing_{n}.json"),
                serde_json::to_vec(command)?,
            ));
        }

        let mut staged = Vec::with_capacity(files.len());
        for (name, body) in files {
            let tmp = self.out_dir.join(format!(".{name}.tmp"));
            let mut file = File::create(&tmp)?;
            file.write_all(&body)?;
            file.sync_all()?;
            staged.push((tmp, self.out_dir.join(name)));
        }
        for (tmp, path) in staged.iter().rev() {
            std::fs::rename(tmp, path)?;
        }
        sync_dir(&self.out_dir)?;
        self.written.extend(staged.into_iter().map(|(_, path)| path));

        tracing::debug!(
            batch = batch.number,
            dir = %self.out_dir.display(),
            files = 2 + batch.deletes.len(),
            "wrote merge artifacts"
        );
        Ok(())
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

// directories cannot be opened as files here
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Applies every batch directly to a search index and commits at the end.
pub struct IndexSink<'a, I: SearchIndex + ?Sized> {
    index: &'a I,
}

impl<'a, I: SearchIndex + ?Sized> IndexSink<'a, I> {
    pub fn new(index: &'a I) -> Self {
        Self { index }
    }
}

impl<I: SearchIndex + ?Sized> MergeSink for IndexSink<'_, I> {
    fn write_batch(&mut self, batch: &MergeBatch) -> Result<()> {
        self.index.upsert(&batch.merged)?;
        self.index.patch(&batch.patches)?;
        self.index.delete(&batch.deletes)?;
        Ok(())
    }

    fn applies_to_index(&self) -> bool {
        true
    }

    fn finish(&mut self) -> Result<()> {
        self.index.commit()
    }
}

/// Both sinks receive every batch, first `A` then `B`.
impl<A: MergeSink, B: MergeSink> MergeSink for (A, B) {
    fn write_batch(&mut self, batch: &MergeBatch) -> Result<()> {
        self.0.write_batch(batch)?;
        self.1.write_batch(batch)
    }

    fn applies_to_index(&self) -> bool {
        self.0.applies_to_index() || self.1.applies_to_index()
    }

    fn finish(&mut self) -> Result<()> {
        self.0.finish()?;
        self.1.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{Fingerprint, SchemeTag};
    use crate::search::{CitingDocumentPatch, DeleteCommand, MemorySearchIndex, SearchDocument};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn batch() -> MergeBatch {
        MergeBatch {
            scheme: SchemeTag::Book,
            number: 3,
            clusters: vec![Fingerprint::from("f".to_string())],
            merged: vec![SearchDocument {
                document_fk: vec!["S1-scl".to_string(), "S2-scl".to_string()],
                total_received: Some("2".to_string()),
                ..SearchDocument::new("c1")
            }],
            patches: vec![CitingDocumentPatch::new("S2-scl", vec!["c2".to_string()], "c1")],
            deletes: DeleteCommand::chunked(&["c2".to_string(), "c3".to_string()], 1),
        }
    }

    fn read(path: &Path) -> Value {
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn test_artifact_writer_names_and_contents() {
        let dir = tempfile::tempdir().unwrap();
        let started: DateTime<Utc> = "2024-05-06T07:08:09.010Z".parse().unwrap();
        let mut writer = ArtifactWriter::new(dir.path().join("merges"), started).unwrap();

        writer.write_batch(&batch()).unwrap();

        let names: Vec<_> = writer
            .written()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "book-20240506T070809.010Z-0003-0_cits_for_merging.json",
                "book-20240506T070809.010Z-0003-1_docs_for_updating.json",
                "book-20240506T070809.010Z-0003-2_cits_for_removing_0.json",
                "book-20240506T070809.010Z-0003-2_cits_for_removing_1.json",
            ]
        );

        assert_eq!(
            read(&writer.written()[0]),
            json!([{"id": "c1", "document_fk": ["S1-scl", "S2-scl"], "total_received": "2"}])
        );
        assert_eq!(
            read(&writer.written()[1]),
            json!([{"entity": "document", "id": "S2-scl", "citation_fk": {"remove": ["c2"], "add-distinct": "c1"}}])
        );
        assert_eq!(
            read(&writer.written()[3]),
            json!({"delete": {"query": "id:(c3)"}})
        );

        let leftovers = std::fs::read_dir(writer.out_dir())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_second_batch_keeps_earlier_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ArtifactWriter::new(dir.path(), Utc::now()).unwrap();

        writer.write_batch(&batch()).unwrap();
        writer
            .write_batch(&MergeBatch {
                number: 4,
                deletes: Vec::new(),
                ..batch()
            })
            .unwrap();

        assert_eq!(writer.written().len(), 6);
        let on_disk = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .count();
        assert_eq!(on_disk, 6);
        assert!(writer.written().iter().all(|path| path.is_file()));
    }

    #[test]
    fn test_only_index_sinks_apply_to_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = MemorySearchIndex::new();
        let writer = ArtifactWriter::new(dir.path(), Utc::now()).unwrap();
        assert!(!writer.applies_to_index());
        assert!(IndexSink::new(&index).applies_to_index());
        assert!((writer, IndexSink::new(&index)).applies_to_index());
    }

    #[test]
    fn test_index_sink_applies_and_commits() {
        let index = MemorySearchIndex::from_documents([
            SearchDocument::new("c1"),
            SearchDocument::new("c2"),
            SearchDocument::new("c3"),
            SearchDocument {
                citation_fk: vec!["c2".to_string()],
                ..SearchDocument::new("S2-scl")
            },
        ]);
        let mut sink = IndexSink::new(&index);

        sink.write_batch(&batch()).unwrap();
        assert_eq!(index.commit_count(), 0);
        sink.finish().unwrap();
        assert_eq!(index.commit_count(), 1);

        assert!(index.get("c2").is_none());
        assert!(index.get("c3").is_none());
        assert_eq!(index.get("c1").unwrap().total_received.as_deref(), Some("2"));
        assert_eq!(index.get("S2-scl").unwrap().citation_fk, vec!["c1"]);
    }

    #[test]
    fn test_pair_sink_writes_both() {
        let dir = tempfile::tempdir().unwrap();
        let index = MemorySearchIndex::new();
        let mut sink = (
            ArtifactWriter::new(dir.path(), Utc::now()).unwrap(),
            IndexSink::new(&index),
        );

        sink.write_batch(&batch()).unwrap();
        sink.finish().unwrap();

        assert_eq!(sink.0.written().len(), 4);
        assert_eq!(index.len(), 1);
        assert_eq!(index.commit_count(), 1);
    }
}
