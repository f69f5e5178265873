use super::{CitingDocumentPatch, DeleteCommand, IdQuery, SearchDocument, SearchIndex, SelectResponse};
use crate::error::Result;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Search index held in memory, loaded from and saved to a JSON-lines snapshot.
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    documents: RwLock<BTreeMap<String, SearchDocument>>,
    next_version: AtomicI64,
    selects: AtomicUsize,
    commits: AtomicUsize,
}

impl MemorySearchIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_documents(documents: impl IntoIterator<Item = SearchDocument>) -> Self {
        let index = Self::new();
        {
            let mut map = index.write();
            for document in documents {
                map.insert(document.id.clone(), document);
            }
        }
        index
    }

    /// Load a snapshot with one JSON document per line.
    pub fn from_json_lines(path: &Path) -> Result<Self> {
        let reader = BufReader::new(std::fs::File::open(path)?);
        let mut documents = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            documents.push(serde_json::from_str::<SearchDocument>(&line)?);
        }
        tracing::info!(path = %path.display(), documents = documents.len(), "loaded search index snapshot");
        Ok(Self::from_documents(documents))
    }

    /// Write the current documents as JSON lines, ordered by id.
    pub fn save_json_lines(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(std::fs::File::create(path)?);
        for document in self.read().values() {
            serde_json::to_writer(&mut writer, document)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, SearchDocument>> {
        self.documents.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, SearchDocument>> {
        self.documents.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn stamp(&self) -> i64 {
        self.next_version.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self, id: &str) -> Option<SearchDocument> {
        self.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Number of select queries served.
    pub fn select_count(&self) -> usize {
        self.selects.load(Ordering::Relaxed)
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::Relaxed)
    }
}

impl SearchIndex for MemorySearchIndex {
    fn select(&self, query: &IdQuery) -> Result<SelectResponse> {
        self.selects.fetch_add(1, Ordering::Relaxed);
        let documents = self.read();
        Ok(SelectResponse::from_docs(
            query
                .ids()
                .iter()
                .filter_map(|id| documents.get(id))
                .cloned()
                .collect(),
        ))
    }

    fn upsert(&self, documents: &[SearchDocument]) -> Result<()> {
        let mut map = self.write();
        for document in documents {
            let mut document = document.clone();
            document.version = Some(self.stamp());
            map.insert(document.id.clone(), document);
        }
        Ok(())
    }

    fn patch(&self, patches: &[CitingDocumentPatch]) -> Result<()> {
        let mut map = self.write();
        for patch in patches {
            match map.get_mut(&patch.id) {
                Some(document) => {
                    patch.apply_to(&mut document.citation_fk);
                    document.version = Some(self.stamp());
                }
                None => tracing::debug!(id = %patch.id, "patch target not in index"),
            }
        }
        Ok(())
    }

    fn delete(&self, commands: &[DeleteCommand]) -> Result<()> {
        let mut map = self.write();
        for command in commands {
            let query: IdQuery = command.delete.query.parse()?;
            for id in query.ids() {
                map.remove(id);
            }
        }
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let commits = self.commits.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(commits, documents = self.len(), "search index committed");
        Ok(())
    }
}
