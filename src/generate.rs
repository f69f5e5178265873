//! Key-generation runs.
//!
//! Documents are read in fixed-size chunks. Each chunk is mapped to key
//! records (on the rayon pool with the `parallel` feature), then reduced into
//! the batched [`DedupIndex`]. Chunking only bounds the memory of one wave;
//! results do not depend on the chunk size.

use crate::config::Config;
use crate::error::Result;
use crate::index::{DedupIndex, DedupStore, IndexStats};
use crate::keys::{KeyGenerator, KeyRecord};
use crate::source::{DocumentFilter, DocumentSource};
use crate::CitingDocument;
use itertools::Itertools;

/// Counters for one generation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerateStats {
    pub documents: usize,
    pub citations: usize,
    pub keys: usize,
    pub index: IndexStats,
}

/// Generate keys for every document of `source` accepted by `filter` and upsert them into `store`.
pub fn generate_keys<S: DedupStore + ?Sized>(
    source: &dyn DocumentSource,
    filter: &DocumentFilter,
    generator: &KeyGenerator<'_>,
    store: &S,
    config: &Config,
) -> Result<GenerateStats> {
    let mut stats = GenerateStats::default();
    let mut index = DedupIndex::new(store, config.upsert_batch_size);

    let chunks = source
        .documents(filter)?
        .chunks(config.document_chunk_size.max(1));
    for (wave, chunk) in (&chunks).into_iter().enumerate() {
        let documents: Vec<CitingDocument> = chunk.collect::<Result<_>>()?;
        let keys = map_chunk(generator, &documents);

        stats.documents += documents.len();
        stats.citations += documents.iter().map(|d| d.citations.len()).sum::<usize>();
        stats.keys += keys.len();
        tracing::debug!(
            wave,
            documents = documents.len(),
            keys = keys.len(),
            "generated dedup keys"
        );

        index.extend(keys)?;
    }

    stats.index = index.finish()?;
    tracing::info!(
        documents = stats.documents,
        citations = stats.citations,
        keys = stats.keys,
        flushes = stats.index.flushes,
        "key generation finished"
    );
    Ok(stats)
}

#[cfg(feature = "parallel")]
fn map_chunk(generator: &KeyGenerator<'_>, documents: &[CitingDocument]) -> Vec<KeyRecord> {
    use rayon::prelude::*;

    documents
        .par_iter()
        .flat_map_iter(|document| generator.keys_for_document(document))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn map_chunk(generator: &KeyGenerator<'_>, documents: &[CitingDocument]) -> Vec<KeyRecord> {
    documents
        .iter()
        .flat_map(|document| generator.keys_for_document(document))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{ClusterFilter, MemoryStore};
    use crate::keys::SchemeTag;
    use crate::standardizer::MemoryStandardizer;
    use crate::{Citation, PersonName, PublicationType};
    use pretty_assertions::assert_eq;

    fn corpus(documents: usize) -> Vec<CitingDocument> {
        (0..documents)
            .map(|i| CitingDocument {
                id: format!("S{i:04}"),
                collection: "scl".to_string(),
                processing_date: None,
                citations: vec![
                    Citation {
                        index: 1,
                        publication_type: PublicationType::Article,
                        first_author: Some(PersonName::new("Barata", "Rita")),
                        title: Some("Epidemiologia social".to_string()),
                        source: Some("Rev Bras Epidemiol".to_string()),
                        publication_date: Some("2005".to_string()),
                        volume: Some(format!("{}", 8 + i % 2)),
                        ..Default::default()
                    },
                    Citation {
                        index: 2,
                        publication_type: PublicationType::Other,
                        ..Default::default()
                    },
                ],
            })
            .collect()
    }

    #[test]
    fn test_generate_keys_clusters_corpus() {
        let documents = corpus(5);
        let standardizer = MemoryStandardizer::new();
        let generator = KeyGenerator::new(&[SchemeTag::Article, SchemeTag::ArticleVolume], &standardizer);
        let store = MemoryStore::new();
        let config = Config {
            document_chunk_size: 2,
            upsert_batch_size: 3,
            ..Config::default()
        };

        let stats =
            generate_keys(&documents, &DocumentFilter::default(), &generator, &store, &config)
                .unwrap();
        assert_eq!(stats.documents, 5);
        assert_eq!(stats.citations, 10);
        assert_eq!(stats.keys, 10);
        assert_eq!(stats.index.upserts, 10);

        let article = store
            .list_clusters(SchemeTag::Article, &ClusterFilter::default())
            .unwrap();
        assert_eq!(article.len(), 1);
        assert_eq!(article[0].cit_full_ids.len(), 5);
        assert_eq!(article[0].citing_docs.len(), 5);

        let by_volume = store
            .list_clusters(SchemeTag::ArticleVolume, &ClusterFilter::default())
            .unwrap();
        assert_eq!(by_volume.len(), 2);
        let mut sizes: Vec<_> = by_volume.iter().map(|c| c.cit_full_ids.len()).collect();
        sizes.sort();
        assert_eq!(sizes, vec![2, 3]);
    }

    #[test]
    fn test_chunk_size_does_not_change_result() {
        let documents = corpus(7);
        let standardizer = MemoryStandardizer::new();
        let generator = KeyGenerator::new(&SchemeTag::ALL, &standardizer);

        let results: Vec<_> = [1, 3, 100]
            .into_iter()
            .map(|chunk| {
                let store = MemoryStore::new();
                let config = Config {
                    document_chunk_size: chunk,
                    ..Config::default()
                };
                generate_keys(&documents, &DocumentFilter::default(), &generator, &store, &config)
                    .unwrap();
                store
                    .list_clusters(SchemeTag::ArticleVolume, &ClusterFilter::default())
                    .unwrap()
                    .into_iter()
                    .map(|c| (c.fingerprint, c.cit_full_ids.len()))
                    .collect::<Vec<_>>()
            })
            .collect();

        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let documents = corpus(4);
        let standardizer = MemoryStandardizer::new();
        let generator = KeyGenerator::new(&[SchemeTag::Article], &standardizer);
        let store = MemoryStore::new();
        let config = Config::default();

        for _ in 0..3 {
            generate_keys(&documents, &DocumentFilter::default(), &generator, &store, &config)
                .unwrap();
        }
        let clusters = store
            .list_clusters(SchemeTag::Article, &ClusterFilter::default())
            .unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].cit_full_ids.len(), 4);
    }
}
