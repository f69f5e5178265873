use super::{Cluster, ClusterFilter, DedupStore};
use crate::canonical::CanonicalFields;
use crate::error::Result;
use crate::keys::{Fingerprint, KeyRecord, SchemeTag};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS clusters (
            scheme      TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            fields      TEXT NOT NULL DEFAULT '{}',
            update_date TEXT NOT NULL,
            PRIMARY KEY (scheme, fingerprint)
        );

        CREATE TABLE IF NOT EXISTS cluster_citations (
            scheme      TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            cit_full_id TEXT NOT NULL,
            UNIQUE (scheme, fingerprint, cit_full_id),
            FOREIGN KEY (scheme, fingerprint) REFERENCES clusters(scheme, fingerprint)
        );

        CREATE TABLE IF NOT EXISTS cluster_citing_docs (
            scheme      TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            citing_doc  TEXT NOT NULL,
            UNIQUE (scheme, fingerprint, citing_doc),
            FOREIGN KEY (scheme, fingerprint) REFERENCES clusters(scheme, fingerprint)
        );

        CREATE INDEX IF NOT EXISTS idx_clusters_update_date ON clusters(scheme, update_date);
        ",
    )?;
    Ok(())
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Dedup store backed by SQLite.
///
/// Member sets live in their own tables under a uniqueness constraint, so the
/// set union is done by the database (`INSERT OR IGNORE`) rather than by a
/// client-side read-modify-write. Each batch is one transaction.
pub struct SqliteStore {
    path: Option<String>,
    connection: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        create_tables(&conn)?;
        Ok(Self {
            path: Some(path.to_string_lossy().to_string()),
            connection: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn)?;
        create_tables(&conn)?;
        Ok(Self {
            path: None,
            connection: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of clusters of `scheme`.
    pub fn count(&self, scheme: SchemeTag) -> Result<usize> {
        let conn = self.connection();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM clusters WHERE scheme = ?1",
            params![scheme.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl DedupStore for SqliteStore {
    fn upsert_batch(&self, batch: &[KeyRecord], updated_at: DateTime<Utc>) -> Result<()> {
        let stamp = timestamp(updated_at);
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        {
            let mut upsert_cluster = tx.prepare_cached(
                "INSERT INTO clusters (scheme, fingerprint, fields, update_date)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (scheme, fingerprint)
                 DO UPDATE SET fields = excluded.fields, update_date = excluded.update_date",
            )?;
            let mut add_citation = tx.prepare_cached(
                "INSERT OR IGNORE INTO cluster_citations (scheme, fingerprint, cit_full_id)
                 VALUES (?1, ?2, ?3)",
            )?;
            let mut add_citing_doc = tx.prepare_cached(
                "INSERT OR IGNORE INTO cluster_citing_docs (scheme, fingerprint, citing_doc)
                 VALUES (?1, ?2, ?3)",
            )?;

            for record in batch {
                let scheme = record.scheme.as_str();
                let fingerprint = record.fingerprint.as_str();
                let fields = serde_json::to_string(&record.fields)?;

                upsert_cluster.execute(params![scheme, fingerprint, fields, stamp])?;
                add_citation.execute(params![scheme, fingerprint, record.citation_full_id])?;
                add_citing_doc.execute(params![scheme, fingerprint, record.citing_doc_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn list_clusters(&self, scheme: SchemeTag, filter: &ClusterFilter) -> Result<Vec<Cluster>> {
        let conn = self.connection();
        // RFC 3339 stamps compare correctly against a bare `YYYY-MM-DD` prefix.
        let since = filter
            .updated_since
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        let mut clusters: BTreeMap<String, Cluster> = BTreeMap::new();
        let mut stmt = conn.prepare_cached(
            "SELECT fingerprint, fields, update_date FROM clusters
             WHERE scheme = ?1 AND update_date >= ?2",
        )?;
        let rows = stmt.query_map(params![scheme.as_str(), since], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (fingerprint, fields, update_date) = row?;
            let fields: CanonicalFields = serde_json::from_str(&fields)?;
            let update_date = DateTime::parse_from_rfc3339(&update_date)
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?
                .with_timezone(&Utc);
            clusters.insert(
                fingerprint.clone(),
                Cluster {
                    scheme,
                    fingerprint: Fingerprint::from(fingerprint),
                    cit_full_ids: Vec::new(),
                    citing_docs: Vec::new(),
                    fields,
                    update_date,
                },
            );
        }

        let mut members = conn.prepare_cached(
            "SELECT m.fingerprint, m.cit_full_id FROM cluster_citations m
             JOIN clusters c ON c.scheme = m.scheme AND c.fingerprint = m.fingerprint
             WHERE m.scheme = ?1 AND c.update_date >= ?2
             ORDER BY m.rowid",
        )?;
        let rows = members.query_map(params![scheme.as_str(), since], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (fingerprint, cit_full_id) = row?;
            if let Some(cluster) = clusters.get_mut(&fingerprint) {
                cluster.cit_full_ids.push(cit_full_id);
            }
        }

        let mut citing = conn.prepare_cached(
            "SELECT m.fingerprint, m.citing_doc FROM cluster_citing_docs m
             JOIN clusters c ON c.scheme = m.scheme AND c.fingerprint = m.fingerprint
             WHERE m.scheme = ?1 AND c.update_date >= ?2
             ORDER BY m.rowid",
        )?;
        let rows = citing.query_map(params![scheme.as_str(), since], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (fingerprint, citing_doc) = row?;
            if let Some(cluster) = clusters.get_mut(&fingerprint) {
                cluster.citing_docs.push(citing_doc);
            }
        }

        Ok(clusters.into_values().collect())
    }
}
