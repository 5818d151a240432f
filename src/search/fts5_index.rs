//! FTS5-based search index using SQLite full-text search

use super::document::{Document, IndexStats, SearchHit};
use crate::model::{EntityRef, TypeLabel};
use crate::sqlite_column;
use crate::sqlite_persistence::{ensure_schema, Column, SqlType, Table, VersionedSchema};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, Transaction};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

const DOCUMENTS_TABLE: Table = Table {
    name: "documents",
    columns: &[
        sqlite_column!("doc_type", &SqlType::Text, non_null = true),
        sqlite_column!("doc_pk", &SqlType::Text, non_null = true),
        sqlite_column!("body", &SqlType::Text, non_null = true), // JSON document
        sqlite_column!("indexed_at", &SqlType::Integer, non_null = true),
    ],
    primary_key: &["doc_type", "doc_pk"],
    indices: &[],
};

/// Which documents embed which entities, so a removed entity can be
/// unlinked without reading the store.
const DOCUMENT_EMBEDS_TABLE: Table = Table {
    name: "document_embeds",
    columns: &[
        sqlite_column!("doc_type", &SqlType::Text, non_null = true),
        sqlite_column!("doc_pk", &SqlType::Text, non_null = true),
        sqlite_column!("relation", &SqlType::Text, non_null = true),
        sqlite_column!("ref_type", &SqlType::Text, non_null = true),
        sqlite_column!("ref_pk", &SqlType::Text, non_null = true),
    ],
    primary_key: &["doc_type", "doc_pk", "relation", "ref_type", "ref_pk"],
    indices: &[("idx_document_embeds_ref", "ref_type, ref_pk")],
};

const INDEX_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[DOCUMENTS_TABLE, DOCUMENT_EMBEDS_TABLE],
    extra_sql: Some(
        r#"
        CREATE VIRTUAL TABLE search_index USING fts5(
            doc_type UNINDEXED,
            doc_pk UNINDEXED,
            content,
            tokenize='trigram'
        );
        "#,
    ),
}];

/// Search index keeping whole documents plus an FTS5 table over their text.
pub struct Fts5SearchIndex {
    conn: Mutex<Connection>,
}

impl Fts5SearchIndex {
    /// Open (or create) the index database at `db_path`.
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open index database")?;

        // Enable WAL mode for better concurrent access
        conn.pragma_update(None, "journal_mode", "WAL")?;
        ensure_schema(&conn, INDEX_VERSIONED_SCHEMAS, "index")?;

        let index = Self {
            conn: Mutex::new(conn),
        };
        info!(
            "Opened search index at {:?}: {} documents",
            db_path,
            index.document_count()?
        );
        Ok(index)
    }

    fn delete_rows(tx: &Transaction<'_>, entity: &EntityRef) -> Result<usize> {
        let doc_type = entity.type_label.to_string();
        let pk = entity.pk.as_str();
        let removed = tx.execute(
            "DELETE FROM documents WHERE doc_type = ?1 AND doc_pk = ?2",
            params![doc_type, pk],
        )?;
        tx.execute(
            "DELETE FROM document_embeds WHERE doc_type = ?1 AND doc_pk = ?2",
            params![doc_type, pk],
        )?;
        tx.execute(
            "DELETE FROM search_index WHERE doc_type = ?1 AND doc_pk = ?2",
            params![doc_type, pk],
        )?;
        Ok(removed)
    }

    fn insert_rows(tx: &Transaction<'_>, document: &Document) -> Result<()> {
        let doc_type = document.entity.type_label.to_string();
        let pk = document.entity.pk.as_str();

        tx.execute(
            "INSERT INTO documents (doc_type, doc_pk, body, indexed_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                doc_type,
                pk,
                serde_json::to_string(document)?,
                chrono::Utc::now().timestamp()
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO document_embeds
                 (doc_type, doc_pk, relation, ref_type, ref_pk)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for entry in &document.embedded {
                stmt.execute(params![
                    doc_type,
                    pk,
                    entry.relation,
                    entry.target.type_label.to_string(),
                    entry.target.pk.as_str()
                ])?;
            }
        }

        tx.execute(
            "INSERT INTO search_index (doc_type, doc_pk, content) VALUES (?1, ?2, ?3)",
            params![doc_type, pk, document.searchable_text()],
        )?;
        Ok(())
    }

    fn load(conn: &Connection, entity: &EntityRef) -> Result<Option<Document>> {
        let body: String = match conn.query_row(
            "SELECT body FROM documents WHERE doc_type = ?1 AND doc_pk = ?2",
            params![entity.type_label.to_string(), entity.pk.as_str()],
            |r| r.get(0),
        ) {
            Ok(body) => body,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let document = serde_json::from_str(&body)
            .with_context(|| format!("Corrupted document for {}", entity))?;
        Ok(Some(document))
    }

    /// Insert a document, replacing any previous version.
    pub fn upsert_document(&self, document: &Document) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        Self::delete_rows(&tx, &document.entity)?;
        Self::insert_rows(&tx, document)?;
        tx.commit()?;
        debug!(
            "Indexed {} ({} embedded)",
            document.entity,
            document.embedded.len()
        );
        Ok(())
    }

    /// Remove a document. Returns false if it was not indexed.
    pub fn remove_document(&self, entity: &EntityRef) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let removed = Self::delete_rows(&tx, entity)?;
        tx.commit()?;
        Ok(removed > 0)
    }

    pub fn get_document(&self, entity: &EntityRef) -> Result<Option<Document>> {
        let conn = self.conn.lock().unwrap();
        Self::load(&conn, entity)
    }

    /// References of every document embedding `target`.
    pub fn documents_embedding(&self, target: &EntityRef) -> Result<Vec<EntityRef>> {
        let conn = self.conn.lock().unwrap();
        Self::owners_of(&conn, target)
    }

    fn owners_of(conn: &Connection, target: &EntityRef) -> Result<Vec<EntityRef>> {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT doc_type, doc_pk FROM document_embeds
             WHERE ref_type = ?1 AND ref_pk = ?2
             ORDER BY doc_type, doc_pk",
        )?;
        let rows: Vec<(String, String)> = stmt
            .query_map(
                params![target.type_label.to_string(), target.pk.as_str()],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?
            .collect::<rusqlite::Result<_>>()?;

        let mut owners = Vec::with_capacity(rows.len());
        for (doc_type, doc_pk) in rows {
            let type_label: TypeLabel = doc_type
                .parse()
                .with_context(|| format!("Bad document type {}", doc_type))?;
            owners.push(EntityRef::new(type_label, doc_pk));
        }
        Ok(owners)
    }

    /// Remove `target` from every document that embeds it.
    ///
    /// Returns the number of documents rewritten.
    pub fn remove_embedded(&self, target: &EntityRef) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let mut rewritten = 0;
        for owner in Self::owners_of(&tx, target)? {
            let Some(mut document) = Self::load(&tx, &owner)? else {
                warn!("Dangling embed rows for missing document {}", owner);
                tx.execute(
                    "DELETE FROM document_embeds WHERE doc_type = ?1 AND doc_pk = ?2",
                    params![owner.type_label.to_string(), owner.pk.as_str()],
                )?;
                continue;
            };
            if document.unlink(target) > 0 {
                Self::delete_rows(&tx, &owner)?;
                Self::insert_rows(&tx, &document)?;
                rewritten += 1;
            }
        }

        tx.commit()?;
        Ok(rewritten)
    }

    /// Full-text search, best matches first.
    pub fn search(
        &self,
        query: &str,
        max_results: usize,
        type_filter: Option<&TypeLabel>,
    ) -> Result<Vec<SearchHit>> {
        let conn = self.conn.lock().unwrap();

        // Quote the whole query so FTS5 operators in user input are literal
        let escaped_query = format!("\"{}\"", query.replace('"', "\"\""));

        let mut sql = String::from(
            "SELECT doc_type, doc_pk, bm25(search_index) AS score
             FROM search_index
             WHERE search_index MATCH ?1",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(escaped_query)];
        if let Some(type_label) = type_filter {
            sql.push_str(" AND doc_type = ?2");
            params.push(Box::new(type_label.to_string()));
        }
        sql.push_str(&format!(" ORDER BY score LIMIT {}", max_results));

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<(String, String, f64)> = stmt
            .query_map(param_refs.as_slice(), |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })?
            .collect::<rusqlite::Result<_>>()?;

        let mut hits = Vec::with_capacity(rows.len());
        for (doc_type, doc_pk, score) in rows {
            let Ok(type_label) = doc_type.parse::<TypeLabel>() else {
                warn!("Skipping search hit with bad type {}", doc_type);
                continue;
            };
            hits.push(SearchHit {
                entity: EntityRef::new(type_label, doc_pk),
                // BM25 scores are negative (more negative = better match)
                score: -score,
            });
        }
        Ok(hits)
    }

    pub fn document_count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT doc_type, COUNT(*) FROM documents GROUP BY doc_type")?;
        let by_type = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as usize)))?
            .collect::<rusqlite::Result<std::collections::BTreeMap<_, _>>>()?;
        Ok(IndexStats {
            documents: by_type.values().sum(),
            by_type,
        })
    }

    /// Drop every document.
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "DELETE FROM documents; DELETE FROM document_embeds; DELETE FROM search_index;",
        )?;
        Ok(())
    }
}
