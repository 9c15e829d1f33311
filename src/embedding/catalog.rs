//! SQLite document catalog
//!
//! Holds the text, metadata and embedding of every indexed document. The
//! hybrid searcher hydrates hits from here, and the vector index is rebuilt
//! from the stored embeddings at startup.

use ahash::AHashMap;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Catalog pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Invalid metadata for {document_id}: {source}")]
    Metadata {
        document_id: String,
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A retrievable document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(alias = "id")]
    pub document_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Document {
    pub fn new(document_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            text: text.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

const MIGRATIONS: &[&str] = &[
    // 1: documents
    r#"
    CREATE TABLE documents (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        document_id TEXT NOT NULL UNIQUE,
        text TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT 'null',
        embedding BLOB,
        indexed_at TEXT NOT NULL
    );
    "#,
];

pub struct DocumentCatalog {
    pool: Pool<SqliteConnectionManager>,
}

impl DocumentCatalog {
    pub fn open(db_path: &Path) -> Result<Self, CatalogError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;",
            )
        });
        let pool = Pool::builder().max_size(4).build(manager)?;

        let catalog = Self { pool };
        catalog.migrate()?;
        Ok(catalog)
    }

    /// Every pooled in-memory connection would be a separate database,
    /// so the pool holds exactly one.
    pub fn in_memory() -> Result<Self, CatalogError> {
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())?;
        let catalog = Self { pool };
        catalog.migrate()?;
        Ok(catalog)
    }

    fn migrate(&self) -> Result<(), CatalogError> {
        let conn = self.pool.get()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i64 + 1;
            if version > current_version {
                tracing::info!("Applying catalog migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Insert or replace a document, keeping its original position
    pub fn upsert(&self, document: &Document, embedding: Option<&[f32]>) -> Result<(), CatalogError> {
        let conn = self.pool.get()?;
        let metadata = serde_json::to_string(&document.metadata).map_err(|source| {
            CatalogError::Metadata {
                document_id: document.document_id.clone(),
                source,
            }
        })?;

        conn.execute(
            "INSERT INTO documents (document_id, text, metadata, embedding, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(document_id) DO UPDATE SET
                text = excluded.text,
                metadata = excluded.metadata,
                embedding = excluded.embedding,
                indexed_at = excluded.indexed_at",
            params![
                document.document_id,
                document.text,
                metadata,
                embedding.map(encode_embedding),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    pub fn get(&self, document_id: &str) -> Result<Option<Document>, CatalogError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT document_id, text, metadata FROM documents WHERE document_id = ?1",
                params![document_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()?;

        row.map(|(document_id, text, metadata)| decode_document(document_id, text, &metadata))
            .transpose()
    }

    /// Fetch several documents; ids with no row are absent from the map
    pub fn get_many(&self, document_ids: &[String]) -> Result<AHashMap<String, Document>, CatalogError> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT document_id, text, metadata FROM documents WHERE document_id = ?1")?;

        let mut found = AHashMap::with_capacity(document_ids.len());
        for document_id in document_ids {
            let row = stmt
                .query_row(params![document_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                })
                .optional()?;
            if let Some((id, text, metadata)) = row {
                found.insert(id.clone(), decode_document(id, text, &metadata)?);
            }
        }

        Ok(found)
    }

    /// Stored embeddings in insertion order
    pub fn embeddings(&self) -> Result<Vec<(String, Vec<f32>)>, CatalogError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT document_id, embedding FROM documents WHERE embedding IS NOT NULL ORDER BY seq",
        )?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let bytes: Vec<u8> = row.get(1)?;
            Ok((id, decode_embedding(&bytes)))
        })?;

        let mut embeddings = Vec::new();
        for row in rows {
            embeddings.push(row?);
        }
        Ok(embeddings)
    }

    pub fn len(&self) -> Result<usize, CatalogError> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, CatalogError> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&self) -> Result<(), CatalogError> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM documents", [])?;
        Ok(())
    }
}

fn decode_document(document_id: String, text: String, metadata: &str) -> Result<Document, CatalogError> {
    let metadata = serde_json::from_str(metadata).map_err(|source| CatalogError::Metadata {
        document_id: document_id.clone(),
        source,
    })?;
    Ok(Document {
        document_id,
        text,
        metadata,
    })
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
