//! Read-only SQLite execution of validated SQL

use super::SqlCandidate;
use crate::config::DatabaseConfig;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ValueRef;
use rusqlite::OpenFlags;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to open database {path}: {message}")]
    Open { path: String, message: String },

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("Execution task failed: {0}")]
    Task(String),
}

/// Materialised query result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    /// More rows were available than the row limit allowed
    pub truncated: bool,
}

impl QueryRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Executes validated SQL over a pool of read-only connections
#[derive(Clone)]
pub struct SqlExecutor {
    pool: Pool<SqliteConnectionManager>,
    max_result_rows: u64,
}

impl SqlExecutor {
    /// Open an existing database file read-only
    pub fn open(
        db_path: &Path,
        config: &DatabaseConfig,
        max_result_rows: u64,
    ) -> Result<Self, ExecutionError> {
        if !db_path.exists() {
            return Err(ExecutionError::Open {
                path: db_path.display().to_string(),
                message: "database file does not exist".to_string(),
            });
        }

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)
            .with_init(move |conn| {
                conn.busy_timeout(busy_timeout)?;
                conn.execute_batch("PRAGMA query_only = ON;")
            });

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(Duration::from_secs(5))
            .build(manager)
            .map_err(|e| ExecutionError::Open {
                path: db_path.display().to_string(),
                message: e.to_string(),
            })?;

        tracing::info!("Opened read-only database: {}", db_path.display());

        Ok(Self {
            pool,
            max_result_rows,
        })
    }

    /// Run a validated query, materialising at most
    /// `min(row_limit, max_result_rows)` rows
    pub fn execute(
        &self,
        candidate: &SqlCandidate,
        row_limit: u64,
    ) -> Result<QueryRows, ExecutionError> {
        let limit = row_limit.min(self.max_result_rows);
        let conn = self.pool.get()?;

        let sql = candidate.raw_text().trim_end().trim_end_matches(';');
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect();

        let mut result = QueryRows {
            columns,
            rows: Vec::new(),
            truncated: false,
        };

        let column_count = result.columns.len();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            if result.rows.len() as u64 >= limit {
                result.truncated = true;
                break;
            }
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(to_json(row.get_ref(i)?));
            }
            result.rows.push(values);
        }

        tracing::debug!(
            "Query returned {} row(s){}",
            result.rows.len(),
            if result.truncated { " (truncated)" } else { "" }
        );

        Ok(result)
    }

    /// Run [`execute`](Self::execute) on the blocking thread pool
    pub async fn execute_async(
        &self,
        candidate: SqlCandidate,
        row_limit: u64,
    ) -> Result<QueryRows, ExecutionError> {
        let executor = self.clone();
        tokio::task::spawn_blocking(move || executor.execute(&candidate, row_limit))
            .await
            .map_err(|e| ExecutionError::Task(e.to_string()))?
    }
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => serde_json::Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}
