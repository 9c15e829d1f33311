//! SQL safety: tokenizer, static validator and read-only executor
//!
//! Model output only ever reaches SQLite as a [`SqlCandidate`], which can
//! only be produced by [`check`] after every safety rule has passed.

mod executor;
mod lexer;
mod validator;

pub use executor::{ExecutionError, QueryRows, SqlExecutor};
pub use lexer::{tokenize, Token, TokenKind};
pub use validator::{
    check, complexity_score, validate, SqlCandidate, ValidationReason, ValidationResult, FORBIDDEN_KEYWORDS,
};

use crate::config::SqlConfig;
use crate::schema::SchemaRegistry;
use std::sync::Arc;

/// Validator bound to a schema and the configured row cap
#[derive(Debug, Clone)]
pub struct SqlGuard {
    schema: Arc<SchemaRegistry>,
    max_result_rows: u64,
    max_query_length: usize,
    max_complexity: Option<u32>,
}

impl SqlGuard {
    pub fn new(schema: Arc<SchemaRegistry>, config: &SqlConfig) -> Self {
        Self {
            schema,
            max_result_rows: config.max_result_rows,
            max_query_length: config.max_query_length,
            max_complexity: config.max_complexity,
        }
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn max_result_rows(&self) -> u64 {
        self.max_result_rows
    }

    /// The caller may ask for fewer rows than the cap, never more
    pub fn effective_limit(&self, requested_rows: Option<u64>) -> u64 {
        requested_rows
            .map(|r| r.min(self.max_result_rows))
            .unwrap_or(self.max_result_rows)
    }

    pub fn validate(&self, sql: &str, requested_rows: Option<u64>) -> ValidationResult {
        match self.check(sql, requested_rows) {
            Ok(_) => ValidationResult::ok(),
            Err(rejection) => rejection,
        }
    }

    pub fn check(
        &self,
        sql: &str,
        requested_rows: Option<u64>,
    ) -> Result<SqlCandidate, ValidationResult> {
        let length = sql.chars().count();
        if length > self.max_query_length {
            return Err(ValidationResult::reject(
                ValidationReason::QueryTooLong,
                Some(format!("{} > {} characters", length, self.max_query_length)),
            ));
        }

        let candidate = check(sql, &self.schema, self.effective_limit(requested_rows))?;

        if let Some(max_complexity) = self.max_complexity {
            let score = complexity_score(sql);
            if score > max_complexity {
                return Err(ValidationResult::reject(
                    ValidationReason::QueryTooComplex,
                    Some(format!("score {} > {}", score, max_complexity)),
                ));
            }
        }

        Ok(candidate)
    }
}
