//! Natural-language to SQL translation with a bounded repair loop
//!
//! Each attempt asks the model for SQL, runs it through the [`SqlGuard`]
//! and, on rejection, feeds the rejected SQL and reason back into a
//! repair prompt. Attempts are strictly sequential. Upstream failures
//! (timeouts, rate limits, transport errors) count as attempts and are
//! retried with backoff.

mod guard;
mod prompt;

pub use guard::PromptGuard;
pub use prompt::{extract_sql, repair_prompt, sql_prompt};

use crate::config::LlmConfig;
use crate::llm::{backoff_delay, LanguageModel, LlmError};
use crate::sql::{SqlCandidate, SqlGuard, ValidationReason, ValidationResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Longest question accepted before any model call
pub const MAX_QUESTION_CHARS: usize = 2000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslationError {
    #[error("The question is empty")]
    EmptyQuestion,

    #[error("The question was rejected by the prompt guard: {pattern}")]
    PromptRejected { pattern: String },

    #[error("Could not produce a safe query after {attempts} attempt(s): {}", .reason.describe())]
    Rejected {
        reason: ValidationReason,
        detail: Option<String>,
        attempts: usize,
    },

    #[error("Language model unavailable after {attempts} attempt(s): {message}")]
    ServiceUnavailable { attempts: usize, message: String },

    #[error("Translation cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: usize },
}

/// Cooperative cancellation, checked between attempts
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A validated translation and how many model calls it took
#[derive(Debug, Clone)]
pub struct Translation {
    pub candidate: SqlCandidate,
    pub attempts: usize,
}

enum Failure {
    Rejected {
        sql: String,
        result: ValidationResult,
    },
    Upstream(LlmError),
}

pub struct Translator {
    model: Arc<dyn LanguageModel>,
    guard: SqlGuard,
    prompt_guard: PromptGuard,
    call_timeout: Duration,
    backoff_base_ms: u64,
    backoff_max_ms: u64,
}

impl Translator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        guard: SqlGuard,
        prompt_guard: PromptGuard,
        llm_config: &LlmConfig,
    ) -> Self {
        Self {
            model,
            guard,
            prompt_guard,
            call_timeout: llm_config.timeout(),
            backoff_base_ms: llm_config.backoff_base_ms,
            backoff_max_ms: llm_config.backoff_max_ms,
        }
    }

    pub fn guard(&self) -> &SqlGuard {
        &self.guard
    }

    /// Translate a question into validated SQL using at most
    /// `max_attempts` model calls
    pub async fn translate(
        &self,
        question: &str,
        max_attempts: usize,
    ) -> Result<SqlCandidate, TranslationError> {
        self.translate_with(question, max_attempts, None, &CancellationFlag::new())
            .await
            .map(|t| t.candidate)
    }

    /// Full form: optional caller row bound and a cancellation flag
    pub async fn translate_with(
        &self,
        question: &str,
        max_attempts: usize,
        requested_rows: Option<u64>,
        cancel: &CancellationFlag,
    ) -> Result<Translation, TranslationError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(TranslationError::EmptyQuestion);
        }

        if let Err(pattern) = self.prompt_guard.check(question) {
            warn!("Question rejected by prompt guard: {}", pattern);
            return Err(TranslationError::PromptRejected { pattern });
        }

        let max_attempts = max_attempts.max(1);
        let max_rows = self.guard.effective_limit(requested_rows);
        let schema_text = self.guard.schema().render_for_prompt();

        let mut last_rejection: Option<(String, ValidationResult)> = None;
        let mut last_failure: Option<Failure> = None;
        let mut upstream_failures: u32 = 0;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                info!("Translation cancelled before attempt {}", attempt);
                return Err(TranslationError::Cancelled {
                    attempts: attempt - 1,
                });
            }

            if matches!(last_failure, Some(Failure::Upstream(_))) {
                let delay = backoff_delay(self.backoff_base_ms, self.backoff_max_ms, upstream_failures);
                debug!("Backing off {:?} before attempt {}", delay, attempt);
                tokio::time::sleep(delay).await;
            }

            let prompt = match &last_rejection {
                Some((sql, result)) => repair_prompt(&schema_text, question, sql, result, max_rows),
                None => sql_prompt(&schema_text, question, max_rows),
            };

            debug!("Translation attempt {}/{}", attempt, max_attempts);

            let output = match tokio::time::timeout(self.call_timeout, self.model.complete(&prompt)).await {
                Err(_) => Err(LlmError::Timeout(self.call_timeout)),
                Ok(result) => result,
            };

            let output = match output {
                Ok(output) => output,
                Err(e) if e.is_retryable() => {
                    warn!("Model call failed on attempt {}: {}", attempt, e);
                    upstream_failures += 1;
                    last_failure = Some(Failure::Upstream(e));
                    continue;
                }
                Err(LlmError::InvalidResponse(message)) => {
                    // output that is not SQL at all is rejected like any other bad query
                    warn!("Attempt {} returned no usable text: {}", attempt, message);
                    let result = ValidationResult::reject(ValidationReason::NotSelect, Some(message));
                    last_rejection = Some((String::new(), result.clone()));
                    last_failure = Some(Failure::Rejected {
                        sql: String::new(),
                        result,
                    });
                    continue;
                }
                Err(e) => {
                    warn!("Model call failed permanently: {}", e);
                    return Err(TranslationError::ServiceUnavailable {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
            };

            let sql = extract_sql(&output);
            match self.guard.check(&sql, requested_rows) {
                Ok(candidate) => {
                    info!(
                        "Translated question in {} attempt(s), tables: {:?}",
                        attempt,
                        candidate.referenced_tables()
                    );
                    return Ok(Translation {
                        candidate,
                        attempts: attempt,
                    });
                }
                Err(result) => {
                    warn!(
                        "Attempt {} rejected: {}",
                        attempt,
                        result.reason.code()
                    );
                    debug!("Rejected SQL: {}", sql);
                    last_rejection = Some((sql.clone(), result.clone()));
                    last_failure = Some(Failure::Rejected { sql, result });
                }
            }
        }

        Err(match last_failure {
            Some(Failure::Upstream(e)) => TranslationError::ServiceUnavailable {
                attempts: max_attempts,
                message: e.to_string(),
            },
            Some(Failure::Rejected { result, .. }) => TranslationError::Rejected {
                reason: result.reason,
                detail: result.detail,
                attempts: max_attempts,
            },
            None => TranslationError::ServiceUnavailable {
                attempts: max_attempts,
                message: "no attempts were made".to_string(),
            },
        })
    }
}
