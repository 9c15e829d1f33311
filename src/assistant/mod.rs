//! Request orchestration
//!
//! Routes a question, runs the SQL path and the retrieval path
//! concurrently, and writes a report for mixed questions. A failure in one
//! path is recorded in its own section of the response without affecting
//! the other.

mod cache;

pub use cache::QueryCache;

use crate::error::Result;
use crate::privacy::PiiGuard;
use crate::report::{Report, ReportSynthesizer};
use crate::retrieval::{HybridResponse, HybridSearcher};
use crate::router::{Availability, IntentRouter, QueryMode, RoutingDecision};
use crate::sql::{QueryRows, SqlCandidate, SqlExecutor};
use crate::translate::{CancellationFlag, TranslationError, Translator};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Result of the SQL path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SqlOutcome {
    Answered { sql: String, rows: QueryRows },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantResponse {
    pub request_id: Uuid,
    pub mode: QueryMode,
    pub routing: RoutingDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<SqlOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<HybridResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,
}

/// Per-request options
#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    /// Skip routing and use this mode
    pub mode: Option<QueryMode>,
    /// Write a report even for single-path questions
    pub force_report: bool,
    /// Row bound below the configured cap
    pub max_rows: Option<u64>,
    pub cancel: CancellationFlag,
}

pub struct Assistant {
    router: IntentRouter,
    translator: Option<Translator>,
    executor: Option<SqlExecutor>,
    searcher: Option<HybridSearcher>,
    synthesizer: ReportSynthesizer,
    cache: Option<QueryCache>,
    pii_guard: Option<PiiGuard>,
    max_sql_attempts: usize,
}

impl Assistant {
    /// Any component may be absent; questions routed to a missing path
    /// are steered to the other one, or answered with a failed outcome.
    pub fn new(
        router: IntentRouter,
        translator: Option<Translator>,
        executor: Option<SqlExecutor>,
        searcher: Option<HybridSearcher>,
        synthesizer: ReportSynthesizer,
        cache: Option<QueryCache>,
        max_sql_attempts: usize,
    ) -> Self {
        Self {
            router,
            translator,
            executor,
            searcher,
            synthesizer,
            cache,
            pii_guard: None,
            max_sql_attempts,
        }
    }

    /// Mask personal data in rows, document text and reports
    pub fn with_pii_guard(mut self, guard: PiiGuard) -> Self {
        self.pii_guard = Some(guard);
        self
    }

    pub fn availability(&self) -> Availability {
        Availability {
            sql: self.translator.is_some() && self.executor.is_some(),
            retrieval: self.searcher.is_some(),
        }
    }

    pub async fn ask(&self, question: &str, mode_override: Option<QueryMode>) -> Result<AssistantResponse> {
        let options = AskOptions {
            mode: mode_override,
            ..AskOptions::default()
        };
        self.ask_with(question, &options).await
    }

    pub async fn ask_with(&self, question: &str, options: &AskOptions) -> Result<AssistantResponse> {
        let question = question.trim();
        if question.is_empty() {
            return Err(TranslationError::EmptyQuestion.into());
        }

        let request_id = Uuid::new_v4();
        let span = info_span!("ask", request_id = %request_id);

        async move {
            let routing = match options.mode {
                Some(mode) => RoutingDecision {
                    mode,
                    confidence: 1.0,
                    reasoning: vec!["mode requested by caller".to_string()],
                },
                None => self.router.route_with(question, self.availability()),
            };
            let mode = routing.mode;
            info!("Handling question in {} mode", mode);

            let wants_sql = matches!(mode, QueryMode::Sql | QueryMode::Mixed);
            let wants_retrieval = matches!(mode, QueryMode::Retrieval | QueryMode::Mixed);

            let (mut sql, mut retrieval) = tokio::join!(
                async {
                    if wants_sql {
                        Some(self.sql_path(question, options).await)
                    } else {
                        None
                    }
                },
                async {
                    if wants_retrieval {
                        Some(self.retrieval_path(question).await)
                    } else {
                        None
                    }
                },
            );

            if let Some(guard) = &self.pii_guard {
                let mut masked = 0;
                if let Some(SqlOutcome::Answered { rows, .. }) = sql.as_mut() {
                    masked += guard.mask_rows(rows);
                }
                if let Some(response) = retrieval.as_mut() {
                    masked += guard.mask_hits(&mut response.hits);
                }
                if masked > 0 {
                    warn!("Masked personal data in {} value(s)", masked);
                }
            }

            let mut report = if mode == QueryMode::Mixed || options.force_report {
                Some(
                    self.synthesizer
                        .synthesize(question, sql.as_ref(), retrieval.as_ref())
                        .await,
                )
            } else {
                None
            };

            if let (Some(guard), Some(report)) = (&self.pii_guard, report.as_mut()) {
                let body = guard.mask(&report.body).into_owned();
                report.body = body;
            }

            Ok(AssistantResponse {
                request_id,
                mode,
                routing,
                sql,
                retrieval,
                report,
            })
        }
        .instrument(span)
        .await
    }

    async fn sql_path(&self, question: &str, options: &AskOptions) -> SqlOutcome {
        let (translator, executor) = match (&self.translator, &self.executor) {
            (Some(translator), Some(executor)) => (translator, executor),
            _ => {
                return SqlOutcome::Failed {
                    error: "SQL answering is not configured (needs a language model and a database)"
                        .to_string(),
                }
            }
        };

        let candidate = match self.cached_translation(translator, question, options).await {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!("SQL path failed: {}", e);
                return SqlOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let row_limit = translator.guard().effective_limit(options.max_rows);
        let sql = candidate.raw_text().to_string();
        match executor.execute_async(candidate, row_limit).await {
            Ok(rows) => {
                info!("SQL path returned {} row(s)", rows.len());
                SqlOutcome::Answered { sql, rows }
            }
            Err(e) => {
                warn!("Query execution failed: {}", e);
                SqlOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn cached_translation(
        &self,
        translator: &Translator,
        question: &str,
        options: &AskOptions,
    ) -> std::result::Result<SqlCandidate, TranslationError> {
        let key = QueryCache::key(
            question,
            translator.guard().schema().fingerprint(),
            options.max_rows,
        );

        if let Some(candidate) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            info!("Translation cache hit");
            return Ok(candidate);
        }

        let translation = translator
            .translate_with(question, self.max_sql_attempts, options.max_rows, &options.cancel)
            .await?;

        if let Some(cache) = &self.cache {
            cache.insert(key, translation.candidate.clone());
        }
        Ok(translation.candidate)
    }

    async fn retrieval_path(&self, question: &str) -> HybridResponse {
        let Some(searcher) = &self.searcher else {
            return HybridResponse {
                hits: Vec::new(),
                degraded: true,
                warnings: vec!["document search is not configured".to_string()],
            };
        };

        match searcher.search_default(question).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Retrieval path failed: {}", e);
                HybridResponse {
                    hits: Vec::new(),
                    degraded: true,
                    warnings: vec![e.to_string()],
                }
            }
        }
    }
}
