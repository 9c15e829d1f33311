//! Narrative reports over SQL results and retrieved documents
//!
//! The language model writes the body when one is configured. Without a
//! model, or when the call fails, a deterministic plain-text summary is
//! produced instead so a report is always returned.

use crate::assistant::SqlOutcome;
use crate::config::ReportConfig;
use crate::llm::LanguageModel;
use crate::retrieval::HybridResponse;
use crate::sql::QueryRows;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const SNIPPET_CHARS: usize = 300;
const TITLE_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub title: String,
    pub body: String,
    pub generated_at: DateTime<Utc>,
    /// `"sql"` when query results were used, then cited document ids
    pub sources: Vec<String>,
    /// False when the deterministic fallback wrote the body
    pub model_generated: bool,
}

impl Report {
    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "# {}\n\n**Generated**: {}\n\n{}\n",
            self.title,
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.body.trim_end()
        );
        if !self.sources.is_empty() {
            out.push_str("\n---\n\n**Sources**: ");
            out.push_str(&self.sources.join(", "));
            out.push('\n');
        }
        out
    }
}

pub struct ReportSynthesizer {
    model: Option<Arc<dyn LanguageModel>>,
    config: ReportConfig,
    timeout: Duration,
}

impl ReportSynthesizer {
    pub fn new(model: Option<Arc<dyn LanguageModel>>, config: ReportConfig, timeout: Duration) -> Self {
        Self {
            model,
            config,
            timeout,
        }
    }

    pub async fn synthesize(
        &self,
        question: &str,
        sql: Option<&SqlOutcome>,
        retrieval: Option<&HybridResponse>,
    ) -> Report {
        let sources = collect_sources(sql, retrieval, self.config.max_hits_in_prompt);
        let context = self.render_context(sql, retrieval);

        let model_body = match &self.model {
            Some(model) => {
                let prompt = report_prompt(question, &context);
                match tokio::time::timeout(self.timeout, model.complete(&prompt)).await {
                    Ok(Ok(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
                    Ok(Ok(_)) => {
                        warn!("Report model returned empty text, using fallback");
                        None
                    }
                    Ok(Err(e)) => {
                        warn!("Report model call failed, using fallback: {}", e);
                        None
                    }
                    Err(_) => {
                        warn!("Report model call timed out after {:?}, using fallback", self.timeout);
                        None
                    }
                }
            }
            None => {
                debug!("No language model configured, writing fallback report");
                None
            }
        };

        let model_generated = model_body.is_some();
        let body = model_body.unwrap_or_else(|| fallback_body(question, &context));

        Report {
            title: title_for(question),
            body,
            generated_at: Utc::now(),
            sources,
            model_generated,
        }
    }

    /// Compact plain-text view of the inputs, shared by the prompt and the
    /// fallback body
    fn render_context(&self, sql: Option<&SqlOutcome>, retrieval: Option<&HybridResponse>) -> String {
        let mut out = String::new();

        match sql {
            Some(SqlOutcome::Answered { sql, rows }) => {
                let _ = writeln!(out, "Query:\n{}\n", sql.trim());
                render_rows(&mut out, rows, self.config.max_rows_in_prompt);
            }
            Some(SqlOutcome::Failed { error }) => {
                let _ = writeln!(out, "Query: not available ({})", error);
            }
            None => {}
        }

        if let Some(response) = retrieval {
            if !out.is_empty() {
                out.push('\n');
            }
            if response.hits.is_empty() {
                out.push_str("Documents: none found\n");
            } else {
                out.push_str("Documents:\n");
                for (rank, hit) in response.hits.iter().take(self.config.max_hits_in_prompt).enumerate() {
                    let _ = writeln!(
                        out,
                        "{}. [{}] (score {:.2}) {}",
                        rank + 1,
                        hit.document_id,
                        hit.combined_score,
                        hit.snippet(SNIPPET_CHARS).replace('\n', " ")
                    );
                }
            }
            if response.degraded {
                let _ = writeln!(out, "Note: search ran in degraded mode ({})", response.warnings.join("; "));
            }
        }

        out
    }
}

fn render_rows(out: &mut String, rows: &QueryRows, max_rows: usize) {
    if rows.is_empty() {
        out.push_str("Result: no rows\n");
        return;
    }

    let _ = writeln!(out, "Result ({} row(s)):", rows.len());
    let _ = writeln!(out, "{}", rows.columns.join(" | "));
    for row in rows.rows.iter().take(max_rows) {
        let cells: Vec<String> = row
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => "NULL".to_string(),
                other => other.to_string(),
            })
            .collect();
        let _ = writeln!(out, "{}", cells.join(" | "));
    }
    if rows.len() > max_rows {
        let _ = writeln!(out, "... {} more row(s)", rows.len() - max_rows);
    }
    if rows.truncated {
        out.push_str("(result truncated at the row limit)\n");
    }
}

fn report_prompt(question: &str, context: &str) -> String {
    format!(
        "Write a short analytical report answering the question below.\n\
         Use only the data and documents provided. Cite document ids in brackets.\n\
         Structure: key findings, supporting figures, implications.\n\
         \n\
         Question: {question}\n\
         \n\
         {context}\n\
         Report:",
        question = question,
        context = context,
    )
}

fn fallback_body(question: &str, context: &str) -> String {
    if context.trim().is_empty() {
        return format!("Question: {}\n\nNo data or documents were available to answer it.", question);
    }
    format!("Question: {}\n\n{}", question, context.trim_end())
}

fn title_for(question: &str) -> String {
    let question = question.trim();
    let mut title: String = question.chars().take(TITLE_CHARS).collect();
    if question.chars().count() > TITLE_CHARS {
        title.push_str("...");
    }
    format!("Report: {}", title)
}

fn collect_sources(sql: Option<&SqlOutcome>, retrieval: Option<&HybridResponse>, max_hits: usize) -> Vec<String> {
    let mut sources = Vec::new();
    if matches!(sql, Some(SqlOutcome::Answered { .. })) {
        sources.push("sql".to_string());
    }
    if let Some(response) = retrieval {
        sources.extend(response.hits.iter().take(max_hits).map(|h| h.document_id.clone()));
    }
    sources
}
