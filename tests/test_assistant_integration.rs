//! End-to-end assistant tests
//!
//! A real SQLite database and in-memory document indexes, with a canned
//! language model standing in for the provider.

mod common;

use async_trait::async_trait;
use common::HashBagEmbedder;
use quarry::assistant::{AskOptions, Assistant, QueryCache, SqlOutcome};
use quarry::config::{DatabaseConfig, EmbeddingConfig, LlmConfig, ReportConfig, RetrievalConfig, SqlConfig};
use quarry::embedding::{Document, DocumentCatalog, IndexBuilder, KeywordIndex, VectorIndex};
use quarry::llm::{LanguageModel, LlmError};
use quarry::privacy::PiiGuard;
use quarry::report::ReportSynthesizer;
use quarry::retrieval::HybridSearcher;
use quarry::router::{IntentRouter, QueryMode};
use quarry::schema::{SchemaDescriptor, SchemaRegistry};
use quarry::sql::{SqlExecutor, SqlGuard};
use quarry::translate::{PromptGuard, TranslationError, Translator, MAX_QUESTION_CHARS};
use quarry::QuarryError;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::RwLock;

const TOP_REGIONS_SQL: &str = "```sql\n\
    SELECT r.region_name, SUM(s.sales_amt) AS total_sales\n\
    FROM sales_2024 s JOIN regions r ON r.region_id = s.region_id\n\
    WHERE s.date >= '2024-01-01'\n\
    GROUP BY r.region_name\n\
    ORDER BY total_sales DESC\n\
    LIMIT 5\n\
    ```";

/// Answers SQL prompts with fixed text and report prompts with a summary
struct AnalystModel {
    sql: String,
    sql_calls: AtomicUsize,
    report_calls: AtomicUsize,
}

impl AnalystModel {
    fn new(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            sql_calls: AtomicUsize::new(0),
            report_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LanguageModel for AnalystModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        if prompt.starts_with("Write a short analytical report") {
            self.report_calls.fetch_add(1, Ordering::SeqCst);
            Ok("Key findings: South leads regional sales. [policy-rent] supports small retailers.".to_string())
        } else {
            self.sql_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.sql.clone())
        }
    }

    fn model_name(&self) -> &str {
        "analyst"
    }
}

fn create_database(path: &Path) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE regions (region_id INTEGER PRIMARY KEY, region_name TEXT NOT NULL, country TEXT);
         CREATE TABLE sales_2024 (region_id INTEGER NOT NULL, industry_id INTEGER, sales_amt REAL NOT NULL, date TEXT NOT NULL);
         INSERT INTO regions VALUES
            (1, 'North', 'KR'), (2, 'South', 'KR'), (3, 'East', 'KR'),
            (4, 'West', 'KR'), (5, 'Central', 'KR'), (6, 'Coastal', 'KR');
         INSERT INTO sales_2024 VALUES
            (1, 1, 500.0, '2024-02-01'), (1, 2, 300.0, '2024-05-12'),
            (2, 1, 1200.0, '2024-03-03'),
            (3, 1, 400.0, '2024-07-19'), (3, 1, 10000.0, '2023-12-31'),
            (4, 2, 950.0, '2024-01-15'),
            (5, 1, 100.0, '2024-04-04'), (5, 2, 50.0, '2024-09-30'),
            (6, 2, 700.0, '2024-11-11');",
    )
    .unwrap();
}

fn guard() -> SqlGuard {
    let descriptor =
        SchemaDescriptor::from_toml_str(include_str!("../config-templates/schema.toml")).unwrap();
    let config = SqlConfig::default();
    let registry = SchemaRegistry::new(descriptor, config.allowed_tables.as_deref()).unwrap();
    SqlGuard::new(Arc::new(registry), &config)
}

async fn searcher() -> HybridSearcher {
    let catalog = Arc::new(DocumentCatalog::in_memory().unwrap());
    let keyword = Arc::new(RwLock::new(KeywordIndex::in_memory().unwrap()));
    let vector = Arc::new(RwLock::new(VectorIndex::new(common::HASH_DIM, 200, 16, 64, 100)));

    let builder = IndexBuilder::new(
        Arc::new(HashBagEmbedder),
        catalog.clone(),
        keyword.clone(),
        vector.clone(),
        8,
        1,
    );
    builder
        .process(vec![
            Document::new("policy-rent", "Rent relief policy for small retail stores in every region"),
            Document::new("memo-sales", "Regional sales rose fastest in the South after the new transit line"),
            Document::new("note-hiring", "Hiring plans for the logistics team next year"),
            Document::new(
                "desk-leasing",
                "Leasing desk contact 010-2345-6789 or leasing@mall.example.com for rent relief forms",
            ),
        ])
        .await
        .unwrap();

    HybridSearcher::new(
        Arc::new(HashBagEmbedder),
        keyword,
        vector,
        catalog,
        RetrievalConfig::default(),
        &EmbeddingConfig::default(),
    )
}

struct Fixture {
    _temp: TempDir,
    model: Arc<AnalystModel>,
    assistant: Assistant,
}

async fn fixture(sql: &str, with_searcher: bool) -> Fixture {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("commerce.db");
    create_database(&db_path);

    let model = Arc::new(AnalystModel::new(sql));
    let translator = Translator::new(
        model.clone(),
        guard(),
        PromptGuard::new(MAX_QUESTION_CHARS).unwrap(),
        &LlmConfig::default(),
    );
    let executor = SqlExecutor::open(&db_path, &DatabaseConfig::default(), 1000).unwrap();
    let searcher = if with_searcher { Some(searcher().await) } else { None };

    let assistant = Assistant::new(
        IntentRouter::new().unwrap(),
        Some(translator),
        Some(executor),
        searcher,
        ReportSynthesizer::new(Some(model.clone()), ReportConfig::default(), Duration::from_secs(5)),
        Some(QueryCache::new(100, Duration::from_secs(60))),
        3,
    )
    .with_pii_guard(PiiGuard::new().unwrap());

    Fixture {
        _temp: temp,
        model,
        assistant,
    }
}

#[tokio::test]
async fn test_top_regions_question_end_to_end() {
    let fixture = fixture(TOP_REGIONS_SQL, true).await;

    let response = fixture
        .assistant
        .ask("top 5 regions by total sales in 2024", None)
        .await
        .unwrap();

    assert_eq!(response.mode, QueryMode::Sql);
    assert!(response.retrieval.is_none());
    assert!(response.report.is_none());

    let Some(SqlOutcome::Answered { sql, rows }) = &response.sql else {
        panic!("expected an answer, got {:?}", response.sql);
    };
    assert!(sql.starts_with("SELECT r.region_name"));
    assert!(sql.ends_with("LIMIT 5"));
    assert_eq!(rows.columns, vec!["region_name", "total_sales"]);
    assert!(!rows.truncated);

    let names: Vec<&str> = rows.rows.iter().map(|r| r[0].as_str().unwrap()).collect();
    assert_eq!(names, vec!["South", "West", "North", "Coastal", "East"]);
    assert_eq!(rows.rows[0][1].as_f64(), Some(1200.0));
    // the 2023 row for East is filtered out
    assert_eq!(rows.rows[4][1].as_f64(), Some(400.0));

    println!("✓ {} rows for request {}", rows.len(), response.request_id);
}

#[tokio::test]
async fn test_mixed_question_runs_both_paths_and_reports() {
    let fixture = fixture(TOP_REGIONS_SQL, true).await;

    let response = fixture
        .assistant
        .ask("write a report on regional sales and rent relief policy", None)
        .await
        .unwrap();

    assert_eq!(response.mode, QueryMode::Mixed);
    assert!(matches!(response.sql, Some(SqlOutcome::Answered { .. })));

    let retrieval = response.retrieval.as_ref().unwrap();
    assert!(!retrieval.degraded);
    assert!(retrieval.hits.iter().any(|h| h.document_id == "policy-rent"));

    let report = response.report.as_ref().unwrap();
    assert!(report.model_generated);
    assert_eq!(report.sources[0], "sql");
    assert!(report.sources.iter().any(|s| s == "policy-rent"));
    assert_eq!(fixture.model.report_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unsafe_sql_failure_is_contained() {
    let fixture = fixture("DROP TABLE regions", true).await;

    let response = fixture
        .assistant
        .ask("write a report on regional sales and rent relief policy", None)
        .await
        .unwrap();

    match &response.sql {
        Some(SqlOutcome::Failed { error }) => assert!(error.contains("3 attempt")),
        other => panic!("expected a failed SQL outcome, got {:?}", other),
    }
    assert_eq!(fixture.model.sql_calls.load(Ordering::SeqCst), 3);

    // the retrieval path and the report are unaffected
    assert!(!response.retrieval.as_ref().unwrap().hits.is_empty());
    let report = response.report.as_ref().unwrap();
    assert!(!report.sources.iter().any(|s| s == "sql"));
}

#[tokio::test]
async fn test_repeated_question_uses_cache() {
    let fixture = fixture(TOP_REGIONS_SQL, true).await;

    let first = fixture
        .assistant
        .ask("top 5 regions by total sales in 2024", None)
        .await
        .unwrap();
    let second = fixture
        .assistant
        .ask("  top 5 regions   by total sales in 2024 ", None)
        .await
        .unwrap();

    assert_eq!(fixture.model.sql_calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.sql, second.sql);
    assert_ne!(first.request_id, second.request_id);
}

#[tokio::test]
async fn test_mode_override_and_forced_report() {
    let fixture = fixture(TOP_REGIONS_SQL, true).await;

    let options = AskOptions {
        mode: Some(QueryMode::Retrieval),
        force_report: true,
        ..AskOptions::default()
    };
    let response = fixture
        .assistant
        .ask_with("top 5 regions by total sales in 2024", &options)
        .await
        .unwrap();

    assert_eq!(response.mode, QueryMode::Retrieval);
    assert_eq!(response.routing.confidence, 1.0);
    assert!(response.sql.is_none());
    assert!(response.retrieval.is_some());
    assert!(response.report.is_some());
    assert_eq!(fixture.model.sql_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_index_steers_to_sql() {
    let fixture = fixture(TOP_REGIONS_SQL, false).await;
    assert!(!fixture.assistant.availability().retrieval);

    let response = fixture
        .assistant
        .ask("what government support policy exists for sales regions", None)
        .await
        .unwrap();

    assert_eq!(response.mode, QueryMode::Sql);
    assert!(response
        .routing
        .reasoning
        .iter()
        .any(|r| r.contains("retrieval path unavailable")));
}

#[tokio::test]
async fn test_empty_question_is_rejected() {
    let fixture = fixture(TOP_REGIONS_SQL, true).await;

    let result = fixture.assistant.ask("   ", None).await;
    assert!(matches!(
        result,
        Err(QuarryError::Translation(TranslationError::EmptyQuestion))
    ));
}

#[tokio::test]
async fn test_json_response_shape() {
    let fixture = fixture(TOP_REGIONS_SQL, true).await;
    let response = fixture
        .assistant
        .ask("top 5 regions by total sales in 2024", None)
        .await
        .unwrap();

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["mode"], "sql");
    assert_eq!(json["sql"]["status"], "answered");
    assert_eq!(json["sql"]["rows"]["columns"][0], "region_name");
    assert!(json.get("retrieval").is_none());
}

#[tokio::test]
async fn test_contact_details_are_masked_in_answers() {
    let fixture = fixture(TOP_REGIONS_SQL, true).await;

    let options = AskOptions {
        mode: Some(QueryMode::Retrieval),
        force_report: true,
        ..AskOptions::default()
    };
    let response = fixture
        .assistant
        .ask_with("leasing desk contact for rent relief", &options)
        .await
        .unwrap();

    let retrieval = response.retrieval.as_ref().unwrap();
    let desk = retrieval
        .hits
        .iter()
        .find(|h| h.document_id == "desk-leasing")
        .unwrap();
    assert!(desk.source_text.starts_with("Leasing desk contact 01"));
    assert!(desk.source_text.contains("rent relief forms"));

    let json = serde_json::to_string(&response).unwrap();
    assert!(!json.contains("010-2345-6789"));
    assert!(!json.contains("leasing@mall.example.com"));
}
