//! Wiring: build every component from a validated [`Config`]
//!
//! Components are constructed once here and injected; nothing is global.
//! An invalid schema or LLM setup is a startup error. A missing database
//! or index only disables the corresponding path.

use crate::assistant::{Assistant, QueryCache};
use crate::config::{expand_path, Config};
use crate::embedding::{
    rebuild_vectors, DocumentCatalog, EmbeddingProvider, FastEmbedProvider, IndexBuilder, IndexPaths,
    KeywordIndex, VectorIndex,
};
use crate::error::{QuarryError, Result};
use crate::llm::{LanguageModel, OpenAiCompatibleClient};
use crate::privacy::PiiGuard;
use crate::report::ReportSynthesizer;
use crate::retrieval::HybridSearcher;
use crate::router::IntentRouter;
use crate::schema::SchemaRegistry;
use crate::sql::{SqlExecutor, SqlGuard};
use crate::translate::{PromptGuard, Translator, MAX_QUESTION_CHARS};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Number of embedding batches in flight while indexing
const INDEX_CONCURRENCY: usize = 4;

pub fn load_schema(config: &Config) -> Result<Arc<SchemaRegistry>> {
    let path = expand_path(&config.sql.schema_file)?;
    let registry = SchemaRegistry::load(&path, config.sql.allowed_tables.as_deref())?;
    Ok(Arc::new(registry))
}

pub fn sql_guard(config: &Config) -> Result<SqlGuard> {
    Ok(SqlGuard::new(load_schema(config)?, &config.sql))
}

/// `None` when the language model is disabled
pub fn language_model(config: &Config) -> Result<Option<Arc<dyn LanguageModel>>> {
    if !config.llm.enabled {
        return Ok(None);
    }
    let client: Arc<dyn LanguageModel> = Arc::new(OpenAiCompatibleClient::from_config(&config.llm)?);
    Ok(Some(client))
}

pub fn translator(config: &Config, model: Arc<dyn LanguageModel>, guard: SqlGuard) -> Result<Translator> {
    let prompt_guard = PromptGuard::new(MAX_QUESTION_CHARS)
        .map_err(|e| QuarryError::Config(format!("Invalid prompt guard pattern: {}", e)))?;
    Ok(Translator::new(model, guard, prompt_guard, &config.llm))
}

/// `None` when the database file does not exist yet
pub fn sql_executor(config: &Config) -> Result<Option<SqlExecutor>> {
    let path = expand_path(&config.database.path)?;
    if !path.exists() {
        warn!("Database {} not found; SQL answering disabled", path.display());
        return Ok(None);
    }
    Ok(Some(SqlExecutor::open(&path, &config.database, config.sql.max_result_rows)?))
}

pub fn embedding_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider = FastEmbedProvider::from_config(&config.embedding)?;
    if provider.dimension() != config.indexing.vector_dim {
        return Err(QuarryError::InvalidConfigValue {
            path: "indexing.vector_dim".to_string(),
            message: format!(
                "model {} produces {} dimensions, configured {}",
                provider.model_name(),
                provider.dimension(),
                config.indexing.vector_dim
            ),
        });
    }
    Ok(Arc::new(provider))
}

/// Open the catalog and both indexes, rebuilding the vector index from
/// stored embeddings
pub struct IndexStores {
    pub catalog: Arc<DocumentCatalog>,
    pub keyword_index: Arc<RwLock<KeywordIndex>>,
    pub vector_index: Arc<RwLock<VectorIndex>>,
}

pub fn open_index_stores(config: &Config) -> Result<IndexStores> {
    let paths = IndexPaths::from_config(&config.indexing)?;
    let catalog = DocumentCatalog::open(&paths.catalog_db)?;
    let keyword_index = KeywordIndex::new(paths.lexical_dir)?;

    let mut vector_index = VectorIndex::from_config(&config.indexing);
    let skipped = rebuild_vectors(&catalog, &mut vector_index)?;
    if skipped > 0 {
        warn!("{} stored vector(s) did not fit the configured index", skipped);
    }

    info!(
        "Opened indexes: {} keyword document(s), {} vector(s)",
        keyword_index.len(),
        vector_index.len()
    );

    Ok(IndexStores {
        catalog: Arc::new(catalog),
        keyword_index: Arc::new(RwLock::new(keyword_index)),
        vector_index: Arc::new(RwLock::new(vector_index)),
    })
}

pub fn index_builder(config: &Config, stores: &IndexStores) -> Result<IndexBuilder> {
    let provider = embedding_provider(config)?;
    Ok(IndexBuilder::new(
        provider,
        stores.catalog.clone(),
        stores.keyword_index.clone(),
        stores.vector_index.clone(),
        config.embedding.batch_size,
        INDEX_CONCURRENCY,
    ))
}

/// `None` when nothing has been indexed yet
pub fn hybrid_searcher(config: &Config) -> Result<Option<HybridSearcher>> {
    let paths = IndexPaths::from_config(&config.indexing)?;
    if !paths.catalog_db.exists() {
        warn!("No document index at {}; run `quarry index` first", paths.catalog_db.display());
        return Ok(None);
    }

    let provider = embedding_provider(config)?;
    let stores = open_index_stores(config)?;
    Ok(Some(HybridSearcher::new(
        provider,
        stores.keyword_index,
        stores.vector_index,
        stores.catalog,
        config.retrieval.clone(),
        &config.embedding,
    )))
}

pub fn assistant(config: &Config) -> Result<Assistant> {
    let guard = sql_guard(config)?;
    let model = language_model(config)?;

    let translator = match &model {
        Some(model) => Some(translator(config, model.clone(), guard)?),
        None => {
            warn!("Language model disabled; SQL answering unavailable");
            None
        }
    };

    let router = IntentRouter::new()
        .map_err(|e| QuarryError::Config(format!("Invalid router pattern: {}", e)))?;

    let assistant = Assistant::new(
        router,
        translator,
        sql_executor(config)?,
        hybrid_searcher(config)?,
        ReportSynthesizer::new(model, config.report.clone(), config.llm.timeout()),
        QueryCache::from_config(&config.cache),
        config.sql.max_sql_attempts,
    );

    if !config.privacy.mask_pii {
        return Ok(assistant);
    }
    let pii_guard = PiiGuard::new()
        .map_err(|e| QuarryError::Config(format!("Invalid PII pattern: {}", e)))?;
    Ok(assistant.with_pii_guard(pii_guard))
}
