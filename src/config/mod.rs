//! Configuration management for Quarry
//!
//! Configuration is loaded once at startup from TOML, overlaid with
//! `QUARRY_SECTION__KEY` environment variables, and validated as a whole.
//! A configuration that fails validation never reaches the request path.

use crate::error::{QuarryError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    #[serde(default)]
    pub sql: SqlConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub privacy: PrivacyConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// NL-to-SQL translation and validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlConfig {
    /// Upper bound on model attempts per question (first try plus repairs)
    pub max_sql_attempts: usize,
    /// Maximum permitted `LIMIT` literal and executor row cap
    pub max_result_rows: u64,
    /// Candidate SQL longer than this is rejected before parsing
    pub max_query_length: usize,
    /// Tables the validator permits. `None` permits every registry table.
    pub allowed_tables: Option<Vec<String>>,
    /// Reject queries whose complexity score exceeds this. Unset disables the check.
    pub max_complexity: Option<u32>,
    /// Path to the schema registry TOML
    pub schema_file: PathBuf,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            max_sql_attempts: 3,
            max_result_rows: 1000,
            max_query_length: 5000,
            allowed_tables: Some(
                ["sales_2024", "regions", "industries", "features"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            max_complexity: None,
            schema_file: PathBuf::from("~/.config/quarry/schema.toml"),
        }
    }
}

/// Relational store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.quarry/commerce.db"),
            busy_timeout_ms: 5000,
            pool_size: 4,
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: String,
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Overrides the provider's default endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Per-call timeout
    pub timeout_secs: u64,
    /// Transport-level retries inside a single call
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "groq".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            model: "llama-3.1-70b-versatile".to_string(),
            temperature: 0.1,
            max_tokens: 1024,
            base_url: None,
            timeout_secs: 30,
            max_retries: 0,
            backoff_base_ms: 500,
            backoff_max_ms: 8000,
        }
    }
}

impl LlmConfig {
    /// Base URL of the OpenAI-compatible chat completions API
    pub fn endpoint(&self) -> String {
        if let Some(url) = &self.base_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.provider.as_str() {
            "openai" => "https://api.openai.com/v1".to_string(),
            "ollama" => "http://localhost:11434/v1".to_string(),
            _ => "https://api.groq.com/openai/v1".to_string(),
        }
    }

    pub fn requires_api_key(&self) -> bool {
        self.provider != "ollama"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub mode: String, // "offline" or "online"
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            mode: "offline".to_string(),
            batch_size: 32,
            timeout_secs: 10,
        }
    }
}

/// Indexing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub data_dir: PathBuf,
    pub vector_dim: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_search: usize,
    pub max_elements: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.quarry/index"),
            vector_dim: 384,
            hnsw_ef_construction: 200,
            hnsw_m: 16,
            hnsw_ef_search: 64,
            max_elements: 100_000,
        }
    }
}

/// Hybrid retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Weight of the vector side in `combined = w*vec + (1-w)*lex`
    pub hybrid_weight: f32,
    pub top_k: usize,
    /// Each index is asked for `top_k * candidate_multiplier` hits
    pub candidate_multiplier: usize,
    pub min_combined_score: f32,
    /// Per-index search timeout
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_weight: 0.5,
            top_k: 5,
            candidate_multiplier: 4,
            min_combined_score: 0.0,
            timeout_secs: 10,
        }
    }
}

impl RetrievalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Translation cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: u64,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            ttl_secs: 3600,
        }
    }
}

/// Report synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub max_rows_in_prompt: usize,
    pub max_hits_in_prompt: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            max_rows_in_prompt: 20,
            max_hits_in_prompt: 5,
        }
    }
}

/// Output masking of personal data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    /// Mask emails, phone numbers, national ids and card numbers in query
    /// rows, document text and reports
    pub mask_pii: bool,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self { mask_pii: true }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(QuarryError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse, apply environment overrides and validate
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;

        config.apply_env_overrides()?;

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: QUARRY_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        let overrides: Vec<(String, String)> = std::env::vars()
            .filter_map(|(k, v)| k.strip_prefix("QUARRY_").map(|k| (k.to_string(), v)))
            .collect();
        self.apply_overrides(overrides)
    }

    /// Apply `SECTION__KEY` overrides. Unparseable values are fatal.
    pub fn apply_overrides<I, K, V>(&mut self, overrides: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in overrides {
            self.set_value_from_env(key.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "SQL__MAX_SQL_ATTEMPTS" => self.sql.max_sql_attempts = parse_env(path, value)?,
            "SQL__MAX_RESULT_ROWS" => self.sql.max_result_rows = parse_env(path, value)?,
            "SQL__MAX_QUERY_LENGTH" => self.sql.max_query_length = parse_env(path, value)?,
            "SQL__ALLOWED_TABLES" => {
                self.sql.allowed_tables = Some(
                    value
                        .split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect(),
                );
            }
            "SQL__MAX_COMPLEXITY" => self.sql.max_complexity = Some(parse_env(path, value)?),
            "SQL__SCHEMA_FILE" => self.sql.schema_file = PathBuf::from(value),
            "DATABASE__PATH" => self.database.path = PathBuf::from(value),
            "LLM__ENABLED" => self.llm.enabled = parse_env(path, value)?,
            "LLM__PROVIDER" => self.llm.provider = value.to_string(),
            "LLM__MODEL" => self.llm.model = value.to_string(),
            "LLM__BASE_URL" => self.llm.base_url = Some(value.to_string()),
            "LLM__TIMEOUT_SECS" => self.llm.timeout_secs = parse_env(path, value)?,
            "EMBEDDING__MODE" => self.embedding.mode = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "INDEXING__DATA_DIR" => self.indexing.data_dir = PathBuf::from(value),
            "RETRIEVAL__HYBRID_WEIGHT" => self.retrieval.hybrid_weight = parse_env(path, value)?,
            "RETRIEVAL__TOP_K" => self.retrieval.top_k = parse_env(path, value)?,
            "PRIVACY__MASK_PII" => self.privacy.mask_pii = parse_env(path, value)?,
            "CACHE__ENABLED" => self.cache.enabled = parse_env(path, value)?,
            "CACHE__TTL_SECS" => self.cache.ttl_secs = parse_env(path, value)?,
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| QuarryError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("quarry").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| QuarryError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".quarry"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            sql: SqlConfig::default(),
            database: DatabaseConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            cache: CacheConfig::default(),
            report: ReportConfig::default(),
            privacy: PrivacyConfig::default(),
        }
    }
}

fn parse_env<T: FromStr>(path: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| QuarryError::InvalidConfigValue {
        path: path.to_string(),
        message: format!(
            "Cannot parse '{}' as {}",
            value,
            std::any::type_name::<T>()
        ),
    })
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| QuarryError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| QuarryError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
