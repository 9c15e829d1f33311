use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Quarry
#[derive(Error, Debug)]
pub enum QuarryError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {}", format_validation_errors(.errors))]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Schema registry errors
    #[error("Schema error: {0}")]
    Schema(#[from] crate::schema::SchemaError),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// SQL execution errors
    #[error(transparent)]
    Execution(#[from] crate::sql::ExecutionError),

    /// Translation failures surfaced to the caller
    #[error(transparent)]
    Translation(#[from] crate::translate::TranslationError),

    /// Retrieval failures surfaced to the caller
    #[error(transparent)]
    Search(#[from] crate::retrieval::SearchError),

    /// Language model client errors
    #[error(transparent)]
    Llm(#[from] crate::llm::LlmError),

    /// Embedding model errors
    #[error(transparent)]
    Embedding(#[from] crate::embedding::EmbeddingError),

    /// Keyword index errors
    #[error(transparent)]
    KeywordIndex(#[from] crate::embedding::KeywordIndexError),

    /// Document catalog errors
    #[error(transparent)]
    Catalog(#[from] crate::embedding::CatalogError),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for Quarry operations
pub type Result<T> = std::result::Result<T, QuarryError>;
