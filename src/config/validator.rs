use crate::config::Config;
use crate::error::{QuarryError, Result, ValidationError};
use crate::schema::is_valid_identifier;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem before failing
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_sql(config, &mut errors);
        Self::validate_database(config, &mut errors);
        Self::validate_llm(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_cache(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(QuarryError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_sql(config: &Config, errors: &mut Vec<ValidationError>) {
        let sql = &config.sql;

        if sql.max_sql_attempts == 0 {
            errors.push(ValidationError::new(
                "sql.max_sql_attempts",
                "At least one attempt is required",
            ));
        }

        if sql.max_result_rows == 0 {
            errors.push(ValidationError::new(
                "sql.max_result_rows",
                "Row limit must be greater than 0",
            ));
        }

        if sql.max_query_length < 16 {
            errors.push(ValidationError::new(
                "sql.max_query_length",
                format!("Query length limit too small: {}", sql.max_query_length),
            ));
        }

        if let Some(tables) = &sql.allowed_tables {
            if tables.is_empty() {
                errors.push(ValidationError::new(
                    "sql.allowed_tables",
                    "Allow-list is empty; omit it to allow every schema table",
                ));
            }
            for table in tables {
                if !is_valid_identifier(table) {
                    errors.push(ValidationError::new(
                        "sql.allowed_tables",
                        format!("Invalid table name: '{}'", table),
                    ));
                }
            }
        }

        if sql.max_complexity == Some(0) {
            errors.push(ValidationError::new(
                "sql.max_complexity",
                "Complexity threshold of 0 rejects every query; omit it to disable the check",
            ));
        }

        if sql.schema_file.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "sql.schema_file",
                "Schema file path cannot be empty",
            ));
        }
    }

    fn validate_database(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.database.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "database.path",
                "Database path cannot be empty",
            ));
        }

        if config.database.pool_size == 0 {
            errors.push(ValidationError::new(
                "database.pool_size",
                "Pool size must be greater than 0",
            ));
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        let llm = &config.llm;

        // If LLM is enabled, validate API key environment variable is set
        if llm.enabled && llm.requires_api_key() {
            let env_var = &llm.api_key_env;
            if let Ok(key) = std::env::var(env_var) {
                if key.is_empty() {
                    errors.push(ValidationError::new(
                        "llm.api_key_env",
                        format!("Environment variable {} is empty", env_var),
                    ));
                }
            } else {
                errors.push(ValidationError::new(
                    "llm.api_key_env",
                    format!("Environment variable {} is not set", env_var),
                ));
            }
        }

        let temp = llm.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        let provider = &llm.provider;
        let valid_providers = ["groq", "openai", "ollama"];
        if !valid_providers.contains(&provider.as_str()) {
            errors.push(ValidationError::new(
                "llm.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    valid_providers, provider
                ),
            ));
        }

        if llm.model.is_empty() {
            errors.push(ValidationError::new("llm.model", "Model name cannot be empty"));
        }

        if llm.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "llm.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }

        if llm.backoff_max_ms < llm.backoff_base_ms {
            errors.push(ValidationError::new(
                "llm.backoff_max_ms",
                "Maximum backoff must not be below the base backoff",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let mode = &config.embedding.mode;
        if mode != "offline" && mode != "online" {
            errors.push(ValidationError::new(
                "embedding.mode",
                format!("Mode must be 'offline' or 'online', got '{}'", mode),
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        let indexing = &config.indexing;

        if indexing.vector_dim == 0 {
            errors.push(ValidationError::new(
                "indexing.vector_dim",
                "Vector dimension must be greater than 0",
            ));
        }

        if indexing.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if indexing.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }

        if indexing.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        let weight = retrieval.hybrid_weight;
        if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
            errors.push(ValidationError::new(
                "retrieval.hybrid_weight",
                format!("Weight must be between 0.0 and 1.0, got {}", weight),
            ));
        }

        if retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }

        if retrieval.candidate_multiplier == 0 {
            errors.push(ValidationError::new(
                "retrieval.candidate_multiplier",
                "Candidate multiplier must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&retrieval.min_combined_score) {
            errors.push(ValidationError::new(
                "retrieval.min_combined_score",
                "Score threshold must be between 0.0 and 1.0",
            ));
        }

        if retrieval.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "retrieval.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }
    }

    fn validate_cache(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.cache.enabled {
            if config.cache.max_entries == 0 {
                errors.push(ValidationError::new(
                    "cache.max_entries",
                    "Cache size must be greater than 0 when enabled",
                ));
            }
            if config.cache.ttl_secs == 0 {
                errors.push(ValidationError::new(
                    "cache.ttl_secs",
                    "Cache TTL must be greater than 0 when enabled",
                ));
            }
        }
    }
}
