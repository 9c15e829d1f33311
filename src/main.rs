use quarry::assistant::{AskOptions, AssistantResponse, SqlOutcome};
use quarry::bootstrap;
use quarry::cli::{Cli, Commands, ConfigAction};
use quarry::config::{Config, ConfigValidator};
use quarry::embedding::Document;
use quarry::error::{QuarryError, Result};
use quarry::retrieval::HybridResponse;
use quarry::router::QueryMode;
use quarry::sql::QueryRows;
use quarry::translate::CancellationFlag;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    match cli.command {
        Commands::Ask {
            question,
            mode,
            report,
            rows,
            json,
        } => {
            cmd_ask(cli.config, &question, mode, report, rows, json)?;
        }
        Commands::Translate { question, rows } => {
            cmd_translate(cli.config, &question, rows)?;
        }
        Commands::Validate { sql, rows } => {
            cmd_validate(cli.config, &sql, rows)?;
        }
        Commands::Search {
            query,
            top_k,
            weight,
            json,
        } => {
            cmd_search(cli.config, &query, top_k, weight, json)?;
        }
        Commands::Index { input, clear } => {
            cmd_index(cli.config, &input, clear)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose { "quarry=debug" } else { "quarry=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| QuarryError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn cmd_ask(
    config_path: Option<PathBuf>,
    question: &str,
    mode: Option<QueryMode>,
    force_report: bool,
    rows: Option<u64>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let rt = runtime()?;

    rt.block_on(async {
        let assistant = bootstrap::assistant(&config)?;

        let cancel = CancellationFlag::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling translation");
                on_interrupt.cancel();
            }
        });

        let options = AskOptions {
            mode,
            force_report,
            max_rows: rows,
            cancel,
        };
        let response = assistant.ask_with(question, &options).await?;

        if json {
            print_json(&response)?;
        } else {
            print_response(&response);
        }
        Ok::<_, QuarryError>(())
    })
}

fn cmd_translate(config_path: Option<PathBuf>, question: &str, rows: Option<u64>) -> Result<()> {
    let config = load_config(config_path)?;
    let guard = bootstrap::sql_guard(&config)?;
    let model = bootstrap::language_model(&config)?.ok_or_else(|| {
        QuarryError::Config("Language model is disabled; set llm.enabled = true".to_string())
    })?;
    let translator = bootstrap::translator(&config, model, guard)?;

    let rt = runtime()?;
    let translation = rt.block_on(translator.translate_with(
        question,
        config.sql.max_sql_attempts,
        rows,
        &CancellationFlag::new(),
    ))?;

    println!("{}", translation.candidate.raw_text());
    println!();
    println!(
        "✓ Validated after {} attempt(s); tables: {}",
        translation.attempts,
        translation.candidate.referenced_tables().join(", ")
    );
    Ok(())
}

fn cmd_validate(config_path: Option<PathBuf>, sql: &str, rows: Option<u64>) -> Result<()> {
    let config = load_config(config_path)?;
    let guard = bootstrap::sql_guard(&config)?;
    let result = guard.validate(sql, rows);

    if result.accepted {
        println!("✓ Accepted");
    } else {
        println!("✗ Rejected [{}]: {}", result.reason.code(), result.message());
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_search(
    config_path: Option<PathBuf>,
    query: &str,
    top_k: Option<usize>,
    weight: Option<f32>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let searcher = bootstrap::hybrid_searcher(&config)?.ok_or_else(|| {
        QuarryError::Config("No documents indexed yet; run 'quarry index <file.jsonl>' first".to_string())
    })?;

    let weight = weight.unwrap_or(config.retrieval.hybrid_weight);
    let top_k = top_k.unwrap_or(config.retrieval.top_k);

    let rt = runtime()?;
    let response = rt.block_on(searcher.search(query, weight, top_k))?;

    if json {
        print_json(&response)?;
    } else {
        print_hits(&response);
    }
    Ok(())
}

fn cmd_index(config_path: Option<PathBuf>, input: &Path, clear: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let documents = read_documents(input)?;

    let rt = runtime()?;
    rt.block_on(async {
        let stores = bootstrap::open_index_stores(&config)?;
        if clear {
            stores.catalog.clear()?;
            stores.keyword_index.write().await.clear()?;
            stores.vector_index.write().await.clear();
            println!("✓ Cleared existing index");
        }

        let builder = bootstrap::index_builder(&config, &stores)?;
        let report = builder.process(documents).await?;

        println!(
            "✓ Indexed {} document(s) in {} ms",
            report.processed, report.duration_ms
        );
        if report.failed > 0 {
            println!("⚠ {} document(s) failed to embed and were skipped", report.failed);
        }
        println!("  Catalog: {} document(s)", stores.catalog.len()?);
        Ok::<_, QuarryError>(())
    })
}

fn read_documents(path: &Path) -> Result<Vec<Document>> {
    let content = std::fs::read_to_string(path).map_err(|e| QuarryError::Io {
        source: e,
        context: format!("Failed to read documents file: {:?}", path),
    })?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| QuarryError::Json {
                source: e,
                context: format!("Invalid document on line {}", n + 1),
            })
        })
        .collect()
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path)?;
            let value = serde_json::to_value(&config).map_err(|e| QuarryError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            let value = match section {
                Some(section) => value.get(&section).cloned().ok_or_else(|| {
                    QuarryError::Config(format!("Unknown config section: {}", section))
                })?,
                None => value,
            };

            print_json(&value)?;
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            let schema = bootstrap::load_schema(&config)?;

            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            println!(
                "  Tables: {} ({})",
                schema.tables().len(),
                schema.table_names().join(", ")
            );
        }
        ConfigAction::Init { force } => {
            let path = Config::default_path()?;

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            let config_dir = path
                .parent()
                .ok_or_else(|| QuarryError::Config("Config path has no parent directory".to_string()))?;
            std::fs::create_dir_all(config_dir).map_err(|e| QuarryError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", config_dir),
            })?;

            let schema_path = config_dir.join("schema.toml");
            let mut config = Config::default();
            config.sql.schema_file = schema_path.clone();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());

            if force || !schema_path.exists() {
                let schema_content = include_str!("../config-templates/schema.toml");
                std::fs::write(&schema_path, schema_content).map_err(|e| QuarryError::Io {
                    source: e,
                    context: format!("Failed to write schema.toml: {:?}", schema_path),
                })?;
                println!("✓ Schema template installed at: {}", schema_path.display());
            }
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'quarry config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides()?;
        ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    Config::load(&path)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| QuarryError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })?;
    println!("{}", json);
    Ok(())
}

fn print_response(response: &AssistantResponse) {
    println!(
        "Mode: {} (confidence {:.2})",
        response.mode, response.routing.confidence
    );

    if let Some(sql) = &response.sql {
        println!();
        match sql {
            SqlOutcome::Answered { sql, rows } => {
                println!("SQL: {}", sql);
                println!();
                print_rows(rows);
            }
            SqlOutcome::Failed { error } => {
                println!("✗ SQL: {}", error);
            }
        }
    }

    if let Some(retrieval) = &response.retrieval {
        println!();
        print_hits(retrieval);
    }

    if let Some(report) = &response.report {
        println!();
        println!("{}", report.to_markdown());
    }
}

fn print_rows(rows: &QueryRows) {
    if rows.is_empty() {
        println!("(no rows)");
        return;
    }

    println!("{}", rows.columns.join(" | "));
    for row in &rows.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => "NULL".to_string(),
                other => other.to_string(),
            })
            .collect();
        println!("{}", cells.join(" | "));
    }
    if rows.truncated {
        println!("... truncated at {} row(s)", rows.len());
    }
}

fn print_hits(response: &HybridResponse) {
    for warning in &response.warnings {
        println!("⚠ {}", warning);
    }

    if response.hits.is_empty() {
        println!("No matching documents");
        return;
    }

    for (rank, hit) in response.hits.iter().enumerate() {
        println!(
            "{}. [{}] score {:.3} (keyword {}, semantic {})",
            rank + 1,
            hit.document_id,
            hit.combined_score,
            format_component(hit.lexical_score),
            format_component(hit.vector_score)
        );
        println!("   {}", hit.snippet(160).replace('\n', " "));
    }
}

fn format_component(score: Option<f32>) -> String {
    score.map_or_else(|| "-".to_string(), |s| format!("{:.2}", s))
}
