//! CLI command definitions and parsing
use crate::router::QueryMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "quarry",
    version,
    author = "neur0map",
    about = "Natural-language analytics over a SQL store and a document corpus",
    long_about = "Quarry answers business questions by translating them into validated, read-only SQL, \
                  by searching an indexed document corpus with hybrid keyword and semantic retrieval, \
                  or both, optionally writing a short report over the combined evidence."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/quarry/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a question; routed to SQL, document search, or both
    Ask {
        /// Question in natural language
        question: String,

        /// Skip routing: sql, retrieval or mixed
        #[arg(short, long)]
        mode: Option<QueryMode>,

        /// Write a report even when only one path runs
        #[arg(short, long)]
        report: bool,

        /// Return at most this many rows
        #[arg(long)]
        rows: Option<u64>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Translate a question into validated SQL without running it
    Translate {
        /// Question in natural language
        question: String,

        /// Row bound for the generated LIMIT
        #[arg(long)]
        rows: Option<u64>,
    },

    /// Check a SQL statement against the safety policy
    Validate {
        /// SQL text to check
        sql: String,

        /// Row bound below the configured maximum
        #[arg(long)]
        rows: Option<u64>,
    },

    /// Search indexed documents with hybrid keyword and semantic retrieval
    Search {
        /// Search query text
        query: String,

        /// Maximum number of results to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Semantic weight in [0, 1]; 0 is keyword only, 1 is vector only
        #[arg(short, long)]
        weight: Option<f32>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Index documents from a JSON Lines file ({"id", "text", "metadata"})
    Index {
        /// Path to the .jsonl file
        input: PathBuf,

        /// Remove every indexed document first
        #[arg(long)]
        clear: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration and schema files
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
