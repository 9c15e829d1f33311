//! Quarry - Natural-Language Analytics Assistant
//!
//! Answers questions over a relational store and a document corpus. Questions
//! are routed to a guarded NL-to-SQL path, a hybrid lexical/vector retrieval
//! path, or both, with an optional synthesized report.

pub mod assistant;
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod privacy;
pub mod report;
pub mod retrieval;
pub mod router;
pub mod schema;
pub mod sql;
pub mod translate;

pub use error::{QuarryError, Result};
