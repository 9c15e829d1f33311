//! Schema registry
//!
//! Describes the tables and columns the SQL translator may target. The
//! registry is loaded once from TOML at startup, intersected with the
//! configured allow-list and then shared read-only behind an `Arc`.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to read schema file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse schema file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("Duplicate table '{0}'")]
    DuplicateTable(String),

    #[error("Duplicate column '{column}' in table '{table}'")]
    DuplicateColumn { table: String, column: String },

    #[error("Primary key column '{column}' is not a column of table '{table}'")]
    UnknownPrimaryKey { table: String, column: String },

    #[error("Table '{0}' has no columns")]
    NoColumns(String),

    #[error("Allow-listed table '{0}' is not in the schema")]
    UnknownAllowedTable(String),

    #[error("No tables remain after applying the allow-list")]
    Empty,
}

/// Column types exposed to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SemanticType {
    #[serde(alias = "integer")]
    Integer,
    #[serde(alias = "decimal")]
    Decimal,
    #[serde(alias = "date")]
    Date,
    #[serde(alias = "string")]
    String,
    #[serde(alias = "json")]
    Json,
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SemanticType::Integer => "INTEGER",
            SemanticType::Decimal => "DECIMAL",
            SemanticType::Date => "DATE",
            SemanticType::String => "STRING",
            SemanticType::Json => "JSON",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub semantic_type: SemanticType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    #[serde(default)]
    pub primary_key: Vec<String>,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Ordered collection of table descriptors as written in the schema file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    #[serde(default)]
    pub tables: Vec<TableDescriptor>,
}

impl SchemaDescriptor {
    pub fn from_toml_str(content: &str) -> Result<Self, SchemaError> {
        Ok(toml::from_str(content)?)
    }

    /// Check identifier syntax, uniqueness and primary keys
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen_tables = AHashSet::new();

        for table in &self.tables {
            if !is_valid_identifier(&table.name) {
                return Err(SchemaError::InvalidIdentifier(table.name.clone()));
            }
            if !seen_tables.insert(table.name.to_ascii_lowercase()) {
                return Err(SchemaError::DuplicateTable(table.name.clone()));
            }
            if table.columns.is_empty() {
                return Err(SchemaError::NoColumns(table.name.clone()));
            }

            let mut seen_columns = AHashSet::new();
            for column in &table.columns {
                if !is_valid_identifier(&column.name) {
                    return Err(SchemaError::InvalidIdentifier(format!(
                        "{}.{}",
                        table.name, column.name
                    )));
                }
                if !seen_columns.insert(column.name.to_ascii_lowercase()) {
                    return Err(SchemaError::DuplicateColumn {
                        table: table.name.clone(),
                        column: column.name.clone(),
                    });
                }
            }

            for key in &table.primary_key {
                if !seen_columns.contains(&key.to_ascii_lowercase()) {
                    return Err(SchemaError::UnknownPrimaryKey {
                        table: table.name.clone(),
                        column: key.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// `^[a-zA-Z_][a-zA-Z0-9_]*$`
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validated, allow-listed schema shared by the validator and translator
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    tables: Vec<TableDescriptor>,
    names: AHashSet<String>,
    fingerprint: String,
}

impl SchemaRegistry {
    /// Build a registry from a descriptor and an optional allow-list.
    ///
    /// Every allow-listed name must exist in the descriptor, and at least
    /// one table must remain afterwards.
    pub fn new(
        descriptor: SchemaDescriptor,
        allowed_tables: Option<&[String]>,
    ) -> Result<Self, SchemaError> {
        descriptor.validate()?;

        let tables = match allowed_tables {
            Some(allowed) => {
                for name in allowed {
                    if !descriptor
                        .tables
                        .iter()
                        .any(|t| t.name.eq_ignore_ascii_case(name))
                    {
                        return Err(SchemaError::UnknownAllowedTable(name.clone()));
                    }
                }
                descriptor
                    .tables
                    .into_iter()
                    .filter(|t| allowed.iter().any(|a| a.eq_ignore_ascii_case(&t.name)))
                    .collect::<Vec<_>>()
            }
            None => descriptor.tables,
        };

        if tables.is_empty() {
            return Err(SchemaError::Empty);
        }

        let names = tables
            .iter()
            .map(|t| t.name.to_ascii_lowercase())
            .collect();

        let mut registry = Self {
            tables,
            names,
            fingerprint: String::new(),
        };
        registry.fingerprint = blake3::hash(registry.render_for_prompt().as_bytes())
            .to_hex()
            .to_string();

        tracing::info!(
            "Schema registry loaded: {} table(s) allowed",
            registry.tables.len()
        );

        Ok(registry)
    }

    /// Load a schema file and apply the allow-list
    pub fn load(path: &Path, allowed_tables: Option<&[String]>) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path).map_err(|e| SchemaError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let descriptor = SchemaDescriptor::from_toml_str(&content)?;
        Self::new(descriptor, allowed_tables)
    }

    /// Case-insensitive membership test on allowed table names
    pub fn contains_table(&self, name: &str) -> bool {
        self.names.contains(&name.to_ascii_lowercase())
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn tables(&self) -> &[TableDescriptor] {
        &self.tables
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Stable hash of the rendered schema, used to key cached translations
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// One line per table with column names and types only. No data.
    pub fn render_for_prompt(&self) -> String {
        self.tables
            .iter()
            .map(|t| {
                let columns = t
                    .columns
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.semantic_type))
                    .collect::<Vec<_>>()
                    .join(", ");
                if t.primary_key.is_empty() {
                    format!("{}({})", t.name, columns)
                } else {
                    format!(
                        "{}({}) primary key ({})",
                        t.name,
                        columns,
                        t.primary_key.join(", ")
                    )
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
