//! Static safety policy for model-generated SQL
//!
//! Checks run in a fixed order and stop at the first violation:
//! single statement, SELECT/WITH only, forbidden keywords, table
//! allow-list, row bound. The analysis is pure: no database and no model
//! are involved, and the same input always yields the same result.

use super::lexer::{tokenize, Token, TokenKind};
use crate::schema::SchemaRegistry;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Whole-word keywords that reject a candidate outright
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP",
    "DELETE",
    "INSERT",
    "UPDATE",
    "ALTER",
    "CREATE",
    "TRUNCATE",
    "GRANT",
    "REVOKE",
    "EXEC",
    "EXECUTE",
    "CALL",
    "INFORMATION_SCHEMA",
    "MERGE",
    "ATTACH",
    "DETACH",
    "PRAGMA",
    "VACUUM",
    "REINDEX",
];

/// Words that close a FROM list at the same nesting depth
const FROM_LIST_TERMINATORS: &[&str] = &[
    "WHERE",
    "GROUP",
    "HAVING",
    "ORDER",
    "LIMIT",
    "UNION",
    "INTERSECT",
    "EXCEPT",
    "WINDOW",
    "OFFSET",
    "FETCH",
    "RETURNING",
    "SELECT",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationReason {
    Ok,
    QueryTooLong,
    MultiStatement,
    NotSelect,
    ForbiddenKeyword,
    TableNotAllowed,
    MissingLimit,
    LimitTooLarge,
    QueryTooComplex,
}

impl ValidationReason {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationReason::Ok => "OK",
            ValidationReason::QueryTooLong => "QUERY_TOO_LONG",
            ValidationReason::MultiStatement => "MULTI_STATEMENT",
            ValidationReason::NotSelect => "NOT_SELECT",
            ValidationReason::ForbiddenKeyword => "FORBIDDEN_KEYWORD",
            ValidationReason::TableNotAllowed => "TABLE_NOT_ALLOWED",
            ValidationReason::MissingLimit => "MISSING_LIMIT",
            ValidationReason::LimitTooLarge => "LIMIT_TOO_LARGE",
            ValidationReason::QueryTooComplex => "QUERY_TOO_COMPLEX",
        }
    }

    /// Human-readable explanation, also used in repair prompts
    pub fn describe(&self) -> &'static str {
        match self {
            ValidationReason::Ok => "the query passed validation",
            ValidationReason::QueryTooLong => "the query is longer than permitted",
            ValidationReason::MultiStatement => "only a single SQL statement is allowed",
            ValidationReason::NotSelect => "the query must start with SELECT or WITH",
            ValidationReason::ForbiddenKeyword => "the query uses a forbidden keyword",
            ValidationReason::TableNotAllowed => "the query references a table outside the schema",
            ValidationReason::MissingLimit => "the query must end with a numeric LIMIT clause",
            ValidationReason::LimitTooLarge => "the LIMIT exceeds the maximum allowed row count",
            ValidationReason::QueryTooComplex => "the query is too complex; use fewer joins and subqueries",
        }
    }
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub accepted: bool,
    pub reason: ValidationReason,
    /// The offending keyword, table or limit, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            accepted: true,
            reason: ValidationReason::Ok,
            detail: None,
        }
    }

    pub fn reject(reason: ValidationReason, detail: Option<String>) -> Self {
        Self {
            accepted: false,
            reason,
            detail,
        }
    }

    /// Message suitable for end users and repair prompts
    pub fn message(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{} ({})", self.reason.describe(), detail),
            None => self.reason.describe().to_string(),
        }
    }
}

/// SQL that has passed every safety check.
///
/// Only the validator can construct one, so anything that accepts a
/// `&SqlCandidate` is guaranteed to see validated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SqlCandidate {
    raw_text: String,
    normalized_text: String,
    referenced_tables: Vec<String>,
    limit: u64,
}

impl SqlCandidate {
    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn normalized_text(&self) -> &str {
        &self.normalized_text
    }

    /// Schema tables referenced in FROM/JOIN positions, in first-seen order
    pub fn referenced_tables(&self) -> &[String] {
        &self.referenced_tables
    }

    /// The LIMIT value; every candidate carries one
    pub fn limit(&self) -> u64 {
        self.limit
    }
}

/// Aggregate and DISTINCT words, one point per occurrence
const COMPLEXITY_FUNCTIONS: &[&str] = &["COUNT", "SUM", "AVG", "MAX", "MIN", "DISTINCT"];

/// Structural cost of a query
///
/// JOIN and UNION cost 2 each, a parenthesised SELECT costs 3, each
/// aggregate or DISTINCT costs 1, and GROUP BY, ORDER BY and HAVING cost 1
/// each when present. Words inside string literals and comments are not
/// counted.
pub fn complexity_score(sql: &str) -> u32 {
    let tokens: Vec<Token<'_>> = tokenize(sql).into_iter().filter(|t| !t.is_trivia()).collect();

    let mut score = 0;
    let (mut group_by, mut order_by, mut having) = (false, false, false);

    for (i, token) in tokens.iter().enumerate() {
        let next = tokens.get(i + 1);
        if token.is_word("JOIN") || token.is_word("UNION") {
            score += 2;
        } else if token.is_punct('(') && next.is_some_and(|t| t.is_word("SELECT")) {
            score += 3;
        } else if COMPLEXITY_FUNCTIONS.iter().any(|f| token.is_word(f)) {
            score += 1;
        } else if token.is_word("GROUP") && next.is_some_and(|t| t.is_word("BY")) {
            group_by = true;
        } else if token.is_word("ORDER") && next.is_some_and(|t| t.is_word("BY")) {
            order_by = true;
        } else if token.is_word("HAVING") {
            having = true;
        }
    }

    score + [group_by, order_by, having].iter().filter(|present| **present).count() as u32
}

/// Validate candidate text against the schema and a row bound
pub fn validate(candidate_text: &str, schema: &SchemaRegistry, max_rows: u64) -> ValidationResult {
    match check(candidate_text, schema, max_rows) {
        Ok(_) => ValidationResult::ok(),
        Err(rejection) => rejection,
    }
}

/// Same checks as [`validate`], returning the validated candidate on success
pub fn check(
    candidate_text: &str,
    schema: &SchemaRegistry,
    max_rows: u64,
) -> Result<SqlCandidate, ValidationResult> {
    let tokens = tokenize(candidate_text);
    let significant: Vec<&Token<'_>> = tokens.iter().filter(|t| !t.is_trivia()).collect();
    let normalized_text = normalize(&tokens);

    // 1. Single statement
    if let Some(pos) = tokens.iter().position(|t| t.is_punct(';')) {
        if tokens[pos + 1..].iter().any(|t| t.kind != TokenKind::Whitespace) {
            return Err(ValidationResult::reject(
                ValidationReason::MultiStatement,
                None,
            ));
        }
    }

    // 2. SELECT-only
    match significant.first() {
        Some(first) if first.is_word("SELECT") || first.is_word("WITH") => {}
        Some(first) => {
            return Err(ValidationResult::reject(
                ValidationReason::NotSelect,
                Some(format!("starts with '{}'", truncate(first.text, 32))),
            ));
        }
        None => {
            return Err(ValidationResult::reject(
                ValidationReason::NotSelect,
                Some("empty query".to_string()),
            ));
        }
    }

    // 3. Forbidden keywords, whole words over the full normalized text
    if let Some(m) = forbidden_regex().find(&normalized_text) {
        return Err(ValidationResult::reject(
            ValidationReason::ForbiddenKeyword,
            Some(m.as_str().to_string()),
        ));
    }

    // 4. Table allow-list
    let referenced_tables = check_tables(&significant, schema)?;

    // 5. Row bound
    let limit = check_limit(&significant, max_rows)?;

    Ok(SqlCandidate {
        raw_text: candidate_text.trim().to_string(),
        normalized_text,
        referenced_tables,
        limit,
    })
}

fn forbidden_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(r"(?i)\b({})\b", FORBIDDEN_KEYWORDS.join("|"));
        Regex::new(&pattern).expect("forbidden keyword pattern is valid")
    })
}

/// Upper-cased text with whitespace runs collapsed. Comments and
/// literals are kept so the keyword scan sees them.
fn normalize(tokens: &[Token<'_>]) -> String {
    let mut out = String::new();
    for token in tokens {
        if token.kind == TokenKind::Whitespace {
            if !out.is_empty() && !out.ends_with(' ') {
                out.push(' ');
            }
        } else {
            out.push_str(&token.text.to_uppercase());
        }
    }
    out.trim_end().to_string()
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    /// Parenthesised (or top-level) SELECT / WITH / VALUES
    Query,
    /// Parenthesised join group in a FROM list
    TableGroup,
    /// Function arguments, expression grouping, column lists
    Expr,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    in_from_list: bool,
}

/// A CTE name and the index of its defining token
struct CteName {
    name: String,
    position: usize,
}

fn is_query_start(token: Option<&&Token<'_>>) -> bool {
    token.is_some_and(|t| t.is_word("SELECT") || t.is_word("WITH") || t.is_word("VALUES"))
}

/// Walk FROM/JOIN positions and check each table reference.
fn check_tables(
    tokens: &[&Token<'_>],
    schema: &SchemaRegistry,
) -> Result<Vec<String>, ValidationResult> {
    let ctes = collect_top_level_ctes(tokens);
    let mut referenced: Vec<String> = Vec::new();
    let mut scopes = vec![Scope {
        kind: ScopeKind::Query,
        in_from_list: false,
    }];
    let mut expect_table = false;

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];

        if expect_table {
            if token.is_word("LATERAL") || token.is_word("ONLY") {
                i += 1;
                continue;
            }
            expect_table = false;

            match token.kind {
                TokenKind::Punct('(') => {
                    if is_query_start(tokens.get(i + 1)) {
                        scopes.push(Scope {
                            kind: ScopeKind::Query,
                            in_from_list: false,
                        });
                    } else {
                        scopes.push(Scope {
                            kind: ScopeKind::TableGroup,
                            in_from_list: true,
                        });
                        expect_table = true;
                    }
                    i += 1;
                    continue;
                }
                TokenKind::Word | TokenKind::QuotedIdent | TokenKind::StringLit => {
                    let name = token.value.as_str();
                    if tokens.get(i + 1).is_some_and(|t| t.is_punct('.')) {
                        return Err(ValidationResult::reject(
                            ValidationReason::TableNotAllowed,
                            Some(format!("qualified name '{}.'", truncate(name, 64))),
                        ));
                    }

                    let is_cte = ctes
                        .iter()
                        .any(|c| c.position < i && c.name.eq_ignore_ascii_case(name));
                    if !is_cte {
                        match schema.table(name) {
                            Some(table) => {
                                if !referenced.iter().any(|r| r == &table.name) {
                                    referenced.push(table.name.clone());
                                }
                            }
                            None => {
                                return Err(ValidationResult::reject(
                                    ValidationReason::TableNotAllowed,
                                    Some(truncate(name, 64)),
                                ));
                            }
                        }
                    }
                    i += 1;
                    continue;
                }
                _ => {}
            }
        }

        match token.kind {
            TokenKind::Punct('(') => {
                let kind = if is_query_start(tokens.get(i + 1)) {
                    ScopeKind::Query
                } else {
                    ScopeKind::Expr
                };
                scopes.push(Scope {
                    kind,
                    in_from_list: false,
                });
            }
            TokenKind::Punct(')') => {
                if scopes.len() > 1 {
                    scopes.pop();
                }
            }
            TokenKind::Punct(',') => {
                if current(&scopes).in_from_list {
                    expect_table = true;
                }
            }
            TokenKind::Word => {
                let scope_kind = current(&scopes).kind;
                if token.is_word("FROM") {
                    if scope_kind != ScopeKind::Expr && !is_distinct_from(tokens, i) {
                        current_mut(&mut scopes).in_from_list = true;
                        expect_table = true;
                    }
                } else if token.is_word("JOIN") {
                    current_mut(&mut scopes).in_from_list = true;
                    expect_table = true;
                } else if FROM_LIST_TERMINATORS.iter().any(|w| token.is_word(w)) {
                    current_mut(&mut scopes).in_from_list = false;
                }
            }
            _ => {}
        }

        i += 1;
    }

    Ok(referenced)
}

fn current<'s>(scopes: &'s [Scope]) -> &'s Scope {
    // the root scope is never popped
    &scopes[scopes.len() - 1]
}

fn current_mut(scopes: &mut [Scope]) -> &mut Scope {
    let last = scopes.len() - 1;
    &mut scopes[last]
}

/// `a IS [NOT] DISTINCT FROM b` is a comparison, not a table position
fn is_distinct_from(tokens: &[&Token<'_>], from_index: usize) -> bool {
    from_index >= 2
        && tokens[from_index - 1].is_word("DISTINCT")
        && (tokens[from_index - 2].is_word("IS") || tokens[from_index - 2].is_word("NOT"))
}

/// Names defined by the statement's leading WITH clause.
///
/// CTEs introduced inside subqueries are not collected, so references to
/// them are checked against the schema like any other table.
fn collect_top_level_ctes(tokens: &[&Token<'_>]) -> Vec<CteName> {
    let mut ctes = Vec::new();
    if !tokens.first().is_some_and(|t| t.is_word("WITH")) {
        return ctes;
    }

    let mut i = 1;
    if tokens.get(i).is_some_and(|t| t.is_word("RECURSIVE")) {
        i += 1;
    }

    loop {
        let name_token = match tokens.get(i) {
            Some(t) if matches!(t.kind, TokenKind::Word | TokenKind::QuotedIdent) => t,
            _ => break,
        };
        let position = i;
        i += 1;

        // optional column list
        if tokens.get(i).is_some_and(|t| t.is_punct('(')) {
            i = skip_group(tokens, i);
        }

        if !tokens.get(i).is_some_and(|t| t.is_word("AS")) {
            break;
        }
        i += 1;
        if tokens.get(i).is_some_and(|t| t.is_word("NOT")) {
            i += 1;
        }
        if tokens.get(i).is_some_and(|t| t.is_word("MATERIALIZED")) {
            i += 1;
        }
        if !tokens.get(i).is_some_and(|t| t.is_punct('(')) {
            break;
        }

        ctes.push(CteName {
            name: name_token.value.clone(),
            position,
        });

        i = skip_group(tokens, i);
        if tokens.get(i).is_some_and(|t| t.is_punct(',')) {
            i += 1;
        } else {
            break;
        }
    }

    ctes
}

/// Given the index of an opening paren, return the index just past its match
fn skip_group(tokens: &[&Token<'_>], open: usize) -> usize {
    let mut depth = 0usize;
    let mut i = open;
    while i < tokens.len() {
        if tokens[i].is_punct('(') {
            depth += 1;
        } else if tokens[i].is_punct(')') {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return i + 1;
            }
        }
        i += 1;
    }
    tokens.len()
}

/// Find top-level LIMIT clauses and check their row count literal
fn check_limit(tokens: &[&Token<'_>], max_rows: u64) -> Result<u64, ValidationResult> {
    let mut depth = 0usize;
    let mut found: Option<u64> = None;

    for (i, token) in tokens.iter().enumerate() {
        if token.is_punct('(') {
            depth += 1;
        } else if token.is_punct(')') {
            depth = depth.saturating_sub(1);
        } else if depth == 0 && token.is_word("LIMIT") {
            let rows = parse_limit_clause(&tokens[i + 1..])?;
            if rows > max_rows {
                return Err(ValidationResult::reject(
                    ValidationReason::LimitTooLarge,
                    Some(format!("LIMIT {} > {}", rows, max_rows)),
                ));
            }
            found = Some(rows);
        }
    }

    found.ok_or_else(|| ValidationResult::reject(ValidationReason::MissingLimit, None))
}

/// Parse `n`, `n OFFSET m` or `offset, n` following a LIMIT keyword
fn parse_limit_clause(rest: &[&Token<'_>]) -> Result<u64, ValidationResult> {
    let first = literal_count(rest.first())?;

    let rows = if rest.get(1).is_some_and(|t| t.is_punct(',')) {
        let count = literal_count(rest.get(2))?;
        ensure_clause_end(rest.get(3))?;
        count
    } else {
        ensure_clause_end(rest.get(1))?;
        first
    };

    Ok(rows)
}

fn literal_count(token: Option<&&Token<'_>>) -> Result<u64, ValidationResult> {
    let token = match token {
        Some(t) if t.kind == TokenKind::Number && t.text.bytes().all(|b| b.is_ascii_digit()) => t,
        Some(t) => {
            return Err(ValidationResult::reject(
                ValidationReason::MissingLimit,
                Some(format!("LIMIT must be a numeric literal, found '{}'", truncate(t.text, 32))),
            ));
        }
        None => {
            return Err(ValidationResult::reject(
                ValidationReason::MissingLimit,
                Some("LIMIT has no value".to_string()),
            ));
        }
    };

    // all digits, so the only failure mode is overflow
    token.text.parse::<u64>().map_err(|_| {
        ValidationResult::reject(
            ValidationReason::LimitTooLarge,
            Some(format!("LIMIT {}", truncate(token.text, 32))),
        )
    })
}

fn ensure_clause_end(next: Option<&&Token<'_>>) -> Result<(), ValidationResult> {
    match next {
        None => Ok(()),
        Some(t) if t.is_punct(';') || t.is_word("OFFSET") => Ok(()),
        Some(t) => Err(ValidationResult::reject(
            ValidationReason::MissingLimit,
            Some(format!(
                "LIMIT must be a numeric literal, found expression near '{}'",
                truncate(t.text, 32)
            )),
        )),
    }
}
