//! Prompt construction for SQL generation and repair

use crate::sql::ValidationResult;

/// Initial SQL generation prompt. The schema text carries names and
/// types only.
pub fn sql_prompt(schema_text: &str, question: &str, max_rows: u64) -> String {
    format!(
        "You translate analytics questions into a single SQLite SELECT statement.\n\
         \n\
         Database schema (table(column TYPE, ...)):\n\
         {schema}\n\
         \n\
         Rules:\n\
         1. Output only the SQL statement, with no explanation.\n\
         2. Use only SELECT (or WITH ... SELECT). Never modify data.\n\
         3. Use only the tables listed above, without schema prefixes.\n\
         4. End the query with LIMIT n where n is a number no greater than {max_rows}.\n\
         5. Use exactly one statement.\n\
         \n\
         Question: {question}\n\
         SQL:",
        schema = schema_text,
        max_rows = max_rows,
        question = question,
    )
}

/// Repair prompt carrying the rejected SQL and why it was rejected
pub fn repair_prompt(
    schema_text: &str,
    question: &str,
    rejected_sql: &str,
    rejection: &ValidationResult,
    max_rows: u64,
) -> String {
    format!(
        "{base}\n\
         \n\
         A previous answer was rejected.\n\
         Rejected SQL:\n\
         {rejected}\n\
         Reason: {code}: {message}\n\
         Write a corrected query that fixes this problem and follows every rule.\n\
         SQL:",
        base = sql_prompt(schema_text, question, max_rows)
            .trim_end_matches("SQL:")
            .trim_end(),
        rejected = rejected_sql,
        code = rejection.reason.code(),
        message = rejection.message(),
    )
}

/// Pull SQL out of model output: trims whitespace and unwraps a
/// markdown code fence when present.
pub fn extract_sql(output: &str) -> String {
    let trimmed = output.trim();

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        // skip the language tag line, e.g. ```sql
        let body = match after.find('\n') {
            Some(nl) if after[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
                &after[nl + 1..]
            }
            _ => after,
        };
        let body = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
        return body.trim().to_string();
    }

    trimmed
        .strip_prefix("SQL:")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| trimmed.to_string())
}
