//! SQL guard integration tests
//!
//! Runs the safety policy against the shipped schema template with the
//! default SQL configuration.

use std::sync::Arc;
use quarry::config::SqlConfig;
use quarry::schema::{SchemaDescriptor, SchemaRegistry};
use quarry::sql::{SqlGuard, ValidationReason};

fn guard() -> SqlGuard {
    let descriptor =
        SchemaDescriptor::from_toml_str(include_str!("../config-templates/schema.toml")).unwrap();
    let config = SqlConfig::default();
    let registry = SchemaRegistry::new(descriptor, config.allowed_tables.as_deref()).unwrap();
    SqlGuard::new(Arc::new(registry), &config)
}

#[test]
fn test_reporting_queries_accepted() {
    let guard = guard();

    let accepted = [
        "SELECT r.region_name, SUM(s.sales_amt) AS total \
         FROM sales_2024 s JOIN regions r ON r.region_id = s.region_id \
         GROUP BY r.region_name ORDER BY total DESC LIMIT 5",
        "WITH totals AS (SELECT region_id, SUM(sales_amt) AS t FROM sales_2024 GROUP BY region_id) \
         SELECT * FROM totals ORDER BY t DESC LIMIT 10;",
        "select industry_name from industries where sector = 'Retail; Food' limit 100",
        "SELECT f.store_count FROM features f WHERE f.region_id IN (SELECT region_id FROM regions LIMIT 3) LIMIT 1000",
    ];

    for sql in accepted {
        let result = guard.validate(sql, None);
        assert!(result.accepted, "{} rejected: {}", sql, result.message());
    }
    println!("✓ {} reporting queries accepted", accepted.len());
}

#[test]
fn test_unsafe_queries_rejected_with_reason() {
    let guard = guard();

    let cases = [
        ("SELECT * FROM regions LIMIT 5; DROP TABLE regions", ValidationReason::MultiStatement),
        ("DELETE FROM sales_2024", ValidationReason::NotSelect),
        ("UPDATE regions SET region_name = 'x'", ValidationReason::NotSelect),
        (
            "SELECT * FROM regions WHERE region_name IN (SELECT name FROM sqlite_master) LIMIT 5",
            ValidationReason::TableNotAllowed,
        ),
        ("SELECT * FROM users LIMIT 5", ValidationReason::TableNotAllowed),
        ("SELECT * FROM information_schema.tables LIMIT 5", ValidationReason::ForbiddenKeyword),
        ("SELECT * FROM regions", ValidationReason::MissingLimit),
        ("SELECT * FROM regions LIMIT 5000", ValidationReason::LimitTooLarge),
    ];

    for (sql, expected) in cases {
        let result = guard.validate(sql, None);
        assert!(!result.accepted, "{} was accepted", sql);
        assert_eq!(result.reason, expected, "wrong reason for {}", sql);
    }
    println!("✓ {} unsafe queries rejected", cases.len());
}

#[test]
fn test_requested_rows_tighten_limit() {
    let guard = guard();
    let sql = "SELECT * FROM regions LIMIT 50";

    assert!(guard.validate(sql, None).accepted);
    assert_eq!(
        guard.validate(sql, Some(10)).reason,
        ValidationReason::LimitTooLarge
    );
    // asking for more than the cap never loosens it
    assert_eq!(guard.effective_limit(Some(1_000_000)), guard.max_result_rows());
}

#[test]
fn test_overlong_query_rejected_first() {
    let guard = guard();
    let padding = " ".repeat(SqlConfig::default().max_query_length);
    let sql = format!("SELECT * FROM regions{} LIMIT 5; DROP TABLE regions", padding);

    let result = guard.validate(&sql, None);
    assert_eq!(result.reason, ValidationReason::QueryTooLong);
}

#[test]
fn test_candidate_carries_tables_and_limit() {
    let guard = guard();
    let candidate = guard
        .check(
            "SELECT r.region_name FROM regions r JOIN sales_2024 s ON s.region_id = r.region_id LIMIT 20",
            None,
        )
        .unwrap();

    assert_eq!(candidate.referenced_tables(), ["regions", "sales_2024"]);
    assert_eq!(candidate.limit(), 20);
}
