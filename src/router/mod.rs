//! Intent routing: decide whether a question needs SQL, document
//! retrieval, or both
//!
//! Scoring is keyword and pattern based. Each side has weighted keyword
//! groups (high 1.0, medium 0.6, low 0.3) plus regex patterns worth 0.3
//! each; both parts are capped at 1.0.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    Sql,
    Retrieval,
    Mixed,
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryMode::Sql => write!(f, "sql"),
            QueryMode::Retrieval => write!(f, "retrieval"),
            QueryMode::Mixed => write!(f, "mixed"),
        }
    }
}

impl std::str::FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sql" => Ok(QueryMode::Sql),
            "retrieval" | "rag" | "search" => Ok(QueryMode::Retrieval),
            "mixed" | "report" => Ok(QueryMode::Mixed),
            other => Err(format!("unknown mode '{}' (expected sql, retrieval or mixed)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub mode: QueryMode,
    pub confidence: f32,
    pub reasoning: Vec<String>,
}

/// Which paths can currently serve a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub sql: bool,
    pub retrieval: bool,
}

impl Default for Availability {
    fn default() -> Self {
        Self {
            sql: true,
            retrieval: true,
        }
    }
}

struct KeywordGroups {
    high: &'static [&'static str],
    medium: &'static [&'static str],
    low: &'static [&'static str],
}

const SQL_KEYWORDS: KeywordGroups = KeywordGroups {
    high: &[
        "sales", "revenue", "transaction", "transactions", "statistics", "data",
        "매출", "거래", "데이터", "통계", "수치", "추이",
        "강남구", "서초구", "송파구", "마포구", "소매업", "음식점업", "카페",
    ],
    medium: &[
        "how much", "how many", "which", "top", "total", "average", "highest", "lowest",
        "monthly", "daily", "yearly", "per", "sum", "count",
        "얼마", "몇", "가장", "최고", "최대", "최소", "평균", "월별", "일별", "년별",
    ],
    low: &[
        "show", "list", "find", "query",
        "보여", "알려", "조회",
    ],
};

const RETRIEVAL_KEYWORDS: KeywordGroups = KeywordGroups {
    high: &[
        "policy", "policies", "trend", "trends", "insight", "insights", "document",
        "documents", "guide", "government", "support", "strategy", "regulation",
        "정책", "동향", "인사이트", "문서", "정보", "가이드", "정부", "지원", "제도", "전략",
    ],
    medium: &[
        "how", "when", "where", "what", "method", "procedure", "process",
        "어떻게", "언제", "어디서", "무엇", "방법", "절차",
    ],
    low: &[
        "explain", "overview", "concept", "describe",
        "설명", "소개", "개요", "개념",
    ],
};

const MIXED_KEYWORDS: &[&str] = &[
    "report", "why", "comprehensive", "integrated", "analyze and", "explain why",
    "보고서", "종합", "통합", "왜", "분석하고",
];

const SQL_PATTERNS: &[&str] = &[
    r"(sales|revenue).*\b(19|20)\d{2}\b",
    r"\b(19|20)\d{2}\b.*(sales|revenue)",
    r"\btop\s+\d+\b",
    r"(\d+년|\d+월).*매출",
    r"월별.*추이",
    r"최대.*매출.*지역",
];

const RETRIEVAL_PATTERNS: &[&str] = &[
    r"(policy|policies).*(trend|support)",
    r"정책.*동향",
    r"지원.*제도",
    r"전략.*계획",
];

const MIXED_PATTERNS: &[&str] = &[
    r"compar\w*.*\bwith\b",
    r"분석.*인사이트",
    r"검토.*보고서",
];

/// Both sides at or above this pick `Mixed`
const STRONG_SIGNAL: f32 = 0.6;

pub struct IntentRouter {
    sql_patterns: Vec<Regex>,
    retrieval_patterns: Vec<Regex>,
    mixed_patterns: Vec<Regex>,
}

fn compile(patterns: &[&str]) -> Result<Vec<Regex>, regex::Error> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){}", p)))
        .collect()
}

/// ASCII terms must match on word boundaries ("how" is not in "show");
/// Hangul terms match as substrings since particles attach directly.
fn contains_term(text: &str, term: &str) -> bool {
    if !term.is_ascii() {
        return text.contains(term);
    }
    text.match_indices(term).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + term.len()..].chars().next();
        !before.is_some_and(|c| c.is_alphanumeric()) && !after.is_some_and(|c| c.is_alphanumeric())
    })
}

fn keyword_score(text: &str, groups: &KeywordGroups, matched: &mut Vec<&'static str>) -> f32 {
    let mut score = 0.0;
    for (terms, weight) in [(groups.high, 1.0), (groups.medium, 0.6), (groups.low, 0.3)] {
        for &term in terms {
            if contains_term(text, term) {
                score += weight;
                matched.push(term);
            }
        }
    }
    f32::min(score, 1.0)
}

fn pattern_score(text: &str, patterns: &[Regex]) -> f32 {
    let matches = patterns.iter().filter(|p| p.is_match(text)).count();
    f32::min(matches as f32 * 0.3, 1.0)
}

impl IntentRouter {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            sql_patterns: compile(SQL_PATTERNS)?,
            retrieval_patterns: compile(RETRIEVAL_PATTERNS)?,
            mixed_patterns: compile(MIXED_PATTERNS)?,
        })
    }

    pub fn route(&self, question: &str) -> RoutingDecision {
        self.route_with(question, Availability::default())
    }

    /// Route, then steer away from a path that cannot serve the request
    pub fn route_with(&self, question: &str, availability: Availability) -> RoutingDecision {
        let mut decision = self.score(question);

        match (availability.sql, availability.retrieval) {
            (false, true) if decision.mode != QueryMode::Retrieval => {
                decision.mode = QueryMode::Retrieval;
                decision.reasoning.push("SQL path unavailable".to_string());
            }
            (true, false) if decision.mode != QueryMode::Sql => {
                decision.mode = QueryMode::Sql;
                decision.reasoning.push("retrieval path unavailable".to_string());
            }
            _ => {}
        }

        debug!(
            "Routed to {} (confidence {:.2})",
            decision.mode, decision.confidence
        );
        decision
    }

    fn score(&self, question: &str) -> RoutingDecision {
        let text = question.to_lowercase();
        let mut reasoning = Vec::new();

        let mut sql_terms = Vec::new();
        let sql = f32::min(
            keyword_score(&text, &SQL_KEYWORDS, &mut sql_terms) + pattern_score(&text, &self.sql_patterns),
            1.0,
        );
        let mut retrieval_terms = Vec::new();
        let retrieval = f32::min(
            keyword_score(&text, &RETRIEVAL_KEYWORDS, &mut retrieval_terms)
                + pattern_score(&text, &self.retrieval_patterns),
            1.0,
        );

        if !sql_terms.is_empty() {
            reasoning.push(format!("sql terms: {}", sql_terms.join(", ")));
        }
        if !retrieval_terms.is_empty() {
            reasoning.push(format!("retrieval terms: {}", retrieval_terms.join(", ")));
        }

        let mixed_term = MIXED_KEYWORDS.iter().find(|t| contains_term(&text, t));
        let mixed_pattern = self.mixed_patterns.iter().any(|p| p.is_match(&text));

        let (mode, confidence) = if let Some(term) = mixed_term {
            reasoning.push(format!("mixed keyword: {}", term));
            (QueryMode::Mixed, f32::max(0.8, sql.min(retrieval)))
        } else if mixed_pattern {
            reasoning.push("comparison pattern".to_string());
            (QueryMode::Mixed, 0.7)
        } else if sql >= STRONG_SIGNAL && retrieval >= STRONG_SIGNAL {
            reasoning.push(format!("strong signals on both sides ({:.2}/{:.2})", sql, retrieval));
            (QueryMode::Mixed, sql.min(retrieval))
        } else if sql > retrieval {
            (QueryMode::Sql, sql)
        } else if retrieval > sql {
            (QueryMode::Retrieval, retrieval)
        } else {
            reasoning.push("no clear intent".to_string());
            (QueryMode::Mixed, sql)
        };

        RoutingDecision {
            mode,
            confidence,
            reasoning,
        }
    }
}
