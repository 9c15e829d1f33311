//! Masking of personal data in answers
//!
//! Query rows and document text can carry contact details that the
//! question never asked for. [`PiiGuard`] masks them before they reach a
//! response or a report prompt.

use crate::retrieval::RetrievalHit;
use crate::sql::QueryRows;
use regex::{Captures, Regex, RegexSet};
use serde_json::Value;
use std::borrow::Cow;

/// `(kind, pattern)`. Card numbers come before phone numbers so a card is
/// masked whole rather than in fragments.
const PII_PATTERNS: &[(&str, &str)] = &[
    ("email", r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
    ("credit_card", r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b"),
    ("resident_id", r"\b\d{6}-[1-8]\d{6}\b"),
    ("ssn", r"\b\d{3}-\d{2}-\d{4}\b"),
    ("mobile_phone", r"\b01[016789]-?\d{3,4}-?\d{4}\b"),
    ("phone", r"\b\d{2,3}-\d{3,4}-\d{4}\b"),
];

const MASK_CHAR: char = '*';

/// Keep two characters at each end of values longer than four
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return MASK_CHAR.to_string().repeat(chars.len());
    }

    let mut masked = String::with_capacity(value.len());
    masked.extend(&chars[..2]);
    masked.extend(std::iter::repeat(MASK_CHAR).take(chars.len() - 4));
    masked.extend(&chars[chars.len() - 2..]);
    masked
}

pub struct PiiGuard {
    set: RegexSet,
    patterns: Vec<(&'static str, Regex)>,
}

impl PiiGuard {
    pub fn new() -> Result<Self, regex::Error> {
        let set = RegexSet::new(PII_PATTERNS.iter().map(|(_, p)| *p))?;
        let patterns = PII_PATTERNS
            .iter()
            .map(|(kind, p)| Regex::new(p).map(|re| (*kind, re)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { set, patterns })
    }

    /// Kinds of personal data found in `text`, in pattern order
    pub fn detect(&self, text: &str) -> Vec<&'static str> {
        self.set
            .matches(text)
            .iter()
            .map(|index| self.patterns[index].0)
            .collect()
    }

    /// `text` with every match masked. Borrowed when nothing matched.
    pub fn mask<'t>(&self, text: &'t str) -> Cow<'t, str> {
        let matched = self.set.matches(text);
        if !matched.matched_any() {
            return Cow::Borrowed(text);
        }

        let mut masked = text.to_string();
        for index in matched.iter() {
            let (_, pattern) = &self.patterns[index];
            masked = pattern
                .replace_all(&masked, |caps: &Captures| mask_value(&caps[0]))
                .into_owned();
        }
        Cow::Owned(masked)
    }

    /// Mask string cells in place, returning how many changed
    pub fn mask_rows(&self, rows: &mut QueryRows) -> usize {
        let mut changed = 0;
        for cell in rows.rows.iter_mut().flatten() {
            let Value::String(text) = cell else {
                continue;
            };
            let masked = match self.mask(text) {
                Cow::Owned(masked) => masked,
                Cow::Borrowed(_) => continue,
            };
            *text = masked;
            changed += 1;
        }
        changed
    }

    /// Mask the source text of each hit, returning how many changed
    pub fn mask_hits(&self, hits: &mut [RetrievalHit]) -> usize {
        let mut changed = 0;
        for hit in hits {
            let masked = match self.mask(&hit.source_text) {
                Cow::Owned(masked) => masked,
                Cow::Borrowed(_) => continue,
            };
            hit.source_text = masked;
            changed += 1;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_value_keeps_ends() {
        assert_eq!(mask_value("010-1234-5678"), "01*********78");
        assert_eq!(mask_value("abcd"), "****");
        assert_eq!(mask_value("홍길동님안녕"), "홍길**안녕");
    }

    #[test]
    fn test_contact_details_masked() {
        let guard = PiiGuard::new().unwrap();
        let text = "Call 010-1234-5678 or mail owner@cafe.example.com about store 12";
        let masked = guard.mask(text);

        assert!(!masked.contains("010-1234-5678"));
        assert!(!masked.contains("owner@cafe.example.com"));
        assert!(masked.contains("store 12"));
        let kinds = guard.detect(text);
        assert!(kinds.contains(&"email"));
        assert!(kinds.contains(&"mobile_phone"));
    }

    #[test]
    fn test_card_masked_whole() {
        let guard = PiiGuard::new().unwrap();
        let masked = guard.mask("card 1234-5678-9012-3456 on file");
        assert_eq!(masked, "card 12***************56 on file");
    }

    #[test]
    fn test_ids_masked() {
        let guard = PiiGuard::new().unwrap();
        assert_eq!(guard.mask("ssn 123-45-6789"), "ssn 12*******89");
        assert!(!guard.mask("id 900101-1234567").contains("1234567"));
    }

    #[test]
    fn test_business_values_untouched() {
        let guard = PiiGuard::new().unwrap();
        for text in ["2024-01-15", "Gangnam-gu", "sales rose 12.5% to 1200000", "region 7"] {
            assert!(matches!(guard.mask(text), Cow::Borrowed(_)), "{} was masked", text);
            assert!(guard.detect(text).is_empty());
        }
    }

    #[test]
    fn test_mask_rows_only_touches_strings() {
        let guard = PiiGuard::new().unwrap();
        let mut rows = QueryRows {
            columns: vec!["store".to_string(), "contact".to_string(), "sales".to_string()],
            rows: vec![
                vec![
                    Value::from("North"),
                    Value::from("north@shop.example.org"),
                    Value::from(1200.0),
                ],
                vec![Value::from("South"), Value::Null, Value::from(950.0)],
            ],
            truncated: false,
        };

        assert_eq!(guard.mask_rows(&mut rows), 1);
        assert_eq!(rows.rows[0][0], "North");
        assert_ne!(rows.rows[0][1], "north@shop.example.org");
        assert_eq!(rows.rows[0][2], 1200.0);
    }
}
