//! PII detector (C2). Fixed pattern catalog + column-hint dictionary,
//! grounded in `intelligence/core/pii.py`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use utoipa::ToSchema;

const SAMPLE_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PiiType {
    Ssn,
    Phone,
    Email,
    CreditCard,
    DateOfBirth,
    IpAddress,
    MedicalRecord,
}

impl PiiType {
    fn as_str(&self) -> &'static str {
        match self {
            PiiType::Ssn => "ssn",
            PiiType::Phone => "phone",
            PiiType::Email => "email",
            PiiType::CreditCard => "credit_card",
            PiiType::DateOfBirth => "date_of_birth",
            PiiType::IpAddress => "ip_address",
            PiiType::MedicalRecord => "medical_record",
        }
    }
}

struct Pattern {
    pii_type: PiiType,
    regex: Regex,
}

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    let defs: &[(PiiType, &str)] = &[
        (PiiType::Ssn, r"\b\d{3}-\d{2}-\d{4}\b"),
        (PiiType::Ssn, r"\b\d{3}\s\d{2}\s\d{4}\b"),
        (PiiType::Ssn, r"\b\d{9}\b"),
        (PiiType::Phone, r"\b\(\d{3}\)\s?\d{3}-\d{4}\b"),
        (PiiType::Phone, r"\b\d{3}-\d{3}-\d{4}\b"),
        (PiiType::Email, r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
        (PiiType::CreditCard, r"\b4\d{3}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b"),
        (PiiType::CreditCard, r"\b5[1-5]\d{2}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b"),
        (PiiType::CreditCard, r"\b3[47]\d{2}[- ]?\d{6}[- ]?\d{5}\b"),
        (PiiType::CreditCard, r"\b6(?:011|5\d{2})[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b"),
        (PiiType::DateOfBirth, r"\b(0[1-9]|1[0-2])/(0[1-9]|[12]\d|3[01])/(19|20)\d{2}\b"),
        (
            PiiType::IpAddress,
            r"\b(?:(?:25[0-5]|2[0-4]\d|[01]?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|[01]?\d?\d)\b",
        ),
        (PiiType::MedicalRecord, r"\bMRN[-:]?\s?\d{6,10}\b"),
        (PiiType::MedicalRecord, r"\bPAT[-:]?\d{6,10}\b"),
    ];
    defs.iter()
        .map(|(t, p)| Pattern { pii_type: *t, regex: Regex::new(p).unwrap() })
        .collect()
});

static COLUMN_HINTS: Lazy<HashMap<PiiType, Vec<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        (PiiType::Ssn, vec!["ssn", "social_security", "social_security_number"]),
        (PiiType::Phone, vec!["phone", "telephone", "mobile", "cell"]),
        (PiiType::Email, vec!["email", "email_address"]),
        (PiiType::CreditCard, vec!["credit_card", "card_number", "cc_number"]),
        (PiiType::DateOfBirth, vec!["dob", "date_of_birth", "birth_date", "birthdate"]),
        (PiiType::IpAddress, vec!["ip", "ip_address"]),
        (PiiType::MedicalRecord, vec!["mrn", "patient_id", "medical_record_number"]),
    ])
});

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PiiSummary {
    pub total: usize,
    pub records_with_pii: usize,
    pub counts_by_type: HashMap<String, usize>,
    pub columns_with_pii: Vec<String>,
    pub sample_matches: Vec<String>,
    pub warnings: Vec<String>,
}

/// Scan a batch of records (flattened scalar maps). Also inspects column
/// names against the hint dictionary and warns even when values don't
/// match, once per column.
pub fn scan_records(records: &[Map<String, Value>]) -> PiiSummary {
    let mut summary = PiiSummary::default();
    let mut records_with_pii: HashSet<usize> = HashSet::new();
    let mut columns_with_pii: HashSet<String> = HashSet::new();
    let mut warned_columns: HashSet<String> = HashSet::new();

    for (row_idx, record) in records.iter().enumerate() {
        for (column, value) in record {
            let Some(text) = value_to_str(value) else { continue };

            for pattern in PATTERNS.iter() {
                if pattern.regex.is_match(&text) {
                    summary.total += 1;
                    records_with_pii.insert(row_idx);
                    columns_with_pii.insert(column.clone());
                    *summary.counts_by_type.entry(pattern.pii_type.as_str().to_string()).or_insert(0) += 1;
                    if summary.sample_matches.len() < SAMPLE_LIMIT {
                        summary.sample_matches.push(format!("{column}: {}", mask_value(pattern.pii_type, &text)));
                    }
                }
            }

            if !warned_columns.contains(column) {
                let lower = column.to_lowercase();
                for (pii_type, hints) in COLUMN_HINTS.iter() {
                    if hints.iter().any(|h| lower.contains(h)) {
                        summary.warnings.push(format!(
                            "column '{column}' name suggests {} data",
                            pii_type.as_str()
                        ));
                        warned_columns.insert(column.clone());
                        break;
                    }
                }
            }
        }
    }

    summary.records_with_pii = records_with_pii.len();
    summary.columns_with_pii = {
        let mut v: Vec<String> = columns_with_pii.into_iter().collect();
        v.sort();
        v
    };
    summary
}

/// Rewrite matched spans, preserving last-4 digits (SSN/phone/cards), first
/// char + domain (email), first-3-octets (IP), else first char.
pub fn mask_value(pii_type: PiiType, value: &str) -> String {
    match pii_type {
        PiiType::Ssn => {
            let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.len() >= 4 {
                format!("***-**-{}", &digits[digits.len() - 4..])
            } else {
                "***".to_string()
            }
        },
        PiiType::Phone | PiiType::CreditCard => {
            let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.len() >= 4 {
                let last4 = &digits[digits.len() - 4..];
                if pii_type == PiiType::Phone {
                    format!("***-***-{last4}")
                } else {
                    format!("****-****-****-{last4}")
                }
            } else {
                "****".to_string()
            }
        },
        PiiType::Email => {
            if let Some((local, domain)) = value.split_once('@') {
                let first = local.chars().next().unwrap_or('*');
                format!("{first}***@{domain}")
            } else {
                "***".to_string()
            }
        },
        PiiType::IpAddress => {
            let parts: Vec<&str> = value.split('.').collect();
            if parts.len() == 4 {
                format!("{}.{}.{}.***", parts[0], parts[1], parts[2])
            } else {
                "***".to_string()
            }
        },
        PiiType::DateOfBirth | PiiType::MedicalRecord => {
            let first = value.chars().next().unwrap_or('*');
            format!("{first}{}", "*".repeat(value.len().saturating_sub(1)))
        },
    }
}

/// Apply masking to every matched span across a batch of records.
pub fn mask_records(records: &[Map<String, Value>]) -> Vec<Map<String, Value>> {
    records
        .iter()
        .map(|record| {
            let mut masked = record.clone();
            for (_column, value) in masked.iter_mut() {
                let Some(text) = value_to_str(value) else { continue };
                let mut replaced = text.clone();
                for pattern in PATTERNS.iter() {
                    if pattern.regex.is_match(&text) {
                        let masked_value = mask_value(pattern.pii_type, &text);
                        replaced = pattern.regex.replace_all(&replaced, masked_value.as_str()).to_string();
                    }
                }
                if replaced != text {
                    *value = Value::String(replaced);
                }
            }
            masked
        })
        .collect()
}

fn value_to_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn detects_ssn_and_email() {
        let records = vec![record(&[
            ("ssn", json!("123-45-6789")),
            ("email", json!("j@x.com")),
        ])];
        let summary = scan_records(&records);
        assert_eq!(summary.records_with_pii, 1);
        assert!(summary.counts_by_type.contains_key("ssn"));
        assert!(summary.counts_by_type.contains_key("email"));
    }

    #[test]
    fn masks_ssn_and_email_per_spec_example() {
        assert_eq!(mask_value(PiiType::Ssn, "123-45-6789"), "***-**-6789");
        assert_eq!(mask_value(PiiType::Email, "j@x.com"), "j***@x.com");
    }

    #[test]
    fn warns_on_column_name_hint_without_a_match() {
        let records = vec![record(&[("ssn", json!("not-a-match-at-all"))])];
        let summary = scan_records(&records);
        assert!(summary.warnings.iter().any(|w| w.contains("ssn")));
    }
}
