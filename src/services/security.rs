//! Security validator (C1): pure predicates for identifiers, queries, and
//! limits. Grounded in `intelligence/core/security.py`. No suspension
//! points here — spec.md §5 calls this out explicitly.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::utils::ApiError;

pub const MAX_IDENTIFIER_LENGTH: usize = 128;
pub const MAX_SQL_LENGTH: usize = 10_000;
pub const DEFAULT_MAX_LIMIT: i64 = 10_000;

static IDENTIFIER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

static RESERVED_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "select", "insert", "update", "delete", "drop", "create", "alter", "table", "index",
        "where", "from", "join", "union", "order", "group", "having", "limit", "offset", "and",
        "or", "not", "null", "true", "false", "as", "on", "in", "is", "like", "between", "exists",
        "case", "when", "then", "else", "end", "begin", "commit", "rollback", "transaction",
        "pragma", "attach", "detach", "vacuum", "analyze", "explain",
    ]
    .into_iter()
    .collect()
});

static FORBIDDEN_KEYWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "DROP", "DELETE", "INSERT", "UPDATE", "ALTER", "CREATE", "TRUNCATE", "REPLACE", "ATTACH",
        "DETACH",
    ]
});

/// `^[A-Za-z_][A-Za-z0-9_]*$`, length <= 128, not a reserved keyword.
pub fn validate_identifier(name: &str) -> Result<(), ApiError> {
    if name.is_empty() {
        return Err(ApiError::validation("identifier cannot be empty"));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ApiError::validation(format!(
            "identifier exceeds maximum length of {MAX_IDENTIFIER_LENGTH}"
        )));
    }
    if !IDENTIFIER_PATTERN.is_match(name) {
        return Err(ApiError::validation(format!(
            "identifier '{name}' contains invalid characters"
        )));
    }
    if RESERVED_KEYWORDS.contains(name.to_lowercase().as_str()) {
        return Err(ApiError::validation(format!("identifier '{name}' is a reserved keyword")));
    }
    Ok(())
}

pub fn validate_table_name(name: &str) -> Result<(), ApiError> {
    validate_identifier(name)
}

pub fn validate_column_name(name: &str) -> Result<(), ApiError> {
    validate_identifier(name)
}

/// Replace bad characters with `_`, prefix a digit-start, append a suffix on
/// keyword collision. Never fails — always produces a valid identifier.
pub fn sanitize_identifier(name: &str) -> String {
    let mut cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    cleaned = cleaned.trim_matches('_').to_string();
    cleaned = cleaned.to_lowercase();

    if cleaned.is_empty() {
        cleaned = "table_data".to_string();
    }

    if cleaned.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        cleaned = format!("t_{cleaned}");
    }

    if cleaned.len() > MAX_IDENTIFIER_LENGTH {
        cleaned.truncate(MAX_IDENTIFIER_LENGTH);
    }

    if RESERVED_KEYWORDS.contains(cleaned.as_str()) {
        cleaned = format!("{cleaned}_table");
    }

    cleaned
}

pub fn sanitize_table_name(name: &str) -> String {
    sanitize_identifier(name)
}

/// Double-quote, double any embedded quote.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Non-empty, length-bounded, starts with `SELECT` (unless `allow_write`),
/// no forbidden keyword as a whole word, no `--`/`/* */` comments, no
/// embedded `;` other than a single trailing one.
pub fn validate_sql_query(sql: &str, allow_write: bool) -> Result<(), ApiError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation("SQL query cannot be empty"));
    }
    if trimmed.len() > MAX_SQL_LENGTH {
        return Err(ApiError::validation(format!(
            "SQL query exceeds maximum length of {MAX_SQL_LENGTH}"
        )));
    }

    if !allow_write && !trimmed.to_uppercase().starts_with("SELECT") {
        return Err(ApiError::unsafe_query("only SELECT statements are permitted"));
    }

    if !allow_write {
        let upper = trimmed.to_uppercase();
        for keyword in FORBIDDEN_KEYWORDS.iter() {
            let pattern = format!(r"\b{keyword}\b");
            if Regex::new(&pattern).unwrap().is_match(&upper) {
                return Err(ApiError::unsafe_query(format!(
                    "forbidden keyword '{keyword}' in query"
                )));
            }
        }
    }

    if trimmed.contains("--") || trimmed.contains("/*") {
        return Err(ApiError::unsafe_query("comments are not permitted in queries"));
    }

    let without_trailing = trimmed.trim_end().trim_end_matches(';');
    if without_trailing.contains(';') {
        return Err(ApiError::unsafe_query("only a single statement is permitted"));
    }

    Ok(())
}

/// Non-negative, clamped to `max_limit`.
pub fn validate_limit(limit: i64, max_limit: i64) -> i64 {
    if limit < 0 { 0 } else { limit.min(max_limit) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(validate_identifier("vin").is_ok());
        assert!(validate_identifier("_leading").is_ok());
    }

    #[test]
    fn rejects_reserved_keywords() {
        assert!(validate_identifier("select").is_err());
        assert!(validate_identifier("TABLE").is_err());
    }

    #[test]
    fn sanitizes_digit_start_and_collisions() {
        assert_eq!(sanitize_identifier("2020 Sales!"), "t_2020_sales");
        assert_eq!(sanitize_identifier("select"), "select_table");
        assert_eq!(sanitize_identifier(""), "table_data");
    }

    #[test]
    fn rejects_write_statements() {
        let result = validate_sql_query("DROP TABLE inventory", false);
        assert!(result.is_err());
        assert!(format!("{}", result.unwrap_err()).to_lowercase().contains("select"));
    }

    #[test]
    fn rejects_multi_statement_and_comments() {
        assert!(validate_sql_query("SELECT 1; SELECT 2", false).is_err());
        assert!(validate_sql_query("SELECT 1 -- comment", false).is_err());
        assert!(validate_sql_query("SELECT 1;", false).is_ok());
    }

    #[test]
    fn clamps_limit() {
        assert_eq!(validate_limit(-5, 100), 0);
        assert_eq!(validate_limit(50, 100), 50);
        assert_eq!(validate_limit(500, 100), 100);
    }
}
