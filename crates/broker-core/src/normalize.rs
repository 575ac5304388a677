//! SQL Normalizer (module A).
//!
//! Strips blank lines, drops standalone `GO` batch separators and
//! `USE <db>` statements (both case-insensitive), then hashes the
//! normalized text so identical queries share a `sql_hash` regardless
//! of incidental whitespace or batch-separator differences.

use sha2::{Digest, Sha256};

/// Normalize raw SQL text the way the worker and broker both expect it:
/// one statement per retained line, no blank lines, no `GO` separators,
/// no `USE` statements.
pub fn normalize_sql(raw: &str) -> String {
    raw.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !is_go_line(line))
        .filter(|line| !is_use_line(line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_go_line(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("go")
}

fn is_use_line(line: &str) -> bool {
    line.trim_start()
        .get(..4)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("use "))
}

/// SHA-256 hex digest of the normalized SQL text.
pub fn sql_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_blank_lines() {
        let sql = "SELECT 1\n\n\nSELECT 2\n";
        assert_eq!(normalize_sql(sql), "SELECT 1\nSELECT 2");
    }

    #[test]
    fn drops_go_separators_case_insensitively() {
        let sql = "SELECT 1\nGO\nselect 2\ngo\nSELECT 3\nGo";
        assert_eq!(normalize_sql(sql), "SELECT 1\nselect 2\nSELECT 3");
    }

    #[test]
    fn drops_use_statements_case_insensitively() {
        let sql = "USE master\nSELECT 1\nuse OtherDb\nSELECT 2";
        assert_eq!(normalize_sql(sql), "SELECT 1\nSELECT 2");
    }

    #[test]
    fn does_not_drop_lines_merely_containing_go_or_use_as_substrings() {
        let sql = "SELECT goal, usecase FROM t";
        assert_eq!(normalize_sql(sql), "SELECT goal, usecase FROM t");
    }

    #[test]
    fn hash_is_stable_for_equivalent_input() {
        let a = normalize_sql("SELECT 1\nGO\n");
        let b = normalize_sql("SELECT 1\n\nGO");
        assert_eq!(sql_hash(&a), sql_hash(&b));
    }

    #[test]
    fn hash_differs_for_different_sql() {
        let a = sql_hash(&normalize_sql("SELECT 1"));
        let b = sql_hash(&normalize_sql("SELECT 2"));
        assert_ne!(a, b);
    }
}
