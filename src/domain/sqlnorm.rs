//! SQL normalization and table extraction.
//!
//! Normalization strips comments outside string literals, collapses
//! whitespace, uppercases everything outside strings, replaces host
//! variables (`:name`) with `:?`, and trims a trailing semicolon. Running
//! the normalizer twice yields the same string.

use std::collections::HashSet;

use crate::domain::ir::{RwType, SqlKind, TableUsage};

/// A normalized statement with its classification and table references.
#[derive(Debug, Clone)]
pub struct NormalizedSql {
    pub kind: SqlKind,
    pub text: String,
    pub tables: Vec<TableUsage>,
}

/// Normalize a raw SQL text. See the module doc for the exact steps.
pub fn normalize(raw: &str) -> String {
    fn push_pending(out: &mut String, pending_space: &mut bool) {
        if *pending_space && !out.is_empty() {
            out.push(' ');
        }
        *pending_space = false;
    }

    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    let mut pos = 0;
    let mut pending_space = false;

    while pos < bytes.len() {
        let byte = bytes[pos];
        match byte {
            b' ' | b'\t' | b'\r' | b'\n' => {
                pending_space = true;
                pos += 1;
            }
            b'-' if bytes.get(pos + 1) == Some(&b'-') => {
                while pos < bytes.len() && bytes[pos] != b'\n' {
                    pos += 1;
                }
                pending_space = true;
            }
            b'/' if bytes.get(pos + 1) == Some(&b'*') => {
                pos += 2;
                while pos < bytes.len() {
                    if bytes[pos] == b'*' && bytes.get(pos + 1) == Some(&b'/') {
                        pos += 2;
                        break;
                    }
                    pos += 1;
                }
                pending_space = true;
            }
            b'\'' | b'"' => {
                push_pending(&mut out, &mut pending_space);
                let quote = byte;
                out.push(quote as char);
                pos += 1;
                while pos < bytes.len() {
                    let inner = bytes[pos];
                    out.push(inner as char);
                    pos += 1;
                    if inner == quote {
                        if bytes.get(pos) == Some(&quote) {
                            out.push(quote as char);
                            pos += 1;
                            continue;
                        }
                        break;
                    }
                }
            }
            b':' if bytes
                .get(pos + 1)
                .map(|b| b.is_ascii_alphabetic() || *b == b'_')
                .unwrap_or(false) =>
            {
                push_pending(&mut out, &mut pending_space);
                out.push_str(":?");
                pos += 1;
                while pos < bytes.len()
                    && (bytes[pos].is_ascii_alphanumeric()
                        || bytes[pos] == b'_'
                        || bytes[pos] == b'$'
                        || bytes[pos] == b'#')
                {
                    pos += 1;
                }
            }
            _ => {
                push_pending(&mut out, &mut pending_space);
                out.push(byte.to_ascii_uppercase() as char);
                pos += 1;
            }
        }
    }

    let trimmed = out.trim().trim_end_matches(';').trim_end();
    trimmed.to_string()
}

/// Classify a normalized statement by its first keyword.
pub fn infer_kind(norm: &str) -> SqlKind {
    match norm.split_whitespace().next() {
        Some("SELECT") => SqlKind::Select,
        Some("INSERT") => SqlKind::Insert,
        Some("UPDATE") => SqlKind::Update,
        Some("DELETE") => SqlKind::Delete,
        Some("MERGE") => SqlKind::Merge,
        _ => SqlKind::Other,
    }
}

/// Normalize, classify, and extract table references in one pass.
/// `exceptions` holds lower-case table names suppressed from emission.
pub fn analyze_statement(raw: &str, exceptions: &HashSet<String>) -> NormalizedSql {
    let text = normalize(raw);
    let kind = infer_kind(&text);
    let tables = extract_tables(kind, &text, exceptions);
    NormalizedSql { kind, text, tables }
}

/// Tokens of a normalized statement: identifiers (schema dots kept inside),
/// punctuation, and opaque string literals.
fn sql_words(norm: &str) -> Vec<String> {
    let bytes = norm.as_bytes();
    let mut words = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let byte = bytes[pos];
        if byte == b' ' {
            pos += 1;
        } else if byte == b'\'' || byte == b'"' {
            let quote = byte;
            let start = pos;
            pos += 1;
            while pos < bytes.len() {
                let inner = bytes[pos];
                pos += 1;
                if inner == quote {
                    if bytes.get(pos) == Some(&quote) {
                        pos += 1;
                        continue;
                    }
                    break;
                }
            }
            words.push(String::from_utf8_lossy(&bytes[start..pos]).into_owned());
        } else if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b':' {
            let start = pos;
            while pos < bytes.len()
                && (bytes[pos].is_ascii_alphanumeric()
                    || matches!(bytes[pos], b'_' | b'$' | b'#' | b'.' | b':' | b'?'))
            {
                pos += 1;
            }
            words.push(String::from_utf8_lossy(&bytes[start..pos]).into_owned());
        } else {
            words.push((byte as char).to_string());
            pos += 1;
        }
    }
    words
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#' | '.'))
}

/// Lower-case bare table name with any schema prefix stripped.
fn bare_table_name(word: &str) -> String {
    word.rsplit('.').next().unwrap_or(word).to_lowercase()
}

/// Keywords that end a FROM/JOIN table list.
const CLAUSE_STOPS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "HAVING", "UNION", "ON", "SET", "INNER",
    "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "JOIN", "USING", "VALUES",
    "SELECT", "FROM", "INTO", "WHEN", "MATCHED",
];

fn is_clause_stop(word: &str) -> bool {
    CLAUSE_STOPS.contains(&word)
}

/// Collect READ tables after every FROM/JOIN in the word stream.
fn collect_from_join_reads(words: &[String], out: &mut Vec<TableUsage>) {
    let mut idx = 0;
    while idx < words.len() {
        let word = words[idx].as_str();
        if word == "FROM" || word == "JOIN" {
            idx += 1;
            // comma-separated table list; aliases are dropped
            loop {
                // a parenthesized sub-select is handled by the outer scan
                while idx < words.len() && words[idx] == "(" {
                    idx += 1;
                }
                if idx >= words.len() {
                    return;
                }
                let candidate = words[idx].as_str();
                if !is_identifier(candidate) || is_clause_stop(candidate) {
                    break;
                }
                push_usage(out, candidate, RwType::Read);
                idx += 1;

                // optional alias, with or without AS
                if idx < words.len() && words[idx] == "AS" {
                    idx += 1;
                }
                if idx < words.len()
                    && is_identifier(&words[idx])
                    && !is_clause_stop(&words[idx])
                {
                    idx += 1;
                }
                if idx < words.len() && words[idx] == "," {
                    idx += 1;
                    continue;
                }
                break;
            }
        } else {
            idx += 1;
        }
    }
}

/// The identifier immediately following `marker`, if any.
fn identifier_after(words: &[String], marker: &str) -> Option<String> {
    let mut iter = words.iter();
    while let Some(word) = iter.next() {
        if word == marker {
            return iter
                .next()
                .filter(|next| is_identifier(next))
                .map(|next| next.to_string());
        }
    }
    None
}

/// The identifier after the two-word marker `first second`.
fn identifier_after_pair(words: &[String], first: &str, second: &str) -> Option<String> {
    for idx in 0..words.len().saturating_sub(2) {
        if words[idx] == first && words[idx + 1] == second {
            let candidate = &words[idx + 2];
            if is_identifier(candidate) {
                return Some(candidate.to_string());
            }
            return None;
        }
    }
    None
}

fn push_usage(out: &mut Vec<TableUsage>, word: &str, rw_type: RwType) {
    let table_name = bare_table_name(word);
    if table_name.is_empty() {
        return;
    }
    let usage = TableUsage { table_name, rw_type };
    if !out.contains(&usage) {
        out.push(usage);
    }
}

/// Derive the (table, R/W) reference set of a normalized statement.
pub fn extract_tables(
    kind: SqlKind,
    norm: &str,
    exceptions: &HashSet<String>,
) -> Vec<TableUsage> {
    let words = sql_words(norm);
    let mut usages = Vec::new();

    match kind {
        SqlKind::Select => {
            collect_from_join_reads(&words, &mut usages);
        }
        SqlKind::Insert => {
            if let Some(target) = identifier_after(&words, "INTO") {
                push_usage(&mut usages, &target, RwType::Write);
            }
            if words.iter().skip(1).any(|w| w == "SELECT") {
                collect_from_join_reads(&words, &mut usages);
            }
        }
        SqlKind::Update => {
            if let Some(target) = identifier_after(&words, "UPDATE") {
                push_usage(&mut usages, &target, RwType::Write);
            }
            collect_from_join_reads(&words, &mut usages);
        }
        SqlKind::Delete => {
            if let Some(target) = identifier_after(&words, "FROM") {
                push_usage(&mut usages, &target, RwType::Write);
            }
        }
        SqlKind::Merge => {
            if let Some(target) = identifier_after_pair(&words, "MERGE", "INTO") {
                push_usage(&mut usages, &target, RwType::Write);
            }
            if let Some(source) = identifier_after(&words, "USING") {
                push_usage(&mut usages, &source, RwType::Read);
            }
            collect_from_join_reads(&words, &mut usages);
        }
        SqlKind::Other => {}
    }

    usages
        .into_iter()
        .filter(|u| !exceptions.contains(&u.table_name))
        .collect()
}
