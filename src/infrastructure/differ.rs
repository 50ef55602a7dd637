//! Run comparison.
//!
//! Computes set differences between two persisted runs: objects by
//! `(type, name)`, relations by endpoint keys plus type, SQL statements by
//! `(owner, kind, text)`, and data windows by `(owner, dw_name, base_table)`.
//! Modified items surface as one removal plus one addition; no per-field
//! change detection is attempted.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::EngineError;
use crate::infrastructure::store::IrStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffCategory {
    Object,
    Relation,
    SqlStatement,
    DataWindow,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffEntry {
    pub category: DiffCategory,
    pub key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffResult {
    pub run_old: String,
    pub run_new: String,
    pub added: Vec<DiffEntry>,
    pub removed: Vec<DiffEntry>,
    /// Always empty; kept for consumers that expect the three-way shape.
    pub changed: Vec<DiffEntry>,
}

/// Compare two runs in the same store.
pub fn diff_runs(store: &IrStore, run_old: &str, run_new: &str) -> Result<DiffResult> {
    for run_id in [run_old, run_new] {
        if !store.run_exists(run_id)? {
            return Err(EngineError::input(format!("run not found: {run_id}")).into());
        }
    }

    let conn = store.conn();
    let mut added = Vec::new();
    let mut removed = Vec::new();

    for (category, sql) in [
        (
            DiffCategory::Object,
            "SELECT type || ':' || name FROM objects WHERE run_id = ?1",
        ),
        (
            DiffCategory::Relation,
            "SELECT src.type || ':' || src.name || '->' || dst.type || ':' || dst.name
                    || ':' || r.relation_type
             FROM relations r
             JOIN objects src ON src.id = r.src_id
             JOIN objects dst ON dst.id = r.dst_id
             WHERE r.run_id = ?1",
        ),
        (
            DiffCategory::SqlStatement,
            "SELECT o.name || ':' || ss.sql_kind || ':' || ss.sql_text_norm
             FROM sql_statements ss
             JOIN objects o ON o.id = ss.owner_id
             WHERE ss.run_id = ?1",
        ),
        (
            DiffCategory::DataWindow,
            "SELECT o.name || ':' || dw.dw_name || ':' || COALESCE(dw.base_table, '')
             FROM data_windows dw
             JOIN objects o ON o.id = dw.object_id
             WHERE dw.run_id = ?1",
        ),
    ] {
        let old_keys = key_set(conn, sql, run_old)?;
        let new_keys = key_set(conn, sql, run_new)?;
        for key in new_keys.difference(&old_keys) {
            added.push(DiffEntry {
                category,
                key: key.clone(),
            });
        }
        for key in old_keys.difference(&new_keys) {
            removed.push(DiffEntry {
                category,
                key: key.clone(),
            });
        }
    }

    Ok(DiffResult {
        run_old: run_old.to_string(),
        run_new: run_new.to_string(),
        added,
        removed,
        changed: Vec::new(),
    })
}

fn key_set(conn: &Connection, sql: &str, run_id: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare(sql).context("failed to prepare diff query")?;
    let keys = stmt
        .query_map(params![run_id], |row| row.get::<_, String>(0))
        .context("failed to run diff query")?
        .collect::<rusqlite::Result<BTreeSet<_>>>()
        .context("failed to read diff rows")?;
    Ok(keys)
}
