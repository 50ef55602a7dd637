//! SQLite-backed IR store.
//!
//! Applies a run's records under a single transaction in dependency order
//! (run, objects, events/functions/data windows, SQL statements, SQL tables,
//! relations). Schema constraints mirror the application-side invariant
//! checks; a violation aborts the whole run's persistence. Concurrent runs
//! against the same store file are rejected through a process-wide lease
//! keyed by the store path.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::domain::ir::{AnalysisIr, ObjectType, RunRecord, RunStatus};
use crate::error::EngineError;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS runs (
    run_id         TEXT PRIMARY KEY,
    started_at     TEXT NOT NULL,
    finished_at    TEXT,
    status         TEXT NOT NULL
        CHECK (status IN ('running', 'ok', 'partial', 'failed')),
    source_version TEXT
);

CREATE TABLE IF NOT EXISTS objects (
    id          INTEGER PRIMARY KEY,
    run_id      TEXT NOT NULL REFERENCES runs(run_id),
    type        TEXT NOT NULL
        CHECK (type IN ('Screen', 'UserObject', 'Menu', 'DataGrid',
                        'Function', 'Script', 'Library', 'Sql', 'Table')),
    name        TEXT NOT NULL,
    module      TEXT,
    source_path TEXT,
    UNIQUE (run_id, type, name)
);

CREATE TABLE IF NOT EXISTS events (
    id         INTEGER PRIMARY KEY,
    run_id     TEXT NOT NULL REFERENCES runs(run_id),
    object_id  INTEGER NOT NULL REFERENCES objects(id),
    event_name TEXT NOT NULL,
    script_ref TEXT
);

CREATE TABLE IF NOT EXISTS functions (
    id            INTEGER PRIMARY KEY,
    run_id        TEXT NOT NULL REFERENCES runs(run_id),
    object_id     INTEGER NOT NULL REFERENCES objects(id),
    function_name TEXT NOT NULL,
    signature     TEXT
);

CREATE TABLE IF NOT EXISTS relations (
    id            INTEGER PRIMARY KEY,
    run_id        TEXT NOT NULL REFERENCES runs(run_id),
    src_id        INTEGER NOT NULL REFERENCES objects(id),
    dst_id        INTEGER NOT NULL REFERENCES objects(id),
    relation_type TEXT NOT NULL
        CHECK (relation_type IN ('calls', 'opens', 'uses_dw', 'reads_table',
                                 'writes_table', 'triggers_event')),
    confidence    REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0)
);

CREATE TABLE IF NOT EXISTS sql_statements (
    id            INTEGER PRIMARY KEY,
    run_id        TEXT NOT NULL REFERENCES runs(run_id),
    owner_id      INTEGER NOT NULL REFERENCES objects(id),
    sql_kind      TEXT NOT NULL
        CHECK (sql_kind IN ('SELECT', 'INSERT', 'UPDATE', 'DELETE', 'MERGE', 'OTHER')),
    sql_text_norm TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sql_tables (
    id         INTEGER PRIMARY KEY,
    run_id     TEXT NOT NULL REFERENCES runs(run_id),
    sql_id     INTEGER NOT NULL REFERENCES sql_statements(id),
    table_name TEXT NOT NULL,
    rw_type    TEXT NOT NULL CHECK (rw_type IN ('READ', 'WRITE'))
);

CREATE TABLE IF NOT EXISTS data_windows (
    id         INTEGER PRIMARY KEY,
    run_id     TEXT NOT NULL REFERENCES runs(run_id),
    object_id  INTEGER NOT NULL REFERENCES objects(id),
    dw_name    TEXT NOT NULL,
    base_table TEXT,
    sql_select TEXT,
    UNIQUE (run_id, object_id, dw_name)
);

CREATE INDEX IF NOT EXISTS idx_relations_lookup
    ON relations(relation_type, src_id, dst_id);
CREATE INDEX IF NOT EXISTS idx_sql_tables_name
    ON sql_tables(table_name);
CREATE INDEX IF NOT EXISTS idx_events_owner
    ON events(run_id, object_id);
CREATE INDEX IF NOT EXISTS idx_functions_owner
    ON functions(run_id, object_id);
CREATE INDEX IF NOT EXISTS idx_data_windows_owner
    ON data_windows(run_id, object_id);
CREATE INDEX IF NOT EXISTS idx_sql_statements_owner
    ON sql_statements(run_id, owner_id);
";

/// One lease per store path; concurrent runs against the same store are
/// rejected instead of queued.
static STORE_LEASES: Lazy<DashMap<String, ()>> = Lazy::new(DashMap::new);

struct StoreLease {
    key: String,
}

impl StoreLease {
    fn acquire(key: String) -> Result<StoreLease> {
        use dashmap::mapref::entry::Entry;
        match STORE_LEASES.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(StoreLease { key })
            }
            Entry::Occupied(_) => Err(EngineError::input(format!(
                "store is already in use by another run: {key}"
            ))
            .into()),
        }
    }
}

impl Drop for StoreLease {
    fn drop(&mut self) {
        STORE_LEASES.remove(&self.key);
    }
}

/// Record counts written by one persist call.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PersistCounts {
    pub objects: usize,
    pub events: usize,
    pub functions: usize,
    pub relations: usize,
    pub sql_statements: usize,
    pub sql_tables: usize,
    pub data_windows: usize,
}

pub const DEFAULT_ROW_LIMIT: usize = 200;
pub const MIN_ROW_LIMIT: usize = 10;
pub const MAX_ROW_LIMIT: usize = 2000;

/// Clamp a query row limit into the supported range.
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_ROW_LIMIT)
        .clamp(MIN_ROW_LIMIT, MAX_ROW_LIMIT)
}

// ---------------------------------------------------------------------------
// Query surface row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RunRow {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub source_version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectRow {
    pub object_type: String,
    pub name: String,
    pub module: Option<String>,
    pub source_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventFunctionRow {
    pub object_name: String,
    pub event_name: String,
    pub script_ref: Option<String>,
    pub called_functions: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableImpactRow {
    pub table_name: String,
    pub rw_type: String,
    pub object_name: String,
    pub sql_kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallGraphRow {
    pub src_name: String,
    pub dst_name: String,
    pub relation_type: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataWindowRow {
    pub object_name: String,
    pub dw_name: String,
    pub base_table: Option<String>,
    pub sql_select: Option<String>,
}

/// SQLite store handle. Holds the process lease for its path.
pub struct IrStore {
    conn: Connection,
    _lease: StoreLease,
}

impl IrStore {
    /// Open (or create) a store file and apply the schema.
    pub fn open(path: &Path) -> Result<IrStore> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let lease = StoreLease::acquire(path.display().to_string())?;
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open store {}", path.display()))?;
        Self::initialize(conn, lease)
    }

    /// In-memory store for tests and dry runs.
    pub fn open_in_memory() -> Result<IrStore> {
        let lease = StoreLease::acquire(format!(":memory:{}", uuid::Uuid::new_v4()))?;
        let conn = Connection::open_in_memory().context("failed to open in-memory store")?;
        Self::initialize(conn, lease)
    }

    fn initialize(conn: Connection, lease: StoreLease) -> Result<IrStore> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("failed to enable foreign keys")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply store schema")?;
        Ok(IrStore {
            conn,
            _lease: lease,
        })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // -----------------------------------------------------------------
    // Run lifecycle
    // -----------------------------------------------------------------

    /// Insert the run row. Duplicate run ids are an input error.
    pub fn begin_run(&self, run: &RunRecord) -> Result<()> {
        let exists: Option<String> = self
            .conn
            .query_row(
                "SELECT run_id FROM runs WHERE run_id = ?1",
                params![run.run_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to check run id")?;
        if exists.is_some() {
            return Err(EngineError::input(format!("run id already exists: {}", run.run_id)).into());
        }
        self.conn
            .execute(
                "INSERT INTO runs (run_id, started_at, finished_at, status, source_version)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    run.run_id,
                    run.started_at,
                    run.finished_at,
                    run.status.as_str(),
                    run.source_version
                ],
            )
            .map_err(|err| EngineError::persistence(err.to_string()))?;
        Ok(())
    }

    pub fn finalize_run(&self, run_id: &str, status: RunStatus, finished_at: &str) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE runs SET status = ?2, finished_at = ?3 WHERE run_id = ?1",
                params![run_id, status.as_str(), finished_at],
            )
            .map_err(|err| EngineError::persistence(err.to_string()))?;
        if updated != 1 {
            return Err(EngineError::input(format!("run not found: {run_id}")).into());
        }
        Ok(())
    }

    /// Persist every record of a run atomically, in dependency order.
    pub fn persist(&mut self, run_id: &str, ir: &AnalysisIr) -> Result<PersistCounts> {
        let tx = self
            .conn
            .transaction()
            .map_err(|err| EngineError::persistence(err.to_string()))?;
        let counts = Self::persist_tx(&tx, run_id, ir)?;
        tx.commit()
            .map_err(|err| EngineError::persistence(err.to_string()))?;
        Ok(counts)
    }

    fn persist_tx(
        tx: &rusqlite::Transaction<'_>,
        run_id: &str,
        ir: &AnalysisIr,
    ) -> Result<PersistCounts> {
        let mut counts = PersistCounts::default();
        let mut object_ids: HashMap<(ObjectType, &str), i64> = HashMap::new();

        for object in &ir.objects {
            tx.execute(
                "INSERT INTO objects (run_id, type, name, module, source_path)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    run_id,
                    object.object_type.as_str(),
                    object.name,
                    object.module,
                    object.source_path
                ],
            )
            .map_err(|err| EngineError::persistence(err.to_string()))?;
            object_ids.insert(
                (object.object_type, object.name.as_str()),
                tx.last_insert_rowid(),
            );
            counts.objects += 1;
        }

        fn lookup<'a>(
            ids: &HashMap<(ObjectType, &'a str), i64>,
            object_type: ObjectType,
            name: &'a str,
        ) -> Result<i64> {
            ids.get(&(object_type, name)).copied().ok_or_else(|| {
                EngineError::persistence(format!(
                    "record references missing object {object_type}:{name}"
                ))
                .into()
            })
        }

        for event in &ir.events {
            let object_id = lookup(&object_ids, event.owner_type, &event.owner_name)?;
            tx.execute(
                "INSERT INTO events (run_id, object_id, event_name, script_ref)
                 VALUES (?1, ?2, ?3, ?4)",
                params![run_id, object_id, event.event_name, event.script_ref],
            )
            .map_err(|err| EngineError::persistence(err.to_string()))?;
            counts.events += 1;
        }

        for function in &ir.functions {
            let object_id = lookup(&object_ids, function.owner_type, &function.owner_name)?;
            tx.execute(
                "INSERT INTO functions (run_id, object_id, function_name, signature)
                 VALUES (?1, ?2, ?3, ?4)",
                params![run_id, object_id, function.function_name, function.signature],
            )
            .map_err(|err| EngineError::persistence(err.to_string()))?;
            counts.functions += 1;
        }

        for dw in &ir.data_windows {
            let object_id = lookup(&object_ids, dw.owner_type, &dw.owner_name)?;
            tx.execute(
                "INSERT INTO data_windows (run_id, object_id, dw_name, base_table, sql_select)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![run_id, object_id, dw.dw_name, dw.base_table, dw.sql_select],
            )
            .map_err(|err| EngineError::persistence(err.to_string()))?;
            counts.data_windows += 1;
        }

        for statement in &ir.sql_statements {
            let owner_id = lookup(&object_ids, statement.owner_type, &statement.owner_name)?;
            tx.execute(
                "INSERT INTO sql_statements (run_id, owner_id, sql_kind, sql_text_norm)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    run_id,
                    owner_id,
                    statement.sql_kind.as_str(),
                    statement.sql_text_norm
                ],
            )
            .map_err(|err| EngineError::persistence(err.to_string()))?;
            let sql_id = tx.last_insert_rowid();
            counts.sql_statements += 1;

            for usage in &statement.tables {
                tx.execute(
                    "INSERT INTO sql_tables (run_id, sql_id, table_name, rw_type)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![run_id, sql_id, usage.table_name, usage.rw_type.as_str()],
                )
                .map_err(|err| EngineError::persistence(err.to_string()))?;
                counts.sql_tables += 1;
            }
        }

        for relation in &ir.relations {
            let src_id = lookup(&object_ids, relation.src_type, &relation.src_name)?;
            let dst_id = lookup(&object_ids, relation.dst_type, &relation.dst_name)?;
            tx.execute(
                "INSERT INTO relations (run_id, src_id, dst_id, relation_type, confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    run_id,
                    src_id,
                    dst_id,
                    relation.relation_type.as_str(),
                    relation.confidence
                ],
            )
            .map_err(|err| EngineError::persistence(err.to_string()))?;
            counts.relations += 1;
        }

        Ok(counts)
    }

    // -----------------------------------------------------------------
    // Query surface
    // -----------------------------------------------------------------

    pub fn run_exists(&self, run_id: &str) -> Result<bool> {
        let row: Option<String> = self
            .conn
            .query_row(
                "SELECT run_id FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query runs")?;
        Ok(row.is_some())
    }

    /// Most recent runs first.
    pub fn runs(&self, limit: Option<usize>) -> Result<Vec<RunRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, started_at, finished_at, status, source_version
             FROM runs ORDER BY started_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![clamp_limit(limit) as i64], |row| {
                Ok(RunRow {
                    run_id: row.get(0)?,
                    started_at: row.get(1)?,
                    finished_at: row.get(2)?,
                    status: row.get(3)?,
                    source_version: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_objects(
        &self,
        run_id: &str,
        type_filter: Option<ObjectType>,
        name_search: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<ObjectRow>> {
        let type_value = type_filter.map(|t| t.as_str().to_string());
        let search_value = name_search.map(|s| format!("%{}%", s.to_lowercase()));
        let mut stmt = self.conn.prepare(
            "SELECT type, name, module, source_path
             FROM objects
             WHERE run_id = ?1
               AND (?2 IS NULL OR type = ?2)
               AND (?3 IS NULL OR name LIKE ?3)
             ORDER BY type, name LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(
                params![run_id, type_value, search_value, clamp_limit(limit) as i64],
                |row| {
                    Ok(ObjectRow {
                        object_type: row.get(0)?,
                        name: row.get(1)?,
                        module: row.get(2)?,
                        source_path: row.get(3)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// For each object event: the function names its owner calls.
    pub fn event_function_map(
        &self,
        run_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<EventFunctionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT o.name, e.event_name, e.script_ref,
                    COALESCE(GROUP_CONCAT(DISTINCT dst.name), '')
             FROM events e
             JOIN objects o ON o.id = e.object_id
             LEFT JOIN relations r
                    ON r.src_id = o.id AND r.run_id = e.run_id
                   AND r.relation_type = 'calls'
             LEFT JOIN objects dst ON dst.id = r.dst_id
             WHERE e.run_id = ?1
             GROUP BY o.name, e.event_name, e.script_ref
             ORDER BY o.name, e.event_name LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![run_id, clamp_limit(limit) as i64], |row| {
                Ok(EventFunctionRow {
                    object_name: row.get(0)?,
                    event_name: row.get(1)?,
                    script_ref: row.get(2)?,
                    called_functions: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Which objects touch which tables, and how.
    pub fn table_impact(
        &self,
        run_id: &str,
        table_name: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<TableImpactRow>> {
        let table_value = table_name.map(|t| t.to_lowercase());
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT st.table_name, st.rw_type, owner.name, ss.sql_kind
             FROM sql_tables st
             JOIN sql_statements ss ON ss.id = st.sql_id
             JOIN objects owner ON owner.id = ss.owner_id
             WHERE st.run_id = ?1
               AND (?2 IS NULL OR st.table_name = ?2)
             ORDER BY st.table_name, owner.name, st.rw_type LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                params![run_id, table_value, clamp_limit(limit) as i64],
                |row| {
                    Ok(TableImpactRow {
                        table_name: row.get(0)?,
                        rw_type: row.get(1)?,
                        object_name: row.get(2)?,
                        sql_kind: row.get(3)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// `opens`/`calls` edges of the screen graph.
    pub fn screen_call_graph(
        &self,
        run_id: &str,
        src_name: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<CallGraphRow>> {
        let src_value = src_name.map(|s| s.to_lowercase());
        let mut stmt = self.conn.prepare(
            "SELECT src.name, dst.name, r.relation_type, r.confidence
             FROM relations r
             JOIN objects src ON src.id = r.src_id
             JOIN objects dst ON dst.id = r.dst_id
             WHERE r.run_id = ?1
               AND r.relation_type IN ('opens', 'calls')
               AND (?2 IS NULL OR src.name = ?2)
             ORDER BY src.name, dst.name, r.relation_type LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                params![run_id, src_value, clamp_limit(limit) as i64],
                |row| {
                    Ok(CallGraphRow {
                        src_name: row.get(0)?,
                        dst_name: row.get(1)?,
                        relation_type: row.get(2)?,
                        confidence: row.get(3)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Objects that take part in no relation and own no event or function.
    pub fn unused_object_candidates(
        &self,
        run_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ObjectRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT o.type, o.name, o.module, o.source_path
             FROM objects o
             LEFT JOIN relations rs ON rs.src_id = o.id
             LEFT JOIN relations rd ON rd.dst_id = o.id
             LEFT JOIN events e ON e.object_id = o.id
             LEFT JOIN functions f ON f.object_id = o.id
             WHERE o.run_id = ?1
               AND rs.id IS NULL AND rd.id IS NULL
               AND e.id IS NULL AND f.id IS NULL
               AND o.type <> 'Table'
             GROUP BY o.id
             ORDER BY o.type, o.name LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![run_id, clamp_limit(limit) as i64], |row| {
                Ok(ObjectRow {
                    object_type: row.get(0)?,
                    name: row.get(1)?,
                    module: row.get(2)?,
                    source_path: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn data_windows(
        &self,
        run_id: &str,
        object_name: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<DataWindowRow>> {
        let object_value = object_name.map(|s| s.to_lowercase());
        let mut stmt = self.conn.prepare(
            "SELECT o.name, dw.dw_name, dw.base_table, dw.sql_select
             FROM data_windows dw
             JOIN objects o ON o.id = dw.object_id
             WHERE dw.run_id = ?1
               AND (?2 IS NULL OR o.name = ?2)
             ORDER BY o.name, dw.dw_name LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                params![run_id, object_value, clamp_limit(limit) as i64],
                |row| {
                    Ok(DataWindowRow {
                        object_name: row.get(0)?,
                        dw_name: row.get(1)?,
                        base_table: row.get(2)?,
                        sql_select: row.get(3)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ir::{
        ObjectRecord, RelationRecord, RelationType, RwType, SqlKind, SqlStatementRecord,
        TableUsage,
    };

    fn run_record(run_id: &str) -> RunRecord {
        RunRecord {
            run_id: run_id.to_string(),
            started_at: "2024-01-01T00:00:00Z".to_string(),
            finished_at: None,
            status: RunStatus::Running,
            source_version: None,
        }
    }

    fn sample_ir() -> AnalysisIr {
        AnalysisIr {
            objects: vec![
                ObjectRecord {
                    object_type: ObjectType::Screen,
                    name: "w_main".to_string(),
                    module: None,
                    source_path: Some("w_main.srw".to_string()),
                },
                ObjectRecord {
                    object_type: ObjectType::Table,
                    name: "tb_x".to_string(),
                    module: None,
                    source_path: None,
                },
            ],
            relations: vec![RelationRecord {
                src_type: ObjectType::Screen,
                src_name: "w_main".to_string(),
                dst_type: ObjectType::Table,
                dst_name: "tb_x".to_string(),
                relation_type: RelationType::WritesTable,
                confidence: 0.9,
            }],
            sql_statements: vec![SqlStatementRecord {
                owner_type: ObjectType::Screen,
                owner_name: "w_main".to_string(),
                sql_kind: SqlKind::Update,
                sql_text_norm: "UPDATE TB_X SET A = 1".to_string(),
                tables: vec![TableUsage {
                    table_name: "tb_x".to_string(),
                    rw_type: RwType::Write,
                }],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_persist_and_query() {
        let mut store = IrStore::open_in_memory().unwrap();
        store.begin_run(&run_record("r1")).unwrap();
        let counts = store.persist("r1", &sample_ir()).unwrap();
        store
            .finalize_run("r1", RunStatus::Ok, "2024-01-01T00:01:00Z")
            .unwrap();

        assert_eq!(counts.objects, 2);
        assert_eq!(counts.relations, 1);
        assert_eq!(counts.sql_tables, 1);

        let objects = store.list_objects("r1", None, None, None).unwrap();
        assert_eq!(objects.len(), 2);

        let impact = store.table_impact("r1", Some("tb_x"), None).unwrap();
        assert_eq!(impact.len(), 1);
        assert_eq!(impact[0].rw_type, "WRITE");
        assert_eq!(impact[0].object_name, "w_main");

        let runs = store.runs(None).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "ok");
    }

    #[test]
    fn test_duplicate_object_key_rejected() {
        let mut store = IrStore::open_in_memory().unwrap();
        store.begin_run(&run_record("r1")).unwrap();
        let mut ir = sample_ir();
        ir.objects.push(ir.objects[0].clone());
        let result = store.persist("r1", &ir);
        assert!(result.is_err());
        // the transaction rolled back: nothing persisted
        let objects = store.list_objects("r1", None, None, None).unwrap();
        assert!(objects.is_empty());
    }

    #[test]
    fn test_confidence_check_constraint() {
        let mut store = IrStore::open_in_memory().unwrap();
        store.begin_run(&run_record("r1")).unwrap();
        let mut ir = sample_ir();
        ir.relations[0].confidence = 1.5;
        assert!(store.persist("r1", &ir).is_err());
    }

    #[test]
    fn test_duplicate_run_id_rejected() {
        let store = IrStore::open_in_memory().unwrap();
        store.begin_run(&run_record("r1")).unwrap();
        assert!(store.begin_run(&run_record("r1")).is_err());
    }

    #[test]
    fn test_limit_clamping() {
        assert_eq!(clamp_limit(None), 200);
        assert_eq!(clamp_limit(Some(5)), 10);
        assert_eq!(clamp_limit(Some(5000)), 2000);
        assert_eq!(clamp_limit(Some(300)), 300);
    }

    #[test]
    fn test_store_lease_rejects_concurrent_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ir.db");
        let first = IrStore::open(&path).unwrap();
        assert!(IrStore::open(&path).is_err());
        drop(first);
        assert!(IrStore::open(&path).is_ok());
    }

    #[test]
    fn test_unused_object_candidates() {
        let mut store = IrStore::open_in_memory().unwrap();
        store.begin_run(&run_record("r1")).unwrap();
        let mut ir = sample_ir();
        ir.objects.push(ObjectRecord {
            object_type: ObjectType::Menu,
            name: "m_orphan".to_string(),
            module: None,
            source_path: Some("m_orphan.srm".to_string()),
        });
        store.persist("r1", &ir).unwrap();

        let unused = store.unused_object_candidates("r1", None).unwrap();
        assert_eq!(unused.len(), 1);
        assert_eq!(unused[0].name, "m_orphan");
    }
}
