//! Intermediate representation records.
//!
//! Value objects only; the store applies them under a single `run_id`.
//! `validate` re-checks the schema invariants on the application side before
//! anything reaches the store.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Object types present in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectType {
    Screen,
    UserObject,
    Menu,
    DataGrid,
    Function,
    Script,
    Library,
    Sql,
    Table,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Screen => "Screen",
            ObjectType::UserObject => "UserObject",
            ObjectType::Menu => "Menu",
            ObjectType::DataGrid => "DataGrid",
            ObjectType::Function => "Function",
            ObjectType::Script => "Script",
            ObjectType::Library => "Library",
            ObjectType::Sql => "Sql",
            ObjectType::Table => "Table",
        }
    }

    pub fn parse(s: &str) -> Option<ObjectType> {
        match s {
            "Screen" => Some(ObjectType::Screen),
            "UserObject" => Some(ObjectType::UserObject),
            "Menu" => Some(ObjectType::Menu),
            "DataGrid" => Some(ObjectType::DataGrid),
            "Function" => Some(ObjectType::Function),
            "Script" => Some(ObjectType::Script),
            "Library" => Some(ObjectType::Library),
            "Sql" => Some(ObjectType::Sql),
            "Table" => Some(ObjectType::Table),
            _ => None,
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed relation edge kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelationType {
    Calls,
    Opens,
    UsesDw,
    ReadsTable,
    WritesTable,
    TriggersEvent,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Calls => "calls",
            RelationType::Opens => "opens",
            RelationType::UsesDw => "uses_dw",
            RelationType::ReadsTable => "reads_table",
            RelationType::WritesTable => "writes_table",
            RelationType::TriggersEvent => "triggers_event",
        }
    }

    pub fn parse(s: &str) -> Option<RelationType> {
        match s {
            "calls" => Some(RelationType::Calls),
            "opens" => Some(RelationType::Opens),
            "uses_dw" => Some(RelationType::UsesDw),
            "reads_table" => Some(RelationType::ReadsTable),
            "writes_table" => Some(RelationType::WritesTable),
            "triggers_event" => Some(RelationType::TriggersEvent),
            _ => None,
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// SQL statement classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SqlKind {
    Select,
    Insert,
    Update,
    Delete,
    Merge,
    Other,
}

impl SqlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlKind::Select => "SELECT",
            SqlKind::Insert => "INSERT",
            SqlKind::Update => "UPDATE",
            SqlKind::Delete => "DELETE",
            SqlKind::Merge => "MERGE",
            SqlKind::Other => "OTHER",
        }
    }

    pub fn parse(s: &str) -> Option<SqlKind> {
        match s {
            "SELECT" => Some(SqlKind::Select),
            "INSERT" => Some(SqlKind::Insert),
            "UPDATE" => Some(SqlKind::Update),
            "DELETE" => Some(SqlKind::Delete),
            "MERGE" => Some(SqlKind::Merge),
            "OTHER" => Some(SqlKind::Other),
            _ => None,
        }
    }

    pub fn is_dml_write(&self) -> bool {
        matches!(
            self,
            SqlKind::Insert | SqlKind::Update | SqlKind::Delete | SqlKind::Merge
        )
    }
}

/// Read/write classification for a table reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RwType {
    Read,
    Write,
}

impl RwType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RwType::Read => "READ",
            RwType::Write => "WRITE",
        }
    }

    pub fn parse(s: &str) -> Option<RwType> {
        match s {
            "READ" => Some(RwType::Read),
            "WRITE" => Some(RwType::Write),
            _ => None,
        }
    }
}

/// Terminal and in-flight run states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Ok,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Ok => "ok",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }
}

/// One pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: RunStatus,
    pub source_version: Option<String>,
}

/// An analyzed object, unique per `(run_id, type, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRecord {
    pub object_type: ObjectType,
    pub name: String,
    pub module: Option<String>,
    pub source_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub owner_type: ObjectType,
    pub owner_name: String,
    pub event_name: String,
    pub script_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionRecord {
    pub owner_type: ObjectType,
    pub owner_name: String,
    pub function_name: String,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelationRecord {
    pub src_type: ObjectType,
    pub src_name: String,
    pub dst_type: ObjectType,
    pub dst_name: String,
    pub relation_type: RelationType,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TableUsage {
    pub table_name: String,
    pub rw_type: RwType,
}

#[derive(Debug, Clone, Serialize)]
pub struct SqlStatementRecord {
    pub owner_type: ObjectType,
    pub owner_name: String,
    pub sql_kind: SqlKind,
    pub sql_text_norm: String,
    pub tables: Vec<TableUsage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataWindowRecord {
    pub owner_type: ObjectType,
    pub owner_name: String,
    pub dw_name: String,
    pub base_table: Option<String>,
    pub sql_select: Option<String>,
}

/// The full record set of one analysis pass, ready for persistence.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisIr {
    pub objects: Vec<ObjectRecord>,
    pub events: Vec<EventRecord>,
    pub functions: Vec<FunctionRecord>,
    pub relations: Vec<RelationRecord>,
    pub sql_statements: Vec<SqlStatementRecord>,
    pub data_windows: Vec<DataWindowRecord>,
}

/// Re-checks the schema invariants before persistence. Returns one message
/// per violation; an empty vector means the record set is consistent.
pub fn validate(ir: &AnalysisIr) -> Vec<String> {
    let mut violations = Vec::new();

    let object_keys: HashSet<(ObjectType, &str)> = ir
        .objects
        .iter()
        .map(|o| (o.object_type, o.name.as_str()))
        .collect();
    if object_keys.len() != ir.objects.len() {
        violations.push("duplicate (type, name) among objects".to_string());
    }

    fn require_object<'a>(
        keys: &HashSet<(ObjectType, &'a str)>,
        violations: &mut Vec<String>,
        object_type: ObjectType,
        name: &'a str,
        role: &str,
    ) {
        if !keys.contains(&(object_type, name)) {
            violations.push(format!(
                "{role} references missing object {object_type}:{name}"
            ));
        }
    }

    for event in &ir.events {
        require_object(
            &object_keys,
            &mut violations,
            event.owner_type,
            &event.owner_name,
            "event",
        );
    }
    for function in &ir.functions {
        require_object(
            &object_keys,
            &mut violations,
            function.owner_type,
            &function.owner_name,
            "function",
        );
    }
    for statement in &ir.sql_statements {
        require_object(
            &object_keys,
            &mut violations,
            statement.owner_type,
            &statement.owner_name,
            "sql statement",
        );
    }
    for dw in &ir.data_windows {
        require_object(
            &object_keys,
            &mut violations,
            dw.owner_type,
            &dw.owner_name,
            "data window",
        );
    }
    for relation in &ir.relations {
        require_object(
            &object_keys,
            &mut violations,
            relation.src_type,
            &relation.src_name,
            "relation src",
        );
        require_object(
            &object_keys,
            &mut violations,
            relation.dst_type,
            &relation.dst_name,
            "relation dst",
        );
    }

    for relation in &ir.relations {
        if !(0.0..=1.0).contains(&relation.confidence) {
            violations.push(format!(
                "relation {}->{} has confidence {} outside [0, 1]",
                relation.src_name, relation.dst_name, relation.confidence
            ));
        }
    }

    let mut dw_keys = HashSet::new();
    for dw in &ir.data_windows {
        if !dw_keys.insert((dw.owner_type, dw.owner_name.as_str(), dw.dw_name.as_str())) {
            violations.push(format!(
                "duplicate data window {} on {}",
                dw.dw_name, dw.owner_name
            ));
        }
    }

    for statement in &ir.sql_statements {
        match statement.sql_kind {
            SqlKind::Select => {
                if statement.tables.iter().any(|t| t.rw_type == RwType::Write) {
                    violations.push(format!(
                        "SELECT statement of {} carries a WRITE table reference",
                        statement.owner_name
                    ));
                }
            }
            SqlKind::Other => {
                if !statement.tables.is_empty() {
                    violations.push(format!(
                        "OTHER statement of {} carries table references",
                        statement.owner_name
                    ));
                }
            }
            kind if kind.is_dml_write() => {
                // A write target may be unextractable from malformed text, in
                // which case the statement carries no table rows at all.
                if !statement.tables.is_empty()
                    && !statement.tables.iter().any(|t| t.rw_type == RwType::Write)
                {
                    violations.push(format!(
                        "{} statement of {} has table references but no WRITE target",
                        kind.as_str(),
                        statement.owner_name
                    ));
                }
            }
            _ => {}
        }
    }

    // reads_table / writes_table edges must be backed by a statement of the
    // owning object, except writes_table backed by a data-window base table.
    for relation in &ir.relations {
        let expected = match relation.relation_type {
            RelationType::ReadsTable => RwType::Read,
            RelationType::WritesTable => RwType::Write,
            _ => continue,
        };
        let backed_by_sql = ir.sql_statements.iter().any(|s| {
            s.owner_type == relation.src_type
                && s.owner_name == relation.src_name
                && s.tables
                    .iter()
                    .any(|t| t.table_name == relation.dst_name && t.rw_type == expected)
        });
        let backed_by_dw = expected == RwType::Write
            && ir.data_windows.iter().any(|dw| {
                dw.owner_type == relation.src_type
                    && dw.owner_name == relation.src_name
                    && dw.base_table.as_deref() == Some(relation.dst_name.as_str())
            });
        if !backed_by_sql && !backed_by_dw {
            violations.push(format!(
                "{} relation {}->{} has no backing SQL reference",
                relation.relation_type, relation.src_name, relation.dst_name
            ));
        }
    }

    violations
}
