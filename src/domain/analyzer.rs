//! Relation analyzer.
//!
//! Walks every parsed file and descriptor of a run, materializes the object
//! set (including one `Table` object per referenced table), resolves call
//! sites through global name directories, and emits typed relations with
//! confidences plus normalized SQL statement records. Runs single-tasked
//! once all files are parsed; resolution lives here so future rules can
//! refine it without touching the parser.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::domain::config::EngineConfig;
use crate::domain::descriptor::ParsedDataWindow;
use crate::domain::ir::{
    AnalysisIr, DataWindowRecord, EventRecord, FunctionRecord, ObjectRecord, ObjectType,
    RelationRecord, RelationType, RwType, SqlKind, SqlStatementRecord, TableUsage,
};
use crate::domain::parser::{CallSiteKind, ParsedFile};
use crate::domain::sqlnorm;

pub const CONFIDENCE_CALLS: f64 = 0.85;
pub const CONFIDENCE_OPENS: f64 = 0.95;
pub const CONFIDENCE_TRIGGERS_EVENT: f64 = 0.70;
pub const CONFIDENCE_USES_DW: f64 = 0.90;
pub const CONFIDENCE_TABLE_REF: f64 = 0.90;

/// Diagnostics that do not degrade the run outcome.
#[derive(Debug, Clone)]
pub struct AnalyzerDiagnostic {
    pub object_name: String,
    pub message: String,
}

/// Analyzer output: the persistable IR plus resolution diagnostics.
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub ir: AnalysisIr,
    pub diagnostics: Vec<AnalyzerDiagnostic>,
}

type ObjectKey = (ObjectType, String);

/// Relation accumulator with max-confidence dedup on (src, dst, type).
#[derive(Default)]
struct RelationSet {
    map: BTreeMap<(ObjectKey, ObjectKey, RelationType), f64>,
}

impl RelationSet {
    fn add(
        &mut self,
        src: ObjectKey,
        dst: ObjectKey,
        relation_type: RelationType,
        confidence: f64,
    ) {
        let entry = self.map.entry((src, dst, relation_type)).or_insert(0.0);
        if confidence > *entry {
            *entry = confidence;
        }
    }

    fn into_records(self) -> Vec<RelationRecord> {
        self.map
            .into_iter()
            .map(|((src, dst, relation_type), confidence)| RelationRecord {
                src_type: src.0,
                src_name: src.1,
                dst_type: dst.0,
                dst_name: dst.1,
                relation_type,
                confidence,
            })
            .collect()
    }
}

/// Analyze one run's parsed inputs into IR records.
pub fn analyze(
    files: &[ParsedFile],
    grids: &[ParsedDataWindow],
    config: &EngineConfig,
) -> AnalysisOutput {
    let exceptions = config.exception_set();
    let mut diagnostics = Vec::new();

    // ------------------------------------------------------------------
    // Object materialization and name directories
    // ------------------------------------------------------------------
    let mut objects: BTreeMap<ObjectKey, ObjectRecord> = BTreeMap::new();

    for file in files {
        let object_type = file.kind.object_type();
        objects.insert(
            (object_type, file.name.clone()),
            ObjectRecord {
                object_type,
                name: file.name.clone(),
                module: file.module.clone(),
                source_path: Some(file.source_path.clone()),
            },
        );
    }
    for grid in grids {
        objects
            .entry((ObjectType::DataGrid, grid.object_name.clone()))
            .or_insert_with(|| ObjectRecord {
                object_type: ObjectType::DataGrid,
                name: grid.object_name.clone(),
                module: None,
                source_path: None,
            });
    }

    // function name -> declaring objects
    let mut function_owners: HashMap<String, Vec<ObjectKey>> = HashMap::new();
    // declared object name -> objects (screens, grids, user objects, menus)
    let mut named_objects: HashMap<String, Vec<ObjectKey>> = HashMap::new();
    // event name -> declaring objects
    let mut event_owners: HashMap<String, Vec<ObjectKey>> = HashMap::new();
    // data-grid name -> objects
    let mut grid_objects: HashMap<String, Vec<ObjectKey>> = HashMap::new();

    for file in files {
        let key = (file.kind.object_type(), file.name.clone());
        if matches!(
            file.kind.object_type(),
            ObjectType::Screen | ObjectType::UserObject | ObjectType::Menu | ObjectType::DataGrid
        ) {
            named_objects
                .entry(file.name.clone())
                .or_default()
                .push(key.clone());
        }
        if file.kind.object_type() == ObjectType::DataGrid {
            grid_objects
                .entry(file.name.clone())
                .or_default()
                .push(key.clone());
        }
        for function in &file.functions {
            let owners = function_owners.entry(function.name.clone()).or_default();
            if !owners.contains(&key) {
                owners.push(key.clone());
            }
        }
        for event in &file.events {
            let owners = event_owners.entry(event.name.clone()).or_default();
            if !owners.contains(&key) {
                owners.push(key.clone());
            }
        }
    }
    for grid in grids {
        let key = (ObjectType::DataGrid, grid.object_name.clone());
        let named = named_objects.entry(grid.object_name.clone()).or_default();
        if !named.contains(&key) {
            named.push(key.clone());
        }
        let by_grid = grid_objects.entry(grid.object_name.clone()).or_default();
        if !by_grid.contains(&key) {
            by_grid.push(key);
        }
    }

    // ------------------------------------------------------------------
    // Events and functions
    // ------------------------------------------------------------------
    let mut events = Vec::new();
    let mut functions = Vec::new();
    for file in files {
        let object_type = file.kind.object_type();
        for event in &file.events {
            events.push(EventRecord {
                owner_type: object_type,
                owner_name: file.name.clone(),
                event_name: event.name.clone(),
                script_ref: Some(format!("{}:{}", file.source_path, event.line)),
            });
        }
        for function in &file.functions {
            functions.push(FunctionRecord {
                owner_type: object_type,
                owner_name: file.name.clone(),
                function_name: function.name.clone(),
                signature: Some(function.signature.clone()),
            });
        }
    }

    // ------------------------------------------------------------------
    // Call-site resolution
    // ------------------------------------------------------------------
    let mut relations = RelationSet::default();

    for file in files {
        let src: ObjectKey = (file.kind.object_type(), file.name.clone());
        for site in &file.call_sites {
            match site.kind {
                CallSiteKind::FunctionCall => {
                    // only names declared as functions somewhere in the run
                    // are call sites; anything else is a built-in
                    if let Some(owners) = function_owners.get(&site.callee) {
                        let share = CONFIDENCE_CALLS / owners.len() as f64;
                        for owner in owners {
                            relations.add(
                                src.clone(),
                                owner.clone(),
                                RelationType::Calls,
                                share,
                            );
                        }
                    }
                }
                CallSiteKind::ScreenOpen => match named_objects.get(&site.callee) {
                    Some(targets) => {
                        let share = CONFIDENCE_OPENS / targets.len() as f64;
                        for target in targets {
                            relations.add(
                                src.clone(),
                                target.clone(),
                                RelationType::Opens,
                                share,
                            );
                        }
                    }
                    None => diagnostics.push(AnalyzerDiagnostic {
                        object_name: file.name.clone(),
                        message: format!("unresolved callee '{}' (screen-open)", site.callee),
                    }),
                },
                CallSiteKind::EventTrigger => match event_owners.get(&site.callee) {
                    Some(owners) => {
                        let share = CONFIDENCE_TRIGGERS_EVENT / owners.len() as f64;
                        for owner in owners {
                            relations.add(
                                src.clone(),
                                owner.clone(),
                                RelationType::TriggersEvent,
                                share,
                            );
                        }
                    }
                    None => diagnostics.push(AnalyzerDiagnostic {
                        object_name: file.name.clone(),
                        message: format!("unresolved callee '{}' (event-trigger)", site.callee),
                    }),
                },
                CallSiteKind::DataGridUse => match grid_objects.get(&site.callee) {
                    Some(targets) => {
                        let share = CONFIDENCE_USES_DW / targets.len() as f64;
                        for target in targets {
                            relations.add(
                                src.clone(),
                                target.clone(),
                                RelationType::UsesDw,
                                share,
                            );
                        }
                    }
                    None => diagnostics.push(AnalyzerDiagnostic {
                        object_name: file.name.clone(),
                        message: format!("unresolved callee '{}' (data-grid-use)", site.callee),
                    }),
                },
            }
        }
    }

    // ------------------------------------------------------------------
    // Embedded SQL and table references
    // ------------------------------------------------------------------
    let mut sql_statements = Vec::new();
    let mut table_names: BTreeSet<String> = BTreeSet::new();

    for file in files {
        let src: ObjectKey = (file.kind.object_type(), file.name.clone());
        let mut seen: HashSet<(SqlKind, String)> = HashSet::new();
        for embedded in &file.embedded_sql {
            let statement = sqlnorm::analyze_statement(&embedded.statement_text, &exceptions);
            if statement.text.is_empty() {
                continue;
            }
            if !seen.insert((statement.kind, statement.text.clone())) {
                continue;
            }
            emit_table_relations(&src, &statement.tables, &mut relations, &mut table_names);
            sql_statements.push(SqlStatementRecord {
                owner_type: src.0,
                owner_name: src.1.clone(),
                sql_kind: statement.kind,
                sql_text_norm: statement.text,
                tables: statement.tables,
            });
        }
    }

    // ------------------------------------------------------------------
    // Data-grid descriptors
    // ------------------------------------------------------------------
    let mut data_windows = Vec::new();
    for grid in grids {
        let src: ObjectKey = (ObjectType::DataGrid, grid.object_name.clone());

        if let Some(sql_select) = &grid.sql_select {
            let statement = sqlnorm::analyze_statement(sql_select, &exceptions);
            if !statement.text.is_empty() {
                emit_table_relations(&src, &statement.tables, &mut relations, &mut table_names);
                sql_statements.push(SqlStatementRecord {
                    owner_type: src.0,
                    owner_name: src.1.clone(),
                    sql_kind: statement.kind,
                    sql_text_norm: statement.text,
                    tables: statement.tables,
                });
            }
        }

        if let Some(base_table) = &grid.base_table {
            if !exceptions.contains(base_table) {
                table_names.insert(base_table.clone());
                relations.add(
                    src.clone(),
                    (ObjectType::Table, base_table.clone()),
                    RelationType::WritesTable,
                    CONFIDENCE_TABLE_REF,
                );
            }
        }

        // a descriptor without retrieve and update yields only the object
        if grid.sql_select.is_some() || grid.base_table.is_some() {
            data_windows.push(DataWindowRecord {
                owner_type: src.0,
                owner_name: src.1.clone(),
                dw_name: grid.dw_name.clone(),
                base_table: grid.base_table.clone(),
                sql_select: grid.sql_select.clone(),
            });
        }
    }

    for table_name in &table_names {
        objects
            .entry((ObjectType::Table, table_name.clone()))
            .or_insert_with(|| ObjectRecord {
                object_type: ObjectType::Table,
                name: table_name.clone(),
                module: None,
                source_path: None,
            });
    }

    // deterministic output ordering
    events.sort_by(|a, b| (&a.owner_name, &a.event_name).cmp(&(&b.owner_name, &b.event_name)));
    functions.sort_by(|a, b| {
        (&a.owner_name, &a.function_name).cmp(&(&b.owner_name, &b.function_name))
    });
    sql_statements.sort_by(|a, b| {
        (&a.owner_name, a.sql_kind, &a.sql_text_norm).cmp(&(
            &b.owner_name,
            b.sql_kind,
            &b.sql_text_norm,
        ))
    });
    data_windows.sort_by(|a, b| (&a.owner_name, &a.dw_name).cmp(&(&b.owner_name, &b.dw_name)));

    AnalysisOutput {
        ir: AnalysisIr {
            objects: objects.into_values().collect(),
            events,
            functions,
            relations: relations.into_records(),
            sql_statements,
            data_windows,
        },
        diagnostics,
    }
}

fn emit_table_relations(
    src: &ObjectKey,
    tables: &[TableUsage],
    relations: &mut RelationSet,
    table_names: &mut BTreeSet<String>,
) {
    for usage in tables {
        table_names.insert(usage.table_name.clone());
        let relation_type = match usage.rw_type {
            RwType::Read => RelationType::ReadsTable,
            RwType::Write => RelationType::WritesTable,
        };
        relations.add(
            src.clone(),
            (ObjectType::Table, usage.table_name.clone()),
            relation_type,
            CONFIDENCE_TABLE_REF,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parser::Parser;
    use crate::domain::source_kind::SourceKind;

    fn parse_screen(name: &str, body: &str) -> ParsedFile {
        Parser::new(100).parse(
            name,
            SourceKind::Screen,
            None,
            &format!("{name}.srw"),
            body,
        )
    }

    fn parse_userobject(name: &str, body: &str) -> ParsedFile {
        Parser::new(100).parse(
            name,
            SourceKind::UserObject,
            None,
            &format!("{name}.sru"),
            body,
        )
    }

    fn relation<'a>(
        ir: &'a AnalysisIr,
        src: &str,
        dst: &str,
        relation_type: RelationType,
    ) -> Option<&'a RelationRecord> {
        ir.relations.iter().find(|r| {
            r.src_name == src && r.dst_name == dst && r.relation_type == relation_type
        })
    }

    #[test]
    fn test_table_relations_from_embedded_sql() {
        let screen = parse_screen(
            "w_save",
            "event ue_save\nUPDATE tb_x SET a = 1 WHERE k = :k;\nINSERT INTO tb_y(a) VALUES(1);\nend event\n",
        );
        let output = analyze(&[screen], &[], &EngineConfig::default());
        let ir = &output.ir;

        assert!(ir
            .objects
            .iter()
            .any(|o| o.object_type == ObjectType::Table && o.name == "tb_x"));
        assert!(ir
            .objects
            .iter()
            .any(|o| o.object_type == ObjectType::Table && o.name == "tb_y"));
        assert_eq!(ir.sql_statements.len(), 2);
        assert!(relation(ir, "w_save", "tb_x", RelationType::WritesTable).is_some());
        assert!(relation(ir, "w_save", "tb_y", RelationType::WritesTable).is_some());
    }

    #[test]
    fn test_opens_and_self_trigger() {
        let s1 = parse_screen(
            "w_main",
            "event ue_save\nx = 1\nend event\n\nevent clicked\nopen(w_detail)\ntriggerevent(\"ue_save\")\nend event\n",
        );
        let s2 = parse_screen("w_detail", "event ue_open\nx = 1\nend event\n");
        let output = analyze(&[s1, s2], &[], &EngineConfig::default());
        let ir = &output.ir;

        let opens = relation(ir, "w_main", "w_detail", RelationType::Opens).unwrap();
        assert!((opens.confidence - 0.95).abs() < 1e-9);

        let trigger = relation(ir, "w_main", "w_main", RelationType::TriggersEvent).unwrap();
        assert!((trigger.confidence - 0.70).abs() < 1e-9);
    }

    #[test]
    fn test_ambiguous_function_call_splits_confidence() {
        let u1 = parse_userobject(
            "u_one",
            "public function integer f_calc (long a)\nreturn a\nend function\n",
        );
        let u2 = parse_userobject(
            "u_two",
            "public function integer f_calc (long a)\nreturn a + 1\nend function\n",
        );
        let screen = parse_screen(
            "w_caller",
            "event clicked\nli_x = f_calc(1)\nend event\n",
        );
        let output = analyze(&[u1, u2, screen], &[], &EngineConfig::default());
        let ir = &output.ir;

        let to_one = relation(ir, "w_caller", "u_one", RelationType::Calls).unwrap();
        let to_two = relation(ir, "w_caller", "u_two", RelationType::Calls).unwrap();
        assert!((to_one.confidence - 0.425).abs() < 1e-9);
        assert!((to_two.confidence - 0.425).abs() < 1e-9);
    }

    #[test]
    fn test_builtin_calls_are_dropped_silently() {
        let screen = parse_screen(
            "w_msg",
            "event clicked\nmessagebox(\"hi\", \"there\")\nend event\n",
        );
        let output = analyze(&[screen], &[], &EngineConfig::default());
        assert!(output.ir.relations.is_empty());
        assert!(output.diagnostics.is_empty());
    }

    #[test]
    fn test_unresolved_open_is_diagnostic_only() {
        let screen = parse_screen("w_a", "event clicked\nopen(w_missing)\nend event\n");
        let output = analyze(&[screen], &[], &EngineConfig::default());
        assert!(output.ir.relations.is_empty());
        assert_eq!(output.diagnostics.len(), 1);
        assert!(output.diagnostics[0].message.contains("w_missing"));
    }

    #[test]
    fn test_descriptor_pipeline() {
        let grid = ParsedDataWindow {
            object_name: "dw_a".to_string(),
            dw_name: "dw_a".to_string(),
            base_table: Some("tb_a".to_string()),
            sql_select: Some("SELECT x FROM tb_a JOIN tb_b ON tb_a.k = tb_b.k".to_string()),
            columns: Vec::new(),
        };
        let output = analyze(&[], &[grid], &EngineConfig::default());
        let ir = &output.ir;

        assert!(ir
            .objects
            .iter()
            .any(|o| o.object_type == ObjectType::DataGrid && o.name == "dw_a"));
        assert_eq!(ir.sql_statements.len(), 1);
        assert_eq!(ir.sql_statements[0].sql_kind, SqlKind::Select);
        assert!(relation(ir, "dw_a", "tb_a", RelationType::ReadsTable).is_some());
        assert!(relation(ir, "dw_a", "tb_b", RelationType::ReadsTable).is_some());
        assert!(relation(ir, "dw_a", "tb_a", RelationType::WritesTable).is_some());
        assert_eq!(ir.data_windows.len(), 1);
    }

    #[test]
    fn test_uses_dw_between_screen_and_grid() {
        let screen = parse_screen(
            "w_orders",
            "event ue_refresh\ndw_orders.retrieve()\nend event\n",
        );
        let grid = ParsedDataWindow {
            object_name: "dw_orders".to_string(),
            dw_name: "dw_orders".to_string(),
            base_table: None,
            sql_select: None,
            columns: Vec::new(),
        };
        let output = analyze(&[screen], &[grid], &EngineConfig::default());
        let uses = relation(&output.ir, "w_orders", "dw_orders", RelationType::UsesDw).unwrap();
        assert!((uses.confidence - 0.90).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_relations_keep_max_confidence() {
        let screen = parse_screen(
            "w_dup",
            "event a\nopen(w_x)\nend event\n\nevent b\nopen(w_x)\nend event\n",
        );
        let other = parse_screen("w_x", "event ue_o\nx = 1\nend event\n");
        let output = analyze(&[screen, other], &[], &EngineConfig::default());
        let count = output
            .ir
            .relations
            .iter()
            .filter(|r| r.relation_type == RelationType::Opens)
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_exception_table_suppressed() {
        let screen = parse_screen(
            "w_t",
            "event ue_t\nSELECT sysdate INTO :ld FROM dual;\nend event\n",
        );
        let config = EngineConfig {
            table_exceptions: vec!["dual".to_string()],
            ..Default::default()
        };
        let output = analyze(&[screen], &[], &config);
        assert!(output
            .ir
            .objects
            .iter()
            .all(|o| o.object_type != ObjectType::Table));
        assert!(output.ir.relations.is_empty());
    }

    #[test]
    fn test_determinism() {
        let build = || {
            let s1 = parse_screen(
                "w_main",
                "event clicked\nopen(w_detail)\nUPDATE tb_x SET a = 1;\nend event\n",
            );
            let s2 = parse_screen("w_detail", "event ue_o\nx = 1\nend event\n");
            analyze(&[s1, s2], &[], &EngineConfig::default())
        };
        let first = build();
        let second = build();
        let keys = |ir: &AnalysisIr| {
            ir.relations
                .iter()
                .map(|r| {
                    (
                        r.src_name.clone(),
                        r.dst_name.clone(),
                        r.relation_type,
                        (r.confidence * 1e9) as i64,
                    )
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(&first.ir), keys(&second.ir));
    }
}
