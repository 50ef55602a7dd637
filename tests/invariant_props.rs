//! Property-based checks over the analysis pipeline invariants.

use std::collections::HashSet;

use proptest::prelude::*;
use screentrace::domain::analyzer::analyze;
use screentrace::domain::config::EngineConfig;
use screentrace::domain::ir::{validate, ObjectType, RwType, SqlKind};
use screentrace::domain::parser::Parser;
use screentrace::domain::source_kind::SourceKind;
use screentrace::domain::sqlnorm;

fn table_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,10}".prop_map(|s| format!("tb_{s}"))
}

fn ident() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,10}".prop_map(|s| format!("x_{s}"))
}

/// A small random DML/query statement generator.
fn sql_statement() -> impl Strategy<Value = String> {
    prop_oneof![
        (table_name(), table_name(), ident()).prop_map(|(a, b, col)| format!(
            "SELECT {col} FROM {a} JOIN {b} ON {a}.k = {b}.k WHERE {col} > 0"
        )),
        (table_name(), ident()).prop_map(|(t, col)| format!(
            "INSERT INTO {t}({col}) VALUES (:{col})"
        )),
        (table_name(), ident()).prop_map(|(t, col)| format!(
            "UPDATE {t} SET {col} = :{col} WHERE k = :k"
        )),
        table_name().prop_map(|t| format!("DELETE FROM {t} WHERE k = :k")),
        (table_name(), table_name()).prop_map(|(a, b)| format!(
            "MERGE INTO {a} USING {b} ON {a}.k = {b}.k WHEN MATCHED THEN UPDATE SET v = 1"
        )),
        ident().prop_map(|c| format!("DECLARE {c} CURSOR FOR SELECT 1 FROM t")),
    ]
}

proptest! {
    /// Normalizing twice yields the same string.
    #[test]
    fn normalize_is_idempotent(raw in "[ -~\\n\\t]{0,200}") {
        let once = sqlnorm::normalize(&raw);
        let twice = sqlnorm::normalize(&once);
        prop_assert_eq!(once, twice);
    }

    /// SELECT statements never produce WRITE references; OTHER produces none.
    #[test]
    fn kind_constrains_table_references(raw in sql_statement()) {
        let statement = sqlnorm::analyze_statement(&raw, &HashSet::new());
        match statement.kind {
            SqlKind::Select => {
                prop_assert!(statement.tables.iter().all(|t| t.rw_type == RwType::Read));
            }
            SqlKind::Other => prop_assert!(statement.tables.is_empty()),
            _ => {
                if !statement.tables.is_empty() {
                    prop_assert!(statement.tables.iter().any(|t| t.rw_type == RwType::Write));
                }
            }
        }
    }

    /// Extracted table names are bare and lower-case.
    #[test]
    fn table_names_are_normalized(raw in sql_statement()) {
        let statement = sqlnorm::analyze_statement(&raw, &HashSet::new());
        for usage in &statement.tables {
            prop_assert!(!usage.table_name.contains('.'));
            prop_assert_eq!(usage.table_name.to_lowercase(), usage.table_name.clone());
        }
    }

    /// Whatever the analyzer emits satisfies the IR invariants: referenced
    /// objects exist, confidences stay in range, keys are unique.
    #[test]
    fn analyzer_output_validates(statements in prop::collection::vec(sql_statement(), 0..5)) {
        let mut body = String::from("event ue_gen\n");
        for statement in &statements {
            body.push_str(statement);
            body.push_str(";\n");
        }
        body.push_str("end event\n");

        let file = Parser::new(100).parse("w_gen", SourceKind::Screen, None, "w_gen.srw", &body);
        let output = analyze(&[file], &[], &EngineConfig::default());

        let violations = validate(&output.ir);
        prop_assert!(violations.is_empty(), "violations: {violations:?}");

        for relation in &output.ir.relations {
            prop_assert!((0.0..=1.0).contains(&relation.confidence));
        }
    }

    /// The analyzer is deterministic: the same inputs produce the same
    /// relation multiset.
    #[test]
    fn analyzer_is_deterministic(statements in prop::collection::vec(sql_statement(), 0..4)) {
        let build = || {
            let mut body = String::from("event ue_gen\n");
            for statement in &statements {
                body.push_str(statement);
                body.push_str(";\n");
            }
            body.push_str("end event\n");
            let file = Parser::new(100).parse("w_gen", SourceKind::Screen, None, "w_gen.srw", &body);
            analyze(&[file], &[], &EngineConfig::default())
        };

        let first = build();
        let second = build();

        let keys = |output: &screentrace::domain::analyzer::AnalysisOutput| {
            output
                .ir
                .relations
                .iter()
                .map(|r| {
                    format!(
                        "{}:{}->{}:{}:{}@{:.9}",
                        r.src_type, r.src_name, r.dst_type, r.dst_name, r.relation_type,
                        r.confidence
                    )
                })
                .collect::<Vec<_>>()
        };
        prop_assert_eq!(keys(&first), keys(&second));
    }

    /// Every emitted table relation points at a materialized Table object.
    #[test]
    fn table_relations_have_table_objects(statement in sql_statement()) {
        let body = format!("event ue_gen\n{statement};\nend event\n");
        let file = Parser::new(100).parse("w_gen", SourceKind::Screen, None, "w_gen.srw", &body);
        let output = analyze(&[file], &[], &EngineConfig::default());

        let tables: HashSet<&str> = output
            .ir
            .objects
            .iter()
            .filter(|o| o.object_type == ObjectType::Table)
            .map(|o| o.name.as_str())
            .collect();

        for relation in &output.ir.relations {
            if relation.dst_type == ObjectType::Table {
                prop_assert!(tables.contains(relation.dst_name.as_str()));
            }
        }
    }

    /// Lexing never panics and always terminates with Eof.
    #[test]
    fn lexer_is_total(raw in "[ -~\\n\\t]{0,300}") {
        let tokens = screentrace::domain::lexer::tokenize(&raw);
        prop_assert!(!tokens.is_empty());
        prop_assert_eq!(
            tokens.last().map(|t| t.kind),
            Some(screentrace::domain::lexer::TokenKind::Eof)
        );
    }
}
