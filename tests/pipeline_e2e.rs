//! End-to-end pipeline scenarios: source directory in, queryable IR out.

use std::path::Path;

use screentrace::application::{Orchestrator, RunOptions, RunOutcome};
use screentrace::domain::config::EngineConfig;
use screentrace::domain::ir::RunStatus;
use screentrace::infrastructure::differ::diff_runs;
use screentrace::infrastructure::extract::{AutoExtractor, ManifestExtractor, TextExtractor};
use screentrace::infrastructure::store::IrStore;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    store: IrStore,
    outcome: RunOutcome,
}

fn run_pipeline(sources: &[(&str, &str)]) -> Fixture {
    run_pipeline_with(sources, EngineConfig::default())
}

fn run_pipeline_with(sources: &[(&str, &str)], config: EngineConfig) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    for (name, body) in sources {
        let path = src.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, body).unwrap();
    }

    let mut store = IrStore::open_in_memory().unwrap();
    let outcome = Orchestrator::new(config)
        .run(
            &TextExtractor,
            &src,
            &dir.path().join("out"),
            &mut store,
            &RunOptions::default(),
        )
        .unwrap();

    Fixture {
        _dir: dir,
        store,
        outcome,
    }
}

fn object_names(fixture: &Fixture, object_type: &str) -> Vec<String> {
    fixture
        .store
        .list_objects(&fixture.outcome.run_id, None, None, None)
        .unwrap()
        .into_iter()
        .filter(|o| o.object_type == object_type)
        .map(|o| o.name)
        .collect()
}

#[test]
fn screen_with_dml_yields_tables_and_write_relations() {
    let fixture = run_pipeline(&[(
        "s1.srw",
        "event save\n\
         UPDATE tb_x SET a = 1 WHERE k = :k;\n\
         INSERT INTO tb_y(a) VALUES(1);\n\
         end event\n",
    )]);

    assert_eq!(fixture.outcome.status, RunStatus::Ok);
    assert_eq!(object_names(&fixture, "Screen"), vec!["s1"]);
    let mut tables = object_names(&fixture, "Table");
    tables.sort();
    assert_eq!(tables, vec!["tb_x", "tb_y"]);
    assert_eq!(fixture.outcome.counts.sql_statements, 2);

    let impact = fixture
        .store
        .table_impact(&fixture.outcome.run_id, None, None)
        .unwrap();
    assert!(impact
        .iter()
        .any(|r| r.table_name == "tb_x" && r.rw_type == "WRITE" && r.sql_kind == "UPDATE"));
    assert!(impact
        .iter()
        .any(|r| r.table_name == "tb_y" && r.rw_type == "WRITE" && r.sql_kind == "INSERT"));
}

#[test]
fn open_and_self_trigger_resolve_with_expected_confidences() {
    let fixture = run_pipeline(&[
        (
            "s1.srw",
            "event ue_save\n\
             x = 1\n\
             end event\n\
             \n\
             event clicked\n\
             open(s2)\n\
             triggerevent(\"ue_save\")\n\
             end event\n",
        ),
        ("s2.srw", "event ue_open\nx = 1\nend event\n"),
    ]);

    let graph = fixture
        .store
        .screen_call_graph(&fixture.outcome.run_id, None, None)
        .unwrap();
    let opens = graph
        .iter()
        .find(|r| r.src_name == "s1" && r.dst_name == "s2" && r.relation_type == "opens")
        .expect("opens edge");
    assert!((opens.confidence - 0.95).abs() < 1e-9);

    // triggers_event is not part of the screen graph query; read it via diff
    // keys instead: persist guarantees it exists when the analyzer emitted it
    assert_eq!(fixture.outcome.counts.relations, 2);
}

#[test]
fn descriptor_yields_datagrid_reads_and_update_write() {
    let fixture = run_pipeline(&[(
        "dw_a.srd",
        "release 12;\n\
         datawindow(units=0)\n\
         table(column=(type=char(10) name=x dbname=\"tb_a.x\" )\n\
         retrieve=\"SELECT x FROM tb_a JOIN tb_b ON tb_a.k = tb_b.k\"\n\
         update=\"tb_a\"\n\
         )\n",
    )]);

    assert_eq!(object_names(&fixture, "DataGrid"), vec!["dw_a"]);
    let mut tables = object_names(&fixture, "Table");
    tables.sort();
    assert_eq!(tables, vec!["tb_a", "tb_b"]);

    let impact = fixture
        .store
        .table_impact(&fixture.outcome.run_id, None, None)
        .unwrap();
    assert!(impact
        .iter()
        .any(|r| r.table_name == "tb_a" && r.rw_type == "READ" && r.sql_kind == "SELECT"));
    assert!(impact
        .iter()
        .any(|r| r.table_name == "tb_b" && r.rw_type == "READ"));

    let windows = fixture
        .store
        .data_windows(&fixture.outcome.run_id, None, None)
        .unwrap();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].base_table.as_deref(), Some("tb_a"));
}

#[test]
fn file_over_error_budget_degrades_run_to_partial() {
    let mut broken = String::new();
    for _ in 0..6 {
        broken.push_str("event\n");
    }
    let fixture = run_pipeline_with(
        &[
            ("w_bad.srw", broken.as_str()),
            ("w_good.srw", "event ue_ok\nUPDATE tb_z SET a = 1;\nend event\n"),
        ],
        EngineConfig {
            max_errors_per_file: 5,
            ..Default::default()
        },
    );

    assert_eq!(fixture.outcome.status, RunStatus::Partial);
    assert_eq!(fixture.outcome.exit_code(), 2);
    assert!(fixture
        .outcome
        .failures
        .iter()
        .any(|f| f.subject.ends_with("w_bad.srw") && f.reason.contains("abandoned")));

    // the healthy file produced complete records
    assert_eq!(object_names(&fixture, "Screen"), vec!["w_good"]);
    assert_eq!(object_names(&fixture, "Table"), vec!["tb_z"]);
}

#[test]
fn ambiguous_function_splits_confidence_across_candidates() {
    let fixture = run_pipeline(&[
        (
            "u_one.sru",
            "public function integer f (long a)\nreturn a\nend function\n",
        ),
        (
            "u_two.sru",
            "public function integer f (long a)\nreturn a\nend function\n",
        ),
        ("w_caller.srw", "event clicked\nx = f(1)\nend event\n"),
    ]);

    let graph = fixture
        .store
        .screen_call_graph(&fixture.outcome.run_id, Some("w_caller"), None)
        .unwrap();
    let calls: Vec<_> = graph
        .iter()
        .filter(|r| r.relation_type == "calls")
        .collect();
    assert_eq!(calls.len(), 2);
    for call in calls {
        assert!((call.confidence - 0.425).abs() < 1e-9);
    }
}

#[test]
fn screen_using_grid_links_through_uses_dw() {
    let fixture = run_pipeline(&[
        (
            "w_orders.srw",
            "event ue_refresh\ndw_orders.retrieve()\nend event\n",
        ),
        (
            "dw_orders.srd",
            "release 12;\ntable( retrieve=\"SELECT id FROM tb_orders\" )\n",
        ),
    ]);

    // relations: uses_dw + reads_table
    assert_eq!(fixture.outcome.counts.relations, 2);
    let impact = fixture
        .store
        .table_impact(&fixture.outcome.run_id, Some("tb_orders"), None)
        .unwrap();
    assert_eq!(impact.len(), 1);
    assert_eq!(impact[0].object_name, "dw_orders");
}

#[test]
fn unused_object_shows_up_as_candidate() {
    let fixture = run_pipeline(&[
        ("w_used.srw", "event clicked\nopen(w_used)\nend event\n"),
        ("m_orphan.srm", "// nothing declared\n"),
    ]);

    let unused = fixture
        .store
        .unused_object_candidates(&fixture.outcome.run_id, None)
        .unwrap();
    assert_eq!(unused.len(), 1);
    assert_eq!(unused[0].name, "m_orphan");
}

#[test]
fn module_is_taken_from_directory_layout() {
    let fixture = run_pipeline(&[("orders/w_main.srw", "event clicked\nx = 1\nend event\n")]);
    let objects = fixture
        .store
        .list_objects(&fixture.outcome.run_id, None, Some("w_main"), None)
        .unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].module.as_deref(), Some("orders"));
    assert!(Path::new(&objects[0].source_path.clone().unwrap()).ends_with("orders/w_main.srw"));
}

#[test]
fn archived_sources_flow_through_the_pipeline() {
    use std::io::Write;
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("sources.zip");
    let file = std::fs::File::create(&archive).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    writer
        .start_file("w_save.srw", zip::write::FileOptions::default())
        .unwrap();
    writer
        .write_all(b"event ue_save\nUPDATE tb_x SET a = 1;\nend event\n")
        .unwrap();
    writer.finish().unwrap();

    let mut store = IrStore::open_in_memory().unwrap();
    let outcome = Orchestrator::new(EngineConfig::default())
        .run(
            &AutoExtractor::default(),
            &archive,
            &dir.path().join("out"),
            &mut store,
            &RunOptions::default(),
        )
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Ok);
    assert_eq!(outcome.counts.objects, 2); // screen + table
    let objects = store
        .list_objects(&outcome.run_id, None, Some("w_save"), None)
        .unwrap();
    assert_eq!(objects.len(), 1);
    assert!(objects[0]
        .source_path
        .as_deref()
        .unwrap()
        .contains("sources.zip!"));
}

#[test]
fn reanalyzing_a_saved_manifest_reproduces_the_ir() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(
        src.join("w_a.srw"),
        "event ue_save\nUPDATE tb_x SET a = :v;\nend event\n",
    )
    .unwrap();
    let out = dir.path().join("out");

    let mut store = IrStore::open_in_memory().unwrap();
    let orchestrator = Orchestrator::new(EngineConfig::default());
    let direct = orchestrator
        .run(
            &TextExtractor,
            &src,
            &out,
            &mut store,
            &RunOptions {
                run_id: Some("run_direct".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    let replay = ManifestExtractor::new(out.join("manifest.json"));
    let replayed = orchestrator
        .run(
            &replay,
            &src,
            &out,
            &mut store,
            &RunOptions {
                run_id: Some("run_replayed".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(replayed.status, RunStatus::Ok);
    assert_eq!(replayed.counts.objects, direct.counts.objects);

    let diff = diff_runs(&store, &direct.run_id, &replayed.run_id).unwrap();
    assert!(diff.added.is_empty(), "unexpected additions: {:?}", diff.added);
    assert!(diff.removed.is_empty(), "unexpected removals: {:?}", diff.removed);
}

#[test]
fn outcome_reports_unresolved_callees_without_degrading() {
    let fixture = run_pipeline(&[(
        "w_a.srw",
        "event clicked\nopen(w_not_in_run)\nend event\n",
    )]);
    assert_eq!(fixture.outcome.status, RunStatus::Ok);
    assert!(fixture
        .outcome
        .diagnostics
        .iter()
        .any(|d| d.contains("w_not_in_run")));
}
