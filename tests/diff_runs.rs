//! Run comparison scenarios against a shared store file.

use screentrace::application::{Orchestrator, RunOptions};
use screentrace::domain::config::EngineConfig;
use screentrace::infrastructure::differ::{diff_runs, DiffCategory};
use screentrace::infrastructure::extract::TextExtractor;
use screentrace::infrastructure::store::IrStore;
use tempfile::TempDir;

fn analyze_into(
    store: &mut IrStore,
    dir: &TempDir,
    label: &str,
    sources: &[(&str, &str)],
) -> String {
    let src = dir.path().join(format!("src_{label}"));
    std::fs::create_dir_all(&src).unwrap();
    for (name, body) in sources {
        std::fs::write(src.join(name), body).unwrap();
    }
    let options = RunOptions {
        run_id: Some(format!("run_{label}")),
        ..Default::default()
    };
    let outcome = Orchestrator::new(EngineConfig::default())
        .run(
            &TextExtractor,
            &src,
            &dir.path().join(format!("out_{label}")),
            store,
            &options,
        )
        .unwrap();
    outcome.run_id
}

#[test]
fn added_screen_and_removed_grid_show_in_diff() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = IrStore::open_in_memory().unwrap();

    let base: Vec<(&str, &str)> = vec![
        ("s1.srw", "event clicked\nopen(s1)\nend event\n"),
        (
            "dw_old.srd",
            "release 12;\ntable( retrieve=\"SELECT a FROM tb_a\" )\n",
        ),
    ];
    let next: Vec<(&str, &str)> = vec![
        ("s1.srw", "event clicked\nopen(s1)\nend event\n"),
        ("s3.srw", "event clicked\nx = 1\nend event\n"),
    ];

    let r1 = analyze_into(&mut store, &dir, "one", &base);
    let r2 = analyze_into(&mut store, &dir, "two", &next);

    let diff = diff_runs(&store, &r1, &r2).unwrap();

    assert!(diff
        .added
        .iter()
        .any(|e| e.category == DiffCategory::Object && e.key == "Screen:s3"));
    assert!(diff
        .removed
        .iter()
        .any(|e| e.category == DiffCategory::Object && e.key == "DataGrid:dw_old"));
    // the grid's relations and records leave with it
    assert!(diff
        .removed
        .iter()
        .any(|e| e.category == DiffCategory::Relation && e.key.contains("dw_old")));
    assert!(diff
        .removed
        .iter()
        .any(|e| e.category == DiffCategory::DataWindow));
    assert!(diff.changed.is_empty());
}

#[test]
fn same_sources_twice_diff_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = IrStore::open_in_memory().unwrap();

    let sources: Vec<(&str, &str)> = vec![
        (
            "w_a.srw",
            "event ue_save\nUPDATE tb_x SET a = :v;\nend event\n",
        ),
        (
            "dw_b.srd",
            "release 12;\ntable( retrieve=\"SELECT a FROM tb_b\" update=\"tb_b\" )\n",
        ),
    ];

    let r1 = analyze_into(&mut store, &dir, "first", &sources);
    let r2 = analyze_into(&mut store, &dir, "second", &sources);

    let diff = diff_runs(&store, &r1, &r2).unwrap();
    assert!(diff.added.is_empty(), "unexpected additions: {:?}", diff.added);
    assert!(diff.removed.is_empty(), "unexpected removals: {:?}", diff.removed);
}

#[test]
fn store_survives_reopen_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ir.db");

    let r1 = {
        let mut store = IrStore::open(&db_path).unwrap();
        analyze_into(
            &mut store,
            &dir,
            "persisted",
            &[("w_a.srw", "event e\nx = 1\nend event\n")],
        )
    };

    let store = IrStore::open(&db_path).unwrap();
    assert!(store.run_exists(&r1).unwrap());
    let objects = store.list_objects(&r1, None, None, None).unwrap();
    assert_eq!(objects.len(), 1);
}
