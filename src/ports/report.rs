//! Tabular report rendering.
//!
//! Renders the IR query surface into CSV, JSON, or a single HTML page. The
//! datasets mirror what the dashboard consumes: object inventory, event and
//! function map, table impact, screen call graph, unused-object candidates,
//! and data windows.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::error::EngineError;
use crate::infrastructure::store::IrStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Csv,
    Json,
    Html,
}

impl ReportFormat {
    pub fn parse(s: &str) -> Option<ReportFormat> {
        match s.to_lowercase().as_str() {
            "csv" => Some(ReportFormat::Csv),
            "json" => Some(ReportFormat::Json),
            "html" => Some(ReportFormat::Html),
            _ => None,
        }
    }
}

/// Render every dataset of one run. Returns the generated file paths.
pub fn generate_reports(
    store: &IrStore,
    run_id: &str,
    out_dir: &Path,
    format: ReportFormat,
) -> Result<Vec<PathBuf>> {
    if !store.run_exists(run_id)? {
        return Err(EngineError::input(format!("run not found: {run_id}")).into());
    }
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let datasets = collect_datasets(store, run_id)?;
    let mut generated = Vec::new();

    match format {
        ReportFormat::Json => {
            for (name, rows) in &datasets {
                let path = out_dir.join(format!("{name}.json"));
                let payload = serde_json::to_string_pretty(rows)?;
                std::fs::write(&path, payload)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                generated.push(path);
            }
        }
        ReportFormat::Csv => {
            for (name, rows) in &datasets {
                let path = out_dir.join(format!("{name}.csv"));
                std::fs::write(&path, render_csv(rows))
                    .with_context(|| format!("failed to write {}", path.display()))?;
                generated.push(path);
            }
        }
        ReportFormat::Html => {
            let path = out_dir.join("report.html");
            std::fs::write(&path, render_html(run_id, &datasets))
                .with_context(|| format!("failed to write {}", path.display()))?;
            generated.push(path);
        }
    }

    Ok(generated)
}

type Dataset = (&'static str, Vec<Value>);

fn collect_datasets(store: &IrStore, run_id: &str) -> Result<Vec<Dataset>> {
    Ok(vec![
        (
            "object_inventory",
            to_values(&store.list_objects(run_id, None, None, None)?)?,
        ),
        (
            "event_function_map",
            to_values(&store.event_function_map(run_id, None)?)?,
        ),
        (
            "table_impact",
            to_values(&store.table_impact(run_id, None, None)?)?,
        ),
        (
            "screen_call_graph",
            to_values(&store.screen_call_graph(run_id, None, None)?)?,
        ),
        (
            "unused_object_candidates",
            to_values(&store.unused_object_candidates(run_id, None)?)?,
        ),
        (
            "data_windows",
            to_values(&store.data_windows(run_id, None, None)?)?,
        ),
    ])
}

fn to_values<T: Serialize>(rows: &[T]) -> Result<Vec<Value>> {
    rows.iter()
        .map(|row| serde_json::to_value(row).context("failed to encode report row"))
        .collect()
}

fn column_names(rows: &[Value]) -> Vec<String> {
    match rows.first() {
        Some(Value::Object(map)) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn render_csv(rows: &[Value]) -> String {
    let columns = column_names(rows);
    if columns.is_empty() {
        return "empty\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&columns.join(","));
    out.push('\n');
    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|column| csv_quote(&cell_text(row.get(column))))
            .collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}

fn csv_quote(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

fn render_html(run_id: &str, datasets: &[Dataset]) -> String {
    let mut sections = String::new();
    for (name, rows) in datasets {
        let title = name.replace('_', " ");
        sections.push_str(&format!("<h2>{}</h2>\n", html_escape(&title)));
        sections.push_str(&render_html_table(rows));
        sections.push('\n');
    }

    format!(
        "<!doctype html>\n<html lang='en'>\n<head>\n  <meta charset='utf-8' />\n  \
         <title>screentrace report</title>\n  <style>\n    body {{ font-family: sans-serif; margin: 24px; }}\n    \
         table {{ border-collapse: collapse; width: 100%; margin-bottom: 24px; }}\n    \
         th, td {{ border: 1px solid #ccc; padding: 6px 8px; text-align: left; }}\n    \
         th {{ background: #f5f5f5; }}\n  </style>\n</head>\n<body>\n  \
         <h1>screentrace report</h1>\n  <p>run: {}</p>\n{}\n</body>\n</html>\n",
        html_escape(run_id),
        sections
    )
}

fn render_html_table(rows: &[Value]) -> String {
    let columns = column_names(rows);
    if columns.is_empty() {
        return "<p>No data.</p>".to_string();
    }

    let header: String = columns
        .iter()
        .map(|c| format!("<th>{}</th>", html_escape(c)))
        .collect();

    let body: String = rows
        .iter()
        .map(|row| {
            let cells: String = columns
                .iter()
                .map(|c| format!("<td>{}</td>", html_escape(&cell_text(row.get(c)))))
                .collect();
            format!("<tr>{cells}</tr>")
        })
        .collect();

    format!("<table><thead><tr>{header}</tr></thead><tbody>{body}</tbody></table>")
}

fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
