//! Run orchestration.
//!
//! Sequences extract, parse, analyze, persist under the fail-soft policy:
//! per-object failures degrade the outcome but never halt the pipeline.
//! Only a persistence failure or cancellation fails a run outright.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::domain::analyzer;
use crate::domain::config::EngineConfig;
use crate::domain::descriptor::{self, ParsedDataWindow};
use crate::domain::ir::{self, RunRecord, RunStatus};
use crate::domain::parser::{ParsedFile, Parser};
use crate::domain::source_kind::SourceKind;
use crate::error::EngineError;
use crate::infrastructure::concurrency::init_worker_pool;
use crate::infrastructure::encoding::decode_source;
use crate::infrastructure::manifest::{Manifest, ManifestEntry};
use crate::infrastructure::store::{IrStore, PersistCounts};
use crate::ports::{ExtractOptions, Extractor};

/// Pipeline stage a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Extract,
    Parse,
    Persist,
}

/// One aggregated per-object failure.
#[derive(Debug, Clone, Serialize)]
pub struct RunFailure {
    pub stage: RunStage,
    pub subject: String,
    pub reason: String,
}

/// Per-run options supplied by the embedding host or the CLI.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub run_id: Option<String>,
    pub source_version: Option<String>,
    pub cancel: Arc<AtomicBool>,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            run_id: None,
            source_version: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Final result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub counts: PersistCounts,
    pub failures: Vec<RunFailure>,
    /// Resolution notes (unresolved callees); reported but not degrading.
    pub diagnostics: Vec<String>,
    pub elapsed_ms: u64,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Ok => 0,
            RunStatus::Partial => 2,
            RunStatus::Running | RunStatus::Failed => 1,
        }
    }
}

enum ParsedUnit {
    File(ParsedFile),
    Grid(ParsedDataWindow),
}

/// Owns the pipeline contract. Configuration is injected here; runtime
/// changes require a new instance.
pub struct Orchestrator {
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(config: EngineConfig) -> Self {
        Orchestrator { config }
    }

    /// Execute one run end to end against an open store.
    pub fn run(
        &self,
        extractor: &dyn Extractor,
        input: &Path,
        out_dir: &Path,
        store: &mut IrStore,
        options: &RunOptions,
    ) -> Result<RunOutcome> {
        let clock = Instant::now();
        let started_at = Utc::now().to_rfc3339();
        let run_id = options
            .run_id
            .clone()
            .unwrap_or_else(|| new_run_id(&started_at));

        store.begin_run(&RunRecord {
            run_id: run_id.clone(),
            started_at: started_at.clone(),
            finished_at: None,
            status: RunStatus::Running,
            source_version: options.source_version.clone(),
        })?;
        info!("run started: {run_id}");

        let extract_options = ExtractOptions {
            source_version: options.source_version.clone(),
        };
        let manifest = match extractor.extract(input, out_dir, &extract_options) {
            Ok(manifest) => manifest,
            Err(err) => {
                self.finalize(store, &run_id, RunStatus::Failed);
                return Err(err);
            }
        };

        let mut failures: Vec<RunFailure> = manifest
            .failures
            .iter()
            .map(|failure| RunFailure {
                stage: RunStage::Extract,
                subject: failure.path.clone(),
                reason: failure.reason.clone(),
            })
            .collect();

        let (files, grids) = self.parse_manifest(&manifest, &options.cancel, &mut failures);

        if options.cancel.load(Ordering::Relaxed) {
            self.finalize(store, &run_id, RunStatus::Failed);
            return Err(EngineError::Cancelled.into());
        }

        let attempted = manifest.objects.len();
        let parsed = files.len() + grids.len();
        let status = if attempted > 0 && parsed == 0 && !failures.is_empty() {
            RunStatus::Failed
        } else if failures.is_empty() {
            RunStatus::Ok
        } else {
            RunStatus::Partial
        };

        let output = analyzer::analyze(&files, &grids, &self.config);
        let diagnostics: Vec<String> = output
            .diagnostics
            .iter()
            .map(|d| format!("{}: {}", d.object_name, d.message))
            .collect();

        let violations = ir::validate(&output.ir);
        if !violations.is_empty() {
            self.finalize(store, &run_id, RunStatus::Failed);
            return Err(EngineError::persistence(format!(
                "invariant violation: {}",
                violations.join("; ")
            ))
            .into());
        }

        if options.cancel.load(Ordering::Relaxed) {
            self.finalize(store, &run_id, RunStatus::Failed);
            return Err(EngineError::Cancelled.into());
        }

        let counts = match store.persist(&run_id, &output.ir) {
            Ok(counts) => counts,
            Err(err) => {
                self.finalize(store, &run_id, RunStatus::Failed);
                return Err(err);
            }
        };

        self.finalize(store, &run_id, status);
        info!(
            "run finished: {run_id} status={} objects={} relations={}",
            status.as_str(),
            counts.objects,
            counts.relations
        );

        Ok(RunOutcome {
            run_id,
            status,
            counts,
            failures,
            diagnostics,
            elapsed_ms: clock.elapsed().as_millis() as u64,
        })
    }

    /// Parse every manifest entry across the worker pool. The collectors are
    /// append-only and keyed by manifest position so output order is stable.
    fn parse_manifest(
        &self,
        manifest: &Manifest,
        cancel: &AtomicBool,
        failures: &mut Vec<RunFailure>,
    ) -> (Vec<ParsedFile>, Vec<ParsedDataWindow>) {
        init_worker_pool(self.config.workers);
        let parser = Parser::new(self.config.max_errors_per_file);

        let parsed: DashMap<usize, ParsedUnit> = DashMap::new();
        let failed: DashMap<usize, Vec<RunFailure>> = DashMap::new();

        manifest
            .objects
            .par_iter()
            .enumerate()
            .for_each(|(index, entry)| {
                // cancellation is observed at file boundaries
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                match self.parse_entry(&parser, entry) {
                    Ok((unit, entry_failures)) => {
                        if let Some(unit) = unit {
                            parsed.insert(index, unit);
                        }
                        if !entry_failures.is_empty() {
                            failed.insert(index, entry_failures);
                        }
                    }
                    Err(failure) => {
                        failed.insert(index, vec![failure]);
                    }
                }
            });

        let mut files = Vec::new();
        let mut grids = Vec::new();
        let mut ordered: Vec<(usize, ParsedUnit)> = parsed.into_iter().collect();
        ordered.sort_by_key(|(index, _)| *index);
        for (_, unit) in ordered {
            match unit {
                ParsedUnit::File(file) => files.push(file),
                ParsedUnit::Grid(grid) => grids.push(grid),
            }
        }

        let mut ordered_failures: Vec<(usize, Vec<RunFailure>)> = failed.into_iter().collect();
        ordered_failures.sort_by_key(|(index, _)| *index);
        for (_, mut entry_failures) in ordered_failures {
            failures.append(&mut entry_failures);
        }

        (files, grids)
    }

    /// Parse a single extracted object. Returns the parsed unit (if the file
    /// was not abandoned) plus any recovered parse errors.
    fn parse_entry(
        &self,
        parser: &Parser,
        entry: &ManifestEntry,
    ) -> std::result::Result<(Option<ParsedUnit>, Vec<RunFailure>), RunFailure> {
        let bytes = std::fs::read(&entry.extracted_path).map_err(|err| RunFailure {
            stage: RunStage::Parse,
            subject: entry.source_path.clone(),
            reason: format!("failed to read extracted file: {err}"),
        })?;
        let (text, _encoding) = decode_source(&bytes);

        let kind = SourceKind::from_object_type(entry.object_type)
            .or_else(|| SourceKind::from_path(Path::new(&entry.source_path)))
            .unwrap_or(SourceKind::Script);

        if kind.is_descriptor() || descriptor::is_descriptor_text(&text) {
            let grid = descriptor::parse_descriptor(&entry.name, &text);
            return Ok((Some(ParsedUnit::Grid(grid)), Vec::new()));
        }

        let file = parser.parse(
            &entry.name,
            kind,
            entry.module.as_deref(),
            &entry.source_path,
            &text,
        );

        let mut entry_failures: Vec<RunFailure> = file
            .errors
            .iter()
            .map(|error| RunFailure {
                stage: RunStage::Parse,
                subject: entry.source_path.clone(),
                reason: format!("line {}:{}: {}", error.line, error.col, error.message),
            })
            .collect();

        if file.abandoned {
            warn!("{} abandoned after {} errors", entry.source_path, file.errors.len());
            entry_failures.push(RunFailure {
                stage: RunStage::Parse,
                subject: entry.source_path.clone(),
                reason: format!("file abandoned after {} parse errors", file.errors.len()),
            });
            return Ok((None, entry_failures));
        }

        Ok((Some(ParsedUnit::File(file)), entry_failures))
    }

    fn finalize(&self, store: &IrStore, run_id: &str, status: RunStatus) {
        let finished_at = Utc::now().to_rfc3339();
        if let Err(err) = store.finalize_run(run_id, status, &finished_at) {
            warn!("failed to finalize run {run_id}: {err}");
        }
    }
}

fn new_run_id(started_at: &str) -> String {
    let compact: String = started_at
        .chars()
        .filter(|c| c.is_ascii_digit())
        .take(14)
        .collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("run_{compact}_{}", &suffix[..8])
}
