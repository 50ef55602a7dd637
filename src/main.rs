// Command-line entry point for screentrace.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use screentrace::application::{Orchestrator, RunOptions, RunOutcome};
use screentrace::domain::config::EngineConfig;
use screentrace::error::EngineError;
use screentrace::infrastructure::differ::diff_runs;
use screentrace::infrastructure::extract::{select_extractor, ManifestExtractor};
use screentrace::infrastructure::store::IrStore;
use screentrace::ports::report::{generate_reports, ReportFormat};
use screentrace::ports::{ExtractOptions, Extractor};

#[derive(Parser, Debug)]
#[command(name = "screentrace", version, about = "Static analysis for legacy visual-client sources")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract sources into a manifest without analyzing
    Extract {
        /// Source directory (or extractor input)
        #[arg(short, long)]
        input: PathBuf,

        /// Working directory for extracted objects and the manifest
        #[arg(short, long)]
        out: PathBuf,

        /// Extractor selector (auto, text, binary)
        #[arg(long, default_value = "auto")]
        extractor: String,

        /// External extractor command template with {input}/{output}
        #[arg(long)]
        extractor_cmd: Option<String>,

        /// Source version label recorded in the manifest
        #[arg(long)]
        source_version: Option<String>,
    },

    /// Extract, parse, analyze, and persist one run
    Analyze {
        /// Source directory (or extractor input)
        #[arg(short, long, required_unless_present = "manifest", conflicts_with = "manifest")]
        input: Option<PathBuf>,

        /// Working directory for extracted objects and the manifest
        #[arg(short, long)]
        out: PathBuf,

        /// Re-analyze a previously written manifest instead of extracting
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// IR store path
        #[arg(long, default_value = "screentrace.db")]
        db: PathBuf,

        /// Extractor selector (auto, text, binary)
        #[arg(long, default_value = "auto")]
        extractor: String,

        /// External extractor command template with {input}/{output}
        #[arg(long)]
        extractor_cmd: Option<String>,

        /// Run id override
        #[arg(long)]
        run_id: Option<String>,

        /// Source version label recorded on the run
        #[arg(long)]
        source_version: Option<String>,

        /// Engine config file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Parse errors tolerated per file
        #[arg(long)]
        max_errors: Option<usize>,
    },

    /// Render reports for a persisted run
    Report {
        #[arg(long, default_value = "screentrace.db")]
        db: PathBuf,

        #[arg(short, long)]
        out: PathBuf,

        /// Report format (csv, json, html)
        #[arg(short, long, default_value = "html")]
        format: String,

        /// Run id; defaults to the most recent run
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Compare two runs
    Diff {
        #[arg(long, default_value = "screentrace.db")]
        db: PathBuf,

        /// Older run id
        #[arg(long)]
        old: String,

        /// Newer run id
        #[arg(long)]
        new: String,
    },

    /// List persisted runs, most recent first
    Runs {
        #[arg(long, default_value = "screentrace.db")]
        db: PathBuf,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Analyze and render reports in one pass
    RunAll {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        out: PathBuf,

        #[arg(long, default_value = "screentrace.db")]
        db: PathBuf,

        #[arg(long, default_value = "auto")]
        extractor: String,

        #[arg(long)]
        extractor_cmd: Option<String>,

        #[arg(short, long, default_value = "html")]
        format: String,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match dispatch(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("[ERROR] {err:#}");
            ExitCode::from(1)
        }
    }
}

fn dispatch(command: Command) -> Result<ExitCode> {
    match command {
        Command::Extract {
            input,
            out,
            extractor,
            extractor_cmd,
            source_version,
        } => {
            let extractor = select_extractor(&extractor, extractor_cmd.as_deref())?;
            let manifest = extractor.extract(&input, &out, &ExtractOptions { source_version })?;
            println!("[OK] manifest={}", out.join("manifest.json").display());
            println!("[OK] objects={}", manifest.objects.len());
            for failure in &manifest.failures {
                println!("[WARN] {}: {}", failure.path, failure.reason);
            }
            if manifest.failures.is_empty() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(2))
            }
        }

        Command::Analyze {
            input,
            out,
            manifest,
            db,
            extractor,
            extractor_cmd,
            run_id,
            source_version,
            config,
            max_errors,
        } => {
            let engine_config = load_config(config, max_errors)?;
            let outcome = analyze(
                &engine_config,
                input.as_deref(),
                manifest.as_deref(),
                &out,
                &db,
                &extractor,
                extractor_cmd.as_deref(),
                run_id,
                source_version,
            )?;
            print_outcome(&outcome);
            Ok(ExitCode::from(outcome.exit_code() as u8))
        }

        Command::Report { db, out, format, run_id } => {
            let format = ReportFormat::parse(&format)
                .ok_or_else(|| EngineError::input(format!("unsupported report format: {format}")))?;
            let store = open_store(&db)?;
            let run_id = match run_id {
                Some(run_id) => run_id,
                None => latest_run_id(&store)?,
            };
            let files = generate_reports(&store, &run_id, &out, format)?;
            println!("[OK] run_id={run_id}");
            for file in files {
                println!("[OK] report={}", file.display());
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Diff { db, old, new } => {
            let store = open_store(&db)?;
            let diff = diff_runs(&store, &old, &new)?;
            println!(
                "[OK] diff {} -> {}: {} added, {} removed",
                diff.run_old,
                diff.run_new,
                diff.added.len(),
                diff.removed.len()
            );
            for entry in &diff.added {
                println!("[OK] + {}", entry.key);
            }
            for entry in &diff.removed {
                println!("[OK] - {}", entry.key);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Runs { db, limit } => {
            let store = open_store(&db)?;
            for run in store.runs(limit)? {
                println!(
                    "[OK] {} started={} status={} version={}",
                    run.run_id,
                    run.started_at,
                    run.status,
                    run.source_version.as_deref().unwrap_or("-")
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::RunAll {
            input,
            out,
            db,
            extractor,
            extractor_cmd,
            format,
            config,
        } => {
            let format = ReportFormat::parse(&format)
                .ok_or_else(|| EngineError::input(format!("unsupported report format: {format}")))?;
            let engine_config = load_config(config, None)?;
            let outcome = analyze(
                &engine_config,
                Some(&input),
                None,
                &out,
                &db,
                &extractor,
                extractor_cmd.as_deref(),
                None,
                None,
            )?;
            print_outcome(&outcome);

            let store = open_store(&db)?;
            let report_dir = out.join("reports");
            let files = generate_reports(&store, &outcome.run_id, &report_dir, format)?;
            for file in files {
                println!("[OK] report={}", file.display());
            }
            Ok(ExitCode::from(outcome.exit_code() as u8))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn analyze(
    engine_config: &EngineConfig,
    input: Option<&Path>,
    manifest: Option<&Path>,
    out: &Path,
    db: &Path,
    extractor: &str,
    extractor_cmd: Option<&str>,
    run_id: Option<String>,
    source_version: Option<String>,
) -> Result<RunOutcome> {
    let extractor: Box<dyn Extractor> = match manifest {
        Some(path) => Box::new(ManifestExtractor::new(path)),
        None => select_extractor(extractor, extractor_cmd)?,
    };
    let input = input.unwrap_or_else(|| Path::new("."));
    let mut store = open_store(db)?;
    let orchestrator = Orchestrator::new(engine_config.clone());
    let options = RunOptions {
        run_id,
        source_version,
        ..Default::default()
    };
    orchestrator.run(extractor.as_ref(), input, out, &mut store, &options)
}

fn load_config(path: Option<PathBuf>, max_errors: Option<usize>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::from_toml_file(&path)?,
        None => EngineConfig::default(),
    };
    if let Some(max_errors) = max_errors {
        config.max_errors_per_file = max_errors;
    }
    Ok(config)
}

fn open_store(db: &Path) -> Result<IrStore> {
    IrStore::open(db)
}

fn latest_run_id(store: &IrStore) -> Result<String> {
    store
        .runs(None)?
        .first()
        .map(|run| run.run_id.clone())
        .ok_or_else(|| EngineError::input("store has no runs").into())
}

fn print_outcome(outcome: &RunOutcome) {
    match outcome.exit_code() {
        0 | 2 => {
            println!(
                "[OK] run_id={} status={} objects={} events={} functions={} relations={} sql={} dw={} elapsed_ms={}",
                outcome.run_id,
                outcome.status.as_str(),
                outcome.counts.objects,
                outcome.counts.events,
                outcome.counts.functions,
                outcome.counts.relations,
                outcome.counts.sql_statements,
                outcome.counts.data_windows,
                outcome.elapsed_ms
            );
            for failure in &outcome.failures {
                println!("[WARN] {:?}: {} ({})", failure.stage, failure.subject, failure.reason);
            }
            for diagnostic in &outcome.diagnostics {
                println!("[WARN] {diagnostic}");
            }
        }
        _ => {
            println!("[ERROR] run_id={} status={}", outcome.run_id, outcome.status.as_str());
        }
    }
}
