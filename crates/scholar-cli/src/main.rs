//! `scholar`: CLI sobre el store de ficheros.
//!
//! Códigos de salida: 0 run completo / operación correcta, 3 run parcial,
//! 4 run fallido, 1 error operativo (2 lo reserva clap para uso incorrecto).
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args as ClapArgs, Parser, Subcommand};
use log::{error, info};
use scholar_core::{PipelineConfig, PipelineRun, RunStatus, StageStatus};
use scholar_export::ExportValidator;
use scholar_persistence::{FsArtifactStore, FsEventStore, StoreConfig};
use scholar_pipeline::{CommandLlmClient, LlmClient, PipelineError, RunReport, ScriptedLlmClient, StageOrchestrator};
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod input;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("input: {0}")]
    Input(String),
    #[error("pipeline config has no `llm` command")]
    NoLlm,
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("store: {0}")]
    Persistence(#[from] scholar_persistence::PersistenceError),
    #[error("export: {0}")]
    Export(#[from] scholar_export::ExportError),
}

#[derive(Parser, Debug)]
#[command(name = "scholar", about = "Provenance-tracked, quality-gated research pipeline")]
struct Cli {
    /// Pipeline definition (JSON).
    #[arg(long, global = true, env = "SCHOLAR_CONFIG", default_value = "pipeline.json")]
    config: PathBuf,
    /// Store root; defaults to SCHOLAR_STORE_DIR or `.scholar`.
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline over a corpus of documents.
    Run(RunArgs),
    /// Show a run reconstructed from its events, or list runs.
    Status {
        run: Option<Uuid>,
    },
    /// Re-export a run from existing artifacts without recomputation.
    Export {
        run: Uuid,
        #[arg(long)]
        out: PathBuf,
    },
    /// Release a flagged artifact for downstream use.
    Override(OverrideArgs),
    /// Open a branch of a run reusing its analyses.
    Branch {
        run: Uuid,
        #[arg(long)]
        exports: Option<PathBuf>,
    },
    /// Verify provenance chains of a run or an export directory.
    Verify {
        #[arg(required_unless_present = "export_dir")]
        run: Option<Uuid>,
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Files or directories with the input documents.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Root directory for exports (`<exports>/<run_id>/`).
    #[arg(long)]
    exports: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
struct OverrideArgs {
    run: Uuid,
    hash: String,
    #[arg(long)]
    operator: String,
    #[arg(long, default_value = "")]
    note: String,
}

type Orchestrator = StageOrchestrator<FsArtifactStore, FsEventStore>;

fn init_logging(default_filter: &str) {
    let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
                                     .with_writer(std::io::stderr)
                                     .try_init();
}

fn status_code(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Complete | RunStatus::Open => ExitCode::SUCCESS,
        RunStatus::Partial => ExitCode::from(3),
        RunStatus::Failed => ExitCode::from(4),
    }
}

fn llm_client(cfg: &PipelineConfig, required: bool) -> Result<Arc<dyn LlmClient>, CliError> {
    match &cfg.llm {
        Some(cmd) => Ok(Arc::new(CommandLlmClient::new(cmd.clone()))),
        None if required => Err(CliError::NoLlm),
        // Consultas sin gasto LLM: cualquier llamada sería rechazada.
        None => Ok(Arc::new(ScriptedLlmClient::new())),
    }
}

fn print_run(run: &PipelineRun) {
    println!("run {} ({})", run.id, run.effective_status());
    if let Some(parent) = run.parent {
        println!("  branch of {parent}");
    }
    for slot in &run.stages {
        let detail = match (&slot.status, &slot.error) {
            (StageStatus::Failed, Some((class, msg))) => format!(" [{class:?}] {msg}"),
            _ => String::new(),
        };
        println!("  {:<10} {:?}{detail}", slot.stage.as_str(), slot.status);
    }
    println!("  artifacts: {}  retries: {}", run.artifacts.len(), run.retries);
    for r in &run.rejected {
        println!("  rejected {} ({:?}): {}", r.unit_id, r.class, r.reason);
    }
    for h in run.flagged_hashes() {
        println!("  flagged for review: {h}");
    }
    if let Some(reason) = &run.cancelled {
        println!("  cancelled: {reason}");
    }
}

fn print_report(report: &RunReport) {
    print_run(&report.run);
    if let Some(dir) = &report.export_dir {
        println!("  export: {}", dir.display());
    }
}

async fn dispatch(cli: Cli, cfg: PipelineConfig, store_cfg: StoreConfig) -> Result<ExitCode, CliError> {
    let store = Arc::new(FsArtifactStore::open_with(&store_cfg)?);
    let events = Arc::new(FsEventStore::open_with(&store_cfg)?);
    let needs_llm = matches!(cli.command, Command::Run(_) | Command::Branch { .. });
    let llm = llm_client(&cfg, needs_llm)?;
    for ev in &cfg.evaluators {
        info!("cross-validation evaluator {} via {}",
              ev.name,
              ev.llm.as_ref().map(|c| c.program.as_str()).unwrap_or("primary llm"));
    }
    let orchestrator: Orchestrator = StageOrchestrator::new(cfg, store.clone(), events, llm)?;
    let default_exports = store_cfg.root.join("exports");

    match cli.command {
        Command::Run(args) => {
            let docs = input::load_documents(&args.inputs)?;
            info!("loaded {} documents", docs.len());
            let report = orchestrator.with_export_root(args.exports.unwrap_or(default_exports))
                                     .run(docs)
                                     .await?;
            print_report(&report);
            Ok(status_code(report.status()))
        }
        Command::Status { run: Some(id) } => {
            let run = orchestrator.status(id)?;
            print_run(&run);
            Ok(status_code(run.effective_status()))
        }
        Command::Status { run: None } => {
            for run in orchestrator.runs()? {
                println!("{}  {:<8} units={} parent={}",
                         run.id,
                         run.effective_status(),
                         run.unit_count,
                         run.parent.map(|p| p.to_string()).unwrap_or_else(|| "-".into()));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Export { run, out } => {
            let record = orchestrator.export_run(run, &out)?;
            println!("exported run {run} ({}) to {}", record.status, out.display());
            for f in &record.files {
                println!("  {} sha256={} rows={}", f.name, f.sha256, f.rows.map(|r| r.to_string()).unwrap_or_else(|| "-".into()));
            }
            Ok(status_code(record.status))
        }
        Command::Override(args) => {
            orchestrator.grant_override(args.run, &args.hash, &args.operator, &args.note)?;
            println!("override recorded on {} by {}", args.hash, args.operator);
            Ok(ExitCode::SUCCESS)
        }
        Command::Branch { run, exports } => {
            let report = orchestrator.with_export_root(exports.unwrap_or(default_exports))
                                     .branch(run)
                                     .await?;
            print_report(&report);
            Ok(status_code(report.status()))
        }
        Command::Verify { export_dir: Some(dir), .. } => {
            let record = ExportValidator::new(store.as_ref()).verify_export(&dir)?;
            println!("export of run {} verified ({} files, {} upstream chains)",
                     record.run_id,
                     record.files.len(),
                     record.upstream.len());
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify { run: Some(id), .. } => {
            let checked = orchestrator.verify_run(id)?;
            println!("run {id}: {checked} artifacts verified");
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify { run: None, export_dir: None } => Err(CliError::Input("verify needs a run id or --export-dir".into())),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut store_cfg = StoreConfig::from_env();
    if let Some(root) = &cli.store {
        store_cfg.root = root.clone();
    }
    let cfg = match PipelineConfig::from_path(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            init_logging(&store_cfg.log_filter);
            error!("{e}");
            eprintln!("scholar: {e}");
            return ExitCode::from(1);
        }
    };
    init_logging(cfg.log_filter.as_deref().unwrap_or(&store_cfg.log_filter));
    match dispatch(cli, cfg, store_cfg).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            eprintln!("scholar: {e}");
            ExitCode::from(1)
        }
    }
}
