//! Expedition orchestrator CLI
//!
//! ## Commands
//!
//! - `run`: Execute one expedition from a TOML config and record its log
//! - `audit`: Re-check a recorded log against its (or stricter) thresholds
//! - `list`: List recorded runs
//! - `config`: Print the default configuration

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use expedition_core::provenance::ProvenanceSink;
use expedition_core::{
    audit_log, ExpeditionConfig, ExpeditionOrchestrator, FinalizationReport, FsProvenanceSink,
    ProvenanceRecorder, QualityThresholds, RunOutcome,
};

const DEFAULT_PROVENANCE_DIR: &str = ".expedition";

#[derive(Parser)]
#[command(name = "expedition")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Quality-gated expedition orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one expedition to completion
    Run {
        /// Path to the expedition config
        #[arg(short, long, env = "EXPEDITION_CONFIG", default_value = "expedition.toml")]
        config: PathBuf,

        /// Override the configured domain
        #[arg(long)]
        domain: Option<String>,

        /// Override the configured provenance directory
        #[arg(long, env = "EXPEDITION_PROVENANCE_DIR")]
        provenance_dir: Option<PathBuf>,

        /// Print the recorded log as JSON on stdout
        #[arg(long)]
        print_log: bool,
    },

    /// Audit a recorded run
    Audit {
        /// Run ID to audit
        run_id: String,

        /// Provenance directory holding recorded runs
        #[arg(long, env = "EXPEDITION_PROVENANCE_DIR", default_value = DEFAULT_PROVENANCE_DIR)]
        provenance_dir: PathBuf,

        /// Audit against the thresholds in this config instead of the recorded ones
        #[arg(long)]
        thresholds_from: Option<PathBuf>,
    },

    /// List recorded runs
    List {
        /// Only show runs for this domain
        #[arg(long)]
        domain: Option<String>,

        /// Provenance directory holding recorded runs
        #[arg(long, env = "EXPEDITION_PROVENANCE_DIR", default_value = DEFAULT_PROVENANCE_DIR)]
        provenance_dir: PathBuf,
    },

    /// Print the default configuration as TOML
    Config {
        /// Domain to fill in
        #[arg(long, default_value = "my-domain")]
        domain: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    expedition_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            config,
            domain,
            provenance_dir,
            print_log,
        } => cmd_run(&config, domain, provenance_dir, print_log).await,
        Commands::Audit {
            run_id,
            provenance_dir,
            thresholds_from,
        } => cmd_audit(&run_id, &provenance_dir, thresholds_from.as_deref()).await,
        Commands::List {
            domain,
            provenance_dir,
        } => cmd_list(domain.as_deref(), &provenance_dir).await,
        Commands::Config { domain } => cmd_config(&domain),
    }
}

/// Load the config file and apply command-line overrides.
fn load_config(
    path: &Path,
    domain: Option<String>,
    provenance_dir: Option<PathBuf>,
) -> Result<ExpeditionConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let mut config = ExpeditionConfig::from_toml_str(&raw)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    if let Some(domain) = domain {
        config.domain = domain;
    }
    if let Some(dir) = provenance_dir {
        config.provenance_dir = dir;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn open_sink(dir: &Path) -> Result<Arc<FsProvenanceSink>> {
    let sink = FsProvenanceSink::new(dir)
        .with_context(|| format!("Failed to open provenance store {}", dir.display()))?;
    Ok(Arc::new(sink))
}

async fn cmd_run(
    config_path: &Path,
    domain: Option<String>,
    provenance_dir: Option<PathBuf>,
    print_log: bool,
) -> Result<ExitCode> {
    let config = load_config(config_path, domain, provenance_dir)?;
    let sink = open_sink(&config.provenance_dir)?;
    let orchestrator = ExpeditionOrchestrator::from_config(config, ProvenanceRecorder::new(sink))
        .context("Failed to configure stages")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current cycle");
            on_signal.cancel();
        }
    });

    let report = orchestrator
        .run(cancel)
        .await
        .context("Failed to record expedition log")?;
    let log = &report.log;

    if print_log {
        println!("{}", serde_json::to_string_pretty(log)?);
    } else {
        println!("Run:      {}", log.run_id);
        println!("Domain:   {}", log.domain);
        println!("Outcome:  {}", log.outcome);
        println!("Cycles:   {}", log.cycle_count());
        if let Some(m) = &log.final_metrics {
            println!(
                "Metrics:  pass {:.2}  coverage {:.2}  completeness {:.2}",
                m.primary_pass_rate, m.coverage_ratio, m.completeness_ratio
            );
        }
        for shortfall in log.final_shortfalls() {
            println!("  shortfall: {}", shortfall);
        }
        if let Some(reason) = &log.abort_reason {
            println!("Aborted:  {}", reason);
        }
        if let FinalizationReport::Failed { errors, .. } = &log.finalization {
            for error in errors {
                println!("  finalization error: {}", error);
            }
        }
        println!("Digest:   {}", report.digest);
    }

    info!(run_id = %log.run_id, outcome = %log.outcome, "Expedition complete");
    Ok(match log.outcome {
        RunOutcome::Success => ExitCode::SUCCESS,
        RunOutcome::Failed => ExitCode::from(1),
        RunOutcome::Aborted => ExitCode::from(2),
    })
}

async fn cmd_audit(
    run_id: &str,
    provenance_dir: &Path,
    thresholds_from: Option<&Path>,
) -> Result<ExitCode> {
    let sink = open_sink(provenance_dir)?;
    let log = sink
        .read_log(run_id)
        .await
        .with_context(|| format!("Failed to read run {}", run_id))?;

    let thresholds: Option<QualityThresholds> = match thresholds_from {
        Some(path) => Some(load_config(path, Some(log.domain.clone()), None)?.thresholds),
        None => None,
    };
    let report = audit_log(&log, thresholds.as_ref());

    println!("Run:      {}", report.run_id);
    println!("Outcome:  {}", report.outcome);
    for cycle in &report.cycles {
        let verdict = if cycle.passed { "pass" } else { "fail" };
        println!("  cycle {}: {}", cycle.number, verdict);
        for shortfall in &cycle.shortfalls {
            println!("    {}", shortfall);
        }
    }

    if report.is_consistent() {
        println!("Audit:    consistent");
        Ok(ExitCode::SUCCESS)
    } else {
        for finding in &report.findings {
            println!("  finding: {}", finding);
        }
        bail!("{} audit finding(s) for run {}", report.findings.len(), run_id)
    }
}

async fn cmd_list(domain: Option<&str>, provenance_dir: &Path) -> Result<ExitCode> {
    let sink = open_sink(provenance_dir)?;
    let runs = sink
        .list_runs(domain)
        .await
        .context("Failed to list runs")?;

    if runs.is_empty() {
        println!("No runs recorded in {}", provenance_dir.display());
        return Ok(ExitCode::SUCCESS);
    }
    for run in runs {
        println!(
            "{}  {:<8} {:>2} cycle(s)  {}  {}  {}",
            run.run_id,
            run.outcome.to_string(),
            run.cycles,
            run.completed_at.format("%Y-%m-%d %H:%M:%S"),
            run.domain,
            run.digest.short()
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_config(domain: &str) -> Result<ExitCode> {
    let rendered = ExpeditionConfig::for_domain(domain)
        .to_toml_string()
        .context("Failed to render default config")?;
    print!("{}", rendered);
    Ok(ExitCode::SUCCESS)
}
