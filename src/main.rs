//! Redline CLI entry point.
//!
//! One-shot subcommands for key setup, producer-side sealing, ingestion,
//! plan generation, and local gateway calls, plus `serve` for the HTTP
//! gateway.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use redline::artifacts::{self, FINDING_EXTENSION};
use redline::config;
use redline::crypto::{self, custody::PRIVATE_KEY_FILE, LocalCustodian};
use redline::gateway::{self, ChatRequest};
use redline::logging;
use redline::runtime::Runtime;

/// Redline: encrypted findings in, gated remediation plans out.
#[derive(Parser)]
#[command(name = "redline", version, about)]
struct Cli {
    /// Runtime root (default: `$REDLINE_ROOT` or `~/.redline`).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Create directories, a keypair, the default ruleset, and secrets.
    Init,
    /// Generate a new custodian keypair.
    Keygen {
        /// Replace an existing keypair. Existing envelopes become unreadable.
        #[arg(long)]
        force: bool,
    },
    /// Encrypt a finding with the public key only.
    Seal {
        /// Plaintext finding JSON.
        finding: PathBuf,
        /// Output path (default: `inbox/<name>.enc`).
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Decrypt and redact findings into sanitized records.
    Ingest {
        /// Artifacts to process (default: everything in the inbox).
        artifacts: Vec<PathBuf>,
    },
    /// Generate encrypted plans from sanitized records.
    Plan {
        /// Scan ids to plan (default: every sanitized record).
        scan_ids: Vec<String>,
    },
    /// Ingest the inbox, then plan every scan that was sanitized.
    Run,
    /// Serve the decryption gateway over HTTP.
    Serve,
    /// Ask the gateway about a scan and print the JSON response.
    Chat {
        /// Scan id.
        scan_id: String,
        /// Question for the quick response.
        #[arg(long, default_value = "")]
        question: String,
        /// Also decrypt and return the plan.
        #[arg(long)]
        request_plan: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => config::root_dir()?,
    };

    if !matches!(cli.command, Command::Serve) {
        logging::init_cli();
    }

    match cli.command {
        Command::Init => handle_init(&root),
        Command::Keygen { force } => handle_keygen(&root, force),
        Command::Seal { finding, out } => handle_seal(&root, &finding, out).await,
        Command::Ingest { artifacts } => handle_ingest(&root, artifacts).await.map(|_| ()),
        Command::Plan { scan_ids } => handle_plan(&root, scan_ids).await,
        Command::Run => handle_run(&root).await,
        Command::Serve => handle_serve(&root).await,
        Command::Chat {
            scan_id,
            question,
            request_plan,
        } => handle_chat(&root, scan_id, question, request_plan).await,
    }
}

fn handle_init(root: &Path) -> anyhow::Result<()> {
    let runtime = Runtime::load(root)?;
    let report = runtime.init()?;
    for path in &report.created {
        println!("created {}", path.display());
    }
    println!("custodian fingerprint {}", report.fingerprint);
    Ok(())
}

fn handle_keygen(root: &Path, force: bool) -> anyhow::Result<()> {
    let runtime = Runtime::load(root)?;
    let private = runtime.paths.keys.join(PRIVATE_KEY_FILE);
    if private.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to replace it",
            private.display()
        );
    }
    let custodian = LocalCustodian::generate();
    custodian.save(&runtime.paths.keys)?;
    println!("custodian fingerprint {}", custodian.fingerprint());
    Ok(())
}

async fn handle_seal(root: &Path, finding: &Path, out: Option<PathBuf>) -> anyhow::Result<()> {
    let runtime = Runtime::load(root)?;
    let custodian = runtime.public_custodian()?;
    let plaintext = zeroize::Zeroizing::new(
        tokio::fs::read(finding)
            .await
            .with_context(|| format!("failed to read {}", finding.display()))?,
    );

    let envelope = crypto::encrypt(&plaintext, custodian.as_ref()).await?;
    let target = match out {
        Some(out) => out,
        None => {
            let stem = finding
                .file_stem()
                .and_then(|s| s.to_str())
                .context("finding path has no usable file name")?;
            runtime
                .paths
                .inbox
                .join(format!("{stem}.{FINDING_EXTENSION}"))
        }
    };
    artifacts::write_atomic(&target, &envelope.to_json()?).await?;
    println!("sealed {}", target.display());
    Ok(())
}

async fn handle_ingest(root: &Path, paths: Vec<PathBuf>) -> anyhow::Result<Vec<String>> {
    let runtime = Runtime::load(root)?;
    runtime.paths.ensure_dirs()?;
    let preprocessor = runtime.preprocessor()?;

    let report = if paths.is_empty() {
        preprocessor
            .process_batch(&runtime.paths.inbox, &runtime.paths.quarantine)
            .await?
    } else {
        preprocessor
            .process_artifacts(paths, &runtime.paths.quarantine)
            .await
    };

    println!(
        "ingest: {} sanitized, {} quarantined, {} failed",
        report.succeeded.len(),
        report.quarantined.len(),
        report.failed.len()
    );
    Ok(report.succeeded)
}

async fn handle_plan(root: &Path, scan_ids: Vec<String>) -> anyhow::Result<()> {
    let runtime = Runtime::load(root)?;
    let generator = runtime.plan_generator()?;

    let report = if scan_ids.is_empty() {
        generator.generate_all(&runtime.paths.sanitized).await?
    } else {
        if let Some(bad) = scan_ids.iter().find(|id| !artifacts::is_valid_scan_id(id)) {
            anyhow::bail!("invalid scan id: {bad:?}");
        }
        let paths = scan_ids
            .iter()
            .map(|id| artifacts::sanitized_path(&runtime.paths.sanitized, id))
            .collect();
        generator.generate_files(paths).await
    };

    println!(
        "plan: {} generated, {} failed",
        report.generated.len(),
        report.failed.len()
    );
    Ok(())
}

async fn handle_run(root: &Path) -> anyhow::Result<()> {
    let sanitized = handle_ingest(root, Vec::new()).await?;
    if sanitized.is_empty() {
        info!("nothing new to plan");
        return Ok(());
    }
    handle_plan(root, sanitized).await
}

async fn handle_serve(root: &Path) -> anyhow::Result<()> {
    let runtime = Runtime::load(root)?;
    runtime.paths.ensure_dirs()?;
    let _logging_guard = logging::init_production(&runtime.paths.logs)?;

    let gateway = Arc::new(runtime.gateway()?);
    info!(
        plans = %runtime.paths.plans.display(),
        bind = %runtime.config.gateway.bind,
        "starting decryption gateway"
    );
    gateway::http::serve(runtime.config.gateway.bind, gateway).await
}

async fn handle_chat(
    root: &Path,
    scan_id: String,
    question: String,
    request_plan: bool,
) -> anyhow::Result<()> {
    let runtime = Runtime::load(root)?;
    let gateway = runtime.gateway()?;
    let token = runtime
        .credentials
        .get(&runtime.config.gateway.token_env)
        .map(str::to_owned);

    let response = gateway
        .chat(ChatRequest {
            scan_id,
            question,
            request_plan,
            token,
        })
        .await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
