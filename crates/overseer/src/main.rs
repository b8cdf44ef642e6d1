//! Run one supervised session against a target scope.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable. Set
//! `OVERSEER_BASE_URL` to point at another chat-completions endpoint.
//!
//! # Examples
//!
//! ```sh
//! # Normal mode: findings go through triage
//! overseer --session-dir sessions/acme --scope-file scope.md \
//!   --directive "Find authentication flaws in the customer portal"
//!
//! # Direct mode, stop after the first finding
//! overseer --session-dir sessions/acme --scope-file scope.md --direct --finish-on-submit
//! ```

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use overseer::config::{OverseerConfig, SubmissionMode};
use overseer::delivery::{DeliverySink, FanOutSink, FileDeliverySink, WebhookDeliverySink};
use overseer::instance::ProcessRuntime;
use overseer::orchestrator::Orchestrator;
use overseer::{CompletionService, DEFAULT_MODEL, DEFAULT_SUMMARY_MODEL, OpenRouterClient};

const DEFAULT_DIRECTIVE: &str =
    "Assess the targets in scope and report every confirmed, reproducible finding.";

/// Supervise a swarm of autonomous workers against a target scope.
#[derive(Parser)]
#[command(name = "overseer")]
struct Cli {
    /// Directory receiving every artifact of this session.
    #[arg(long, default_value = "sessions/default")]
    session_dir: PathBuf,

    /// File describing the engagement scope.
    #[arg(long)]
    scope_file: Option<PathBuf>,

    /// Objective handed to the driving model.
    #[arg(long, default_value = DEFAULT_DIRECTIVE)]
    directive: String,

    /// Model driving the orchestrator and triage.
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Model used to summarize compacted context.
    #[arg(long, default_value = DEFAULT_SUMMARY_MODEL)]
    summary_model: String,

    /// Model picking each worker's specialist profile (off when unset).
    #[arg(long)]
    router_model: Option<String>,

    /// Worker executable.
    #[arg(long, default_value = "./target/release/codex")]
    worker_binary: PathBuf,

    /// Maximum orchestrator rounds.
    #[arg(long, default_value_t = 500)]
    max_rounds: usize,

    /// Deliver findings directly, skipping triage.
    #[arg(long)]
    direct: bool,

    /// End the session after the first accepted finding.
    #[arg(long)]
    finish_on_submit: bool,

    /// Webhook receiving delivered findings.
    #[arg(long)]
    webhook_url: Option<String>,
}

fn init_tracing(config: &OverseerConfig) -> Result<(), String> {
    std::fs::create_dir_all(config.session_dir())
        .map_err(|e| format!("failed to create {}: {e}", config.session_dir().display()))?;
    let path = config.log_file();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("failed to open {}: {e}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

fn build_sink(config: &OverseerConfig) -> Result<Arc<dyn DeliverySink>, String> {
    let mut sink = FanOutSink::new().with(Arc::new(FileDeliverySink::in_session(
        config.session_dir(),
    )));
    if let Some(ref url) = config.webhook_url {
        sink = sink.with(Arc::new(WebhookDeliverySink::new(url)?));
    }
    Ok(Arc::new(sink))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let scope = match cli.scope_file {
        Some(ref path) => match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("Error: failed to read {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => String::new(),
    };

    let config = OverseerConfig::new(cli.session_dir)
        .with_model(cli.model)
        .with_summary_model(cli.summary_model)
        .with_router_model(cli.router_model)
        .with_worker_binary(cli.worker_binary)
        .with_max_rounds(cli.max_rounds)
        .with_mode(if cli.direct {
            SubmissionMode::Direct
        } else {
            SubmissionMode::Triage
        })
        .with_finish_on_submit(cli.finish_on_submit)
        .with_scope(scope)
        .with_webhook_url(cli.webhook_url);

    if let Err(e) = init_tracing(&config) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    let api_key = match std::env::var("OPENROUTER_KEY") {
        Ok(key) => key,
        Err(_) => {
            eprintln!("Error: OPENROUTER_KEY environment variable is not set");
            std::process::exit(1);
        }
    };
    let client = match std::env::var("OVERSEER_BASE_URL") {
        Ok(url) => OpenRouterClient::with_url(api_key, url),
        Err(_) => OpenRouterClient::new(api_key),
    };
    let client: Arc<dyn CompletionService> = match client {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Error: failed to create API client: {e}");
            std::process::exit(1);
        }
    };

    let sink = match build_sink(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let runtime = Arc::new(ProcessRuntime::new(config.worker_binary.clone()));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping session");
            ctrl_c.cancel();
        }
    });

    info!(
        "Starting session in {} ({:?} mode)",
        config.session_dir().display(),
        config.mode
    );
    let mut orchestrator = Orchestrator::new(config, &cli.directive, client, runtime, sink)
        .with_cancellation(cancel);
    let report = orchestrator.run().await;

    info!(
        "Session ended after {} round(s): {:?}, submission made: {}",
        report.rounds, report.stop, report.submission_made
    );
    for record in &report.triage {
        info!(
            "Triage {} [{}] {}",
            record.id,
            record.result.as_deref().unwrap_or("unfinished"),
            record.title
        );
    }
    if report.stop.is_error() {
        std::process::exit(1);
    }
}
