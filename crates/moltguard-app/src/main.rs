//! MoltGuard command-line entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use moltguard_app::{AppConfig, GuardEngine};
use moltguard_core::{CredentialResolver, DetectionClient};
use moltguard_gateway::{GatewayManager, GatewayState};
use moltguard_storage::{Database, FeedbackType, NewFeedback};

#[derive(Parser, Debug)]
#[command(name = "moltguard", version, about = "Prompt-injection guard for autonomous agents")]
struct Cli {
    /// Config file path (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for rolling log files; stderr when unset.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the guard: supervise the gateway until interrupted.
    Run,
    /// Show guard status and statistics.
    Status,
    /// Show recent prompt-injection detections.
    Report {
        /// Number of detections to show.
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Report a false positive or a missed detection.
    Feedback {
        #[command(subcommand)]
        command: FeedbackCommand,
    },
    /// Gateway operations.
    Gateway {
        #[command(subcommand)]
        command: GatewayCommand,
    },
}

#[derive(Subcommand, Debug)]
enum FeedbackCommand {
    /// Mark detection #id as a false positive.
    Fp {
        /// Analysis id from `moltguard report`.
        id: i64,
        /// Why the detection was wrong.
        reason: Vec<String>,
    },
    /// Report an injection the guard missed.
    Missed {
        /// What was missed.
        reason: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum GatewayCommand {
    /// Probe the gateway and print its status.
    Status,
    /// Run the gateway in the foreground until interrupted.
    Start,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref());

    let config = AppConfig::load(cli.config.as_deref())?;

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    runtime.block_on(async move {
        match cli.command {
            Command::Run => run(config).await,
            Command::Status => status(config),
            Command::Report { limit } => report(config, limit),
            Command::Feedback { command } => feedback(config, command),
            Command::Gateway { command } => gateway(config, command).await,
        }
    })
}

fn init_tracing(log_dir: Option<&std::path::Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "moltguard.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

fn open_database(config: &AppConfig) -> anyhow::Result<Database> {
    Ok(match &config.db_path {
        Some(path) => Database::with_path(path)?,
        None => Database::new()?,
    })
}

fn build_detector(config: &AppConfig) -> anyhow::Result<Arc<DetectionClient>> {
    let credentials = match &config.credentials_path {
        Some(path) => Arc::new(CredentialResolver::with_path(&config.guard, path)),
        None => Arc::new(CredentialResolver::new(&config.guard)?),
    };
    Ok(Arc::new(DetectionClient::with_credentials(
        config.guard.clone(),
        credentials,
    )))
}

/// Runs the long-lived guard process: the gateway (when enabled) plus the
/// engine surface the host adapter drives.
async fn run(config: AppConfig) -> anyhow::Result<()> {
    if !config.enabled {
        info!("MoltGuard is disabled via config");
        return Ok(());
    }

    let db = Arc::new(open_database(&config)?);
    let detector = build_detector(&config)?;
    let _engine = GuardEngine::new(detector.clone(), db.clone(), config.block_on_risk);

    info!(
        "MoltGuard initialized (block: {}, timeout: {}ms)",
        config.block_on_risk, config.guard.timeout_ms
    );

    let manager = if config.gateway_enabled {
        let state = GatewayState::new(config.gateway.clone(), detector, db);
        let manager = GatewayManager::new(state);
        match manager.start().await {
            Ok(status) => {
                info!(
                    "Gateway ready: configure the model provider to use http://127.0.0.1:{}",
                    status.port
                );
            }
            Err(e) => {
                // The agent keeps running without gateway protection.
                warn!("Failed to start gateway: {}", e);
            }
        }
        Some(manager)
    } else {
        None
    };

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutting down");

    if let Some(manager) = manager {
        manager.stop().await?;
    }
    Ok(())
}

fn status(config: AppConfig) -> anyhow::Result<()> {
    let db = open_database(&config)?;
    let stats = db.get_stats()?;
    let feedback = db.get_feedback_stats()?;

    println!("MoltGuard status");
    println!();
    println!("  Enabled:        {}", config.enabled);
    println!("  Block on risk:  {}", config.block_on_risk);
    println!("  Auto-register:  {}", config.guard.auto_register);
    println!("  API base URL:   {}", config.guard.api_base_url);
    println!();
    println!("Statistics");
    println!("  Total analyses: {}", stats.total_analyses);
    println!("  Total blocked:  {}", stats.total_blocked);
    println!("  Blocked (24h):  {}", stats.blocked_last_24h);
    println!("  Avg duration:   {}ms", stats.avg_duration_ms);
    println!();
    println!("User feedback");
    println!("  False positives:   {}", feedback.false_positives);
    println!("  Missed detections: {}", feedback.missed_detections);

    let recent = db.get_recent_logs(5)?;
    if !recent.is_empty() {
        println!();
        println!("Recent analyses");
        for entry in recent {
            let status = if entry.blocked {
                "BLOCKED"
            } else if entry.verdict.is_injection {
                "DETECTED"
            } else {
                "SAFE"
            };
            println!(
                "  #{} {} {} ({} chars) - {}",
                entry.id,
                entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                entry.target_type.as_str(),
                entry.content_length,
                status
            );
        }
    }

    Ok(())
}

fn report(config: AppConfig, limit: i64) -> anyhow::Result<()> {
    let db = open_database(&config)?;
    let detections = db.get_recent_detections(limit)?;

    if detections.is_empty() {
        println!("No prompt injection detections found.");
        return Ok(());
    }

    println!("Recent prompt injection detections");
    println!();
    for d in detections {
        let status = if d.blocked { "BLOCKED" } else { "DETECTED" };
        println!("#{} - {}", d.id, d.created_at.format("%Y-%m-%d %H:%M:%S"));
        println!("  Status: {}", status);
        println!(
            "  Type:   {} ({} chars)",
            d.target_type.as_str(),
            d.content_length
        );
        println!("  Reason: {}", d.verdict.reason);
        if let Some(finding) = d.verdict.findings.first() {
            println!("  Suspicious: \"{}\"", finding.suspicious_content);
        }
        println!();
    }
    println!("Use `moltguard feedback fp <id> <reason>` to report a false positive");
    println!("Use `moltguard feedback missed <reason>` to report a missed detection");

    Ok(())
}

fn feedback(config: AppConfig, command: FeedbackCommand) -> anyhow::Result<()> {
    let db = open_database(&config)?;

    match command {
        FeedbackCommand::Fp { id, reason } => {
            db.log_feedback(NewFeedback {
                analysis_id: Some(id),
                feedback_type: FeedbackType::FalsePositive,
                reason: join_reason(reason),
            })?;
            println!("Recorded false positive report for detection #{}", id);
        }
        FeedbackCommand::Missed { reason } => {
            let reason = join_reason(reason);
            db.log_feedback(NewFeedback {
                analysis_id: None,
                feedback_type: FeedbackType::MissedDetection,
                reason: reason.clone(),
            })?;
            println!("Recorded missed detection report: \"{}\"", reason);
        }
    }

    Ok(())
}

fn join_reason(words: Vec<String>) -> String {
    if words.is_empty() {
        "No reason provided".to_string()
    } else {
        words.join(" ")
    }
}

async fn gateway(config: AppConfig, command: GatewayCommand) -> anyhow::Result<()> {
    match command {
        GatewayCommand::Status => {
            let port = config.gateway.port;
            let url = format!("http://127.0.0.1:{}/healthz", port);
            let reachable = matches!(
                reqwest::Client::new()
                    .get(&url)
                    .timeout(std::time::Duration::from_millis(500))
                    .send()
                    .await,
                Ok(response) if response.status().is_success()
            );

            println!("MoltGuard gateway status");
            println!();
            println!("  Port:      {}", port);
            println!("  Reachable: {}", if reachable { "yes" } else { "no" });
            println!("  Endpoint:  http://127.0.0.1:{}", port);
            if reachable {
                println!();
                println!("Point the model provider's base URL at the endpoint above.");
            }
            Ok(())
        }
        GatewayCommand::Start => {
            let db = Arc::new(open_database(&config)?);
            let detector = build_detector(&config)?;
            let state = GatewayState::new(config.gateway.clone(), detector, db);
            let manager = GatewayManager::new(state);

            let status = manager.start().await?;
            info!("Gateway ready on http://127.0.0.1:{}", status.port);

            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            manager.stop().await?;
            Ok(())
        }
    }
}
