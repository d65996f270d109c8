//! Nurture: operator CLI for nurture flows.
//!
//! Validates and compiles builder drafts locally, publishes them to the flow
//! backend, and launches and follows executions.

mod draft;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use nurture_core::event_bus::TracingSink;
use nurture_core::AppConfig;
use nurture_execution::{ExecutionMonitor, ExecutionWatch, FlowPublisher, HttpFlowBackend};
use nurture_journey::{build_flow_configuration, validate_flow};

#[derive(Parser, Debug)]
#[command(name = "nurture")]
#[command(about = "Build, publish and monitor multi-stage nurture flows")]
#[command(version)]
struct Cli {
    /// Config file stem (reads `<stem>.toml` when present)
    #[arg(long, default_value = "nurture")]
    config: String,

    /// Flow backend base URL (overrides config)
    #[arg(long, env = "NURTURE__BACKEND__BASE_URL")]
    base_url: Option<String>,

    /// Bearer token for the flow backend (overrides config)
    #[arg(long, env = "NURTURE__BACKEND__API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Status poll interval in milliseconds (overrides config)
    #[arg(long, env = "NURTURE__MONITOR__STATUS_INTERVAL_MS")]
    status_interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a draft and print errors and warnings
    Validate { draft: PathBuf },
    /// Print the configuration that would be submitted for a draft
    Compile { draft: PathBuf },
    /// Validate and submit a draft
    Publish {
        draft: PathBuf,
        /// Replace an existing flow instead of creating one
        #[arg(long)]
        flow_id: Option<String>,
    },
    /// Start an execution of a published flow
    Launch {
        flow_id: String,
        /// Restrict the run to these recipients (repeatable)
        #[arg(long = "recipient")]
        recipients: Vec<String>,
        /// Keep polling until the execution finishes
        #[arg(long, default_value_t = false)]
        follow: bool,
    },
    /// Follow a running execution until it finishes
    Watch { flow_id: String, execution_id: String },
    /// Print one page of an execution's event log
    Events {
        flow_id: String,
        execution_id: String,
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    Cancel { flow_id: String, execution_id: String },
    Pause { flow_id: String, execution_id: String },
    Resume { flow_id: String, execution_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nurture=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(url) = cli.base_url {
        config.backend.base_url = url;
    }
    if let Some(token) = cli.api_token {
        config.backend.api_token = Some(token);
    }
    if let Some(ms) = cli.status_interval_ms {
        config.monitor.status_interval_ms = ms;
    }

    match cli.command {
        Command::Validate { draft } => {
            let state = draft::read_draft(&draft)?;
            let result = validate_flow(&state);
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_valid {
                anyhow::bail!("draft has {} error(s)", result.errors.len());
            }
        }
        Command::Compile { draft } => {
            let state = draft::read_draft(&draft)?;
            println!("{}", serde_json::to_string_pretty(&build_flow_configuration(&state))?);
        }
        Command::Publish { draft, flow_id } => {
            let state = draft::read_draft(&draft)?;
            let publisher = FlowPublisher::new(backend(&config)?)
                .with_event_sink(Arc::new(TracingSink));
            let outcome = publisher
                .publish(&draft::draft_key(&draft), &state, flow_id.as_deref())
                .await?;
            for warning in &outcome.warnings {
                warn!(warning = %warning, "Published with warning");
            }
            println!("{}", outcome.flow_id);
        }
        Command::Launch {
            flow_id,
            recipients,
            follow,
        } => {
            let monitor = monitor(&config)?;
            let recipients = (!recipients.is_empty()).then_some(recipients);
            let watch = monitor.start(&flow_id, recipients).await?;
            println!("{}", watch.execution_id());
            if follow {
                follow_execution(watch).await?;
            } else {
                watch.stop();
            }
        }
        Command::Watch {
            flow_id,
            execution_id,
        } => {
            let watch = monitor(&config)?.watch(&flow_id, &execution_id);
            follow_execution(watch).await?;
        }
        Command::Events {
            flow_id,
            execution_id,
            limit,
            offset,
        } => {
            let events = monitor(&config)?
                .load_events(&flow_id, &execution_id, limit, offset)
                .await?;
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        Command::Cancel {
            flow_id,
            execution_id,
        } => {
            let resp = monitor(&config)?.cancel(&flow_id, &execution_id).await?;
            println!("{}", resp.estado);
        }
        Command::Pause {
            flow_id,
            execution_id,
        } => {
            let resp = monitor(&config)?.pause(&flow_id, &execution_id).await?;
            println!("{}", resp.estado);
        }
        Command::Resume {
            flow_id,
            execution_id,
        } => {
            let resp = monitor(&config)?.resume(&flow_id, &execution_id).await?;
            println!("{}", resp.estado);
        }
    }

    Ok(())
}

fn backend(config: &AppConfig) -> anyhow::Result<Arc<HttpFlowBackend>> {
    info!(base_url = %config.backend.base_url, "Using flow backend");
    Ok(Arc::new(HttpFlowBackend::new(&config.backend)?))
}

fn monitor(config: &AppConfig) -> anyhow::Result<ExecutionMonitor<HttpFlowBackend>> {
    Ok(ExecutionMonitor::new(backend(config)?, config.monitor.clone())
        .with_event_sink(Arc::new(TracingSink)))
}

/// Logs progress on every update until the execution finishes or Ctrl-C.
async fn follow_execution(watch: ExecutionWatch) -> anyhow::Result<()> {
    let mut rx = watch.subscribe();
    while watch.is_enabled() {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = rx.borrow_and_update().clone();
                if let Some(state) = snapshot {
                    let batching = watch.batching_summary();
                    info!(
                        execution_id = %state.id,
                        estado = %state.estado,
                        sent = state.metrics.sent,
                        failed = state.metrics.failed,
                        pending = state.metrics.pending,
                        batches_pct = batching.batches.percentage,
                        "Execution progress"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, polling stopped");
                watch.stop();
                break;
            }
        }
    }

    if let Some(state) = watch.snapshot() {
        println!("{}", serde_json::to_string_pretty(&state)?);
        if let Some(message) = watch.error_message() {
            anyhow::bail!("execution failed: {}", message);
        }
    }
    Ok(())
}
