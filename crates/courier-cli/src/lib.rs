//! # Courier CLI
//!
//! Command-line interface for the courier message bus.
//!
//! This module provides CLI commands for:
//! - Validating and showing the resolved bus settings
//! - Running a send/receive throughput bench against the in-memory transport

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use courier_core::courier_transport::InMemoryTransport;
use courier_core::{
    BusBuilder, BusError, BusSettings, ConfigError, HandlerError, MessageHandler, StrategyStats,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

// ============================================================================
// CLI Structure
// ============================================================================

/// Courier CLI - client-side dispatch engine for managed message queues
#[derive(Parser)]
#[command(name = "courier")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Queue and topic dispatch engine")]
#[command(
    long_about = "Courier sends, batches and receives messages on named queues and topic subscriptions"
)]
pub struct Cli {
    /// Settings file path
    #[arg(short, long, env = "COURIER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level, used when RUST_LOG is not set
    #[arg(short, long, default_value = "warn")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Validate settings
    Config {
        /// Show resolved settings
        #[arg(short, long)]
        show: bool,

        /// Output format for settings
        #[arg(short = 'f', long, default_value = "toml")]
        format: ConfigFormat,
    },

    /// Send messages through a strategy and wait for them to be received
    Bench {
        /// Send strategy (onebyone, bufferized or mock)
        #[arg(short, long)]
        strategy: Option<String>,

        /// Number of messages to send
        #[arg(short = 'n', long, default_value = "451")]
        count: u64,

        /// Queue to send to
        #[arg(short, long, default_value = "bench")]
        queue: String,

        /// Batch capacity of the bufferized strategy
        #[arg(long)]
        capacity: Option<usize>,

        /// Seconds to wait for all messages to be received
        #[arg(short, long, default_value = "30")]
        timeout: u64,

        /// Output format of the report
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format options
#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

/// Configuration format options
#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    /// TOML format
    Toml,
    /// JSON format
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output error: {0}")]
    Output(#[from] anyhow::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Bus(e) if e.is_configuration() => 1,
            Self::Bus(_) => 2,
            Self::CommandFailed { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
            Self::Output(_) => 6,
        }
    }
}

// ============================================================================
// Main CLI Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    run(cli).await
}

/// Execute a parsed command line
pub async fn run(cli: Cli) -> Result<(), CliError> {
    initialize_logging(&cli)?;

    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Config { show, format } => execute_config_command(&settings, show, format),
        Commands::Bench {
            strategy,
            count,
            queue,
            capacity,
            timeout,
            format,
        } => {
            let options = BenchOptions {
                strategy,
                count,
                queue,
                capacity,
                timeout: Duration::from_secs(timeout),
            };
            let report = execute_bench_command(settings, options).await?;
            println!("{}", render_report(&report, &format)?);
            if report.received < report.sent {
                return Err(CliError::CommandFailed {
                    message: format!(
                        "only {} of {} messages were received",
                        report.received, report.sent
                    ),
                });
            }
            Ok(())
        }
    }
}

/// Initialize logging based on CLI arguments.
///
/// Logs go to stderr so command output on stdout stays machine readable.
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => tracing_subscriber::EnvFilter::try_new(&cli.log_level).map_err(|e| {
            CliError::InvalidArgument {
                arg: "log-level".to_string(),
                message: e.to_string(),
            }
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::CommandFailed {
        message: format!("failed to initialize logging: {}", e),
    })
}

/// Load settings from the optional file, `config/courier.*` and the environment
pub fn load_settings(path: Option<&Path>) -> Result<BusSettings, CliError> {
    if let Some(path) = path {
        if !path.exists() {
            return Err(CliError::InvalidArgument {
                arg: "config".to_string(),
                message: format!("file not found: {}", path.display()),
            });
        }
    }
    Ok(BusSettings::load(path)?)
}

// ============================================================================
// Config Command
// ============================================================================

fn execute_config_command(
    settings: &BusSettings,
    show: bool,
    format: ConfigFormat,
) -> Result<(), CliError> {
    info!(show = show, format = ?format, "Validating settings");

    if show {
        println!("{}", render_settings(settings, &format)?);
    } else {
        println!(
            "Settings are valid (default strategy: {})",
            settings.default_strategy_name()
        );
    }
    Ok(())
}

/// Serialize settings in the requested format
pub fn render_settings(settings: &BusSettings, format: &ConfigFormat) -> anyhow::Result<String> {
    match format {
        ConfigFormat::Toml => {
            toml::to_string_pretty(settings).context("failed to serialize settings as TOML")
        }
        ConfigFormat::Json => {
            serde_json::to_string_pretty(settings).context("failed to serialize settings as JSON")
        }
    }
}

// ============================================================================
// Bench Command
// ============================================================================

/// Message sent by the bench
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchMessage {
    pub id: Uuid,
    pub sequence: u64,
    pub sent_at: DateTime<Utc>,
}

/// Counts received bench messages and their end-to-end latency
#[derive(Clone, Default)]
pub struct BenchCounter {
    received: Arc<AtomicU64>,
    latency_ms_total: Arc<AtomicU64>,
}

impl BenchCounter {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }

    /// Mean latency over all received messages
    pub fn mean_latency_ms(&self) -> f64 {
        let received = self.received();
        if received == 0 {
            return 0.0;
        }
        self.latency_ms_total.load(Ordering::SeqCst) as f64 / received as f64
    }
}

#[async_trait]
impl MessageHandler for BenchCounter {
    type Message = BenchMessage;

    async fn process_message(
        &self,
        message: BenchMessage,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let latency = (Utc::now() - message.sent_at).num_milliseconds().max(0) as u64;
        self.latency_ms_total.fetch_add(latency, Ordering::SeqCst);
        self.received.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Parameters of one bench run
#[derive(Debug, Clone)]
pub struct BenchOptions {
    pub strategy: Option<String>,
    pub count: u64,
    pub queue: String,
    pub capacity: Option<usize>,
    pub timeout: Duration,
}

/// Wire calls made by the transport during a bench
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WireCalls {
    pub send_calls: u64,
    pub batch_calls: u64,
}

/// Result of a bench run
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub strategy: String,
    pub sent: u64,
    pub received: u64,
    pub elapsed_ms: u64,
    pub messages_per_second: f64,
    pub mean_latency_ms: f64,
    pub strategy_stats: StrategyStats,
    pub wire: WireCalls,
}

/// Send `count` messages through the chosen strategy and wait until a
/// reader on the same queue has received them or the timeout passed
pub async fn execute_bench_command(
    mut settings: BusSettings,
    options: BenchOptions,
) -> Result<BenchReport, CliError> {
    if options.count == 0 {
        return Err(CliError::InvalidArgument {
            arg: "count".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    if let Some(capacity) = options.capacity {
        settings.batch_sending_buffer_size = capacity;
    }
    if let Some(strategy) = &options.strategy {
        settings.send_strategy_name = strategy.clone();
    }

    let transport = InMemoryTransport::default();
    let counter = BenchCounter::default();
    let bus = BusBuilder::new(settings)
        .register_queue_reader(&options.queue, counter.clone())
        .build_in_memory(&transport)?;
    let strategy = bus.configuration().default_strategy();

    bus.start().await;
    info!(strategy = %strategy, count = options.count, queue = %options.queue, "Starting bench");

    let started = Instant::now();
    for sequence in 0..options.count {
        let message = BenchMessage {
            id: Uuid::new_v4(),
            sequence,
            sent_at: Utc::now(),
        };
        let outcome = bus.send_to_queue(&options.queue, &message, None).await?;
        debug!(sequence = sequence, outcome = ?outcome, "Bench message sent");
    }
    bus.flush().await;

    let deadline = started + options.timeout;
    while counter.received() < options.count && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let elapsed = started.elapsed();

    if counter.received() < options.count {
        warn!(
            received = counter.received(),
            expected = options.count,
            "Bench timed out before all messages were received"
        );
    }

    let strategy_stats = bus.strategy_stats(&strategy).unwrap_or_default();
    let stats = transport.stats();
    bus.shutdown().await;

    let received = counter.received();
    let seconds = elapsed.as_secs_f64();
    Ok(BenchReport {
        strategy,
        sent: options.count,
        received,
        elapsed_ms: elapsed.as_millis() as u64,
        messages_per_second: if seconds > 0.0 {
            received as f64 / seconds
        } else {
            0.0
        },
        mean_latency_ms: counter.mean_latency_ms(),
        strategy_stats,
        wire: WireCalls {
            send_calls: stats.send_calls,
            batch_calls: stats.batch_calls,
        },
    })
}

/// Render a bench report in the requested format
pub fn render_report(report: &BenchReport, format: &OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(report).context("failed to serialize bench report")
        }
        OutputFormat::Text => Ok(format!(
            "strategy:        {}\n\
             sent:            {}\n\
             received:        {}\n\
             elapsed:         {} ms\n\
             throughput:      {:.1} msg/s\n\
             mean latency:    {:.1} ms\n\
             strategy stats:  added={} processed={} sent={}\n\
             wire calls:      send={} batch={}",
            report.strategy,
            report.sent,
            report.received,
            report.elapsed_ms,
            report.messages_per_second,
            report.mean_latency_ms,
            report.strategy_stats.added,
            report.strategy_stats.processed,
            report.strategy_stats.sent,
            report.wire.send_calls,
            report.wire.batch_calls,
        )),
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
