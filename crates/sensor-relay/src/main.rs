// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor Relay CLI
//!
//! Relays newline-delimited JSON records from stdin to a sink, buffering
//! on disk whenever the sink is unreachable.
//!
//! # Usage
//!
//! ```bash
//! # Relay a capture feed to a TCP collector
//! capture-feed | sensor-relay --sink tcp://collector:9400
//!
//! # Buffer everything locally, deliver later
//! capture-feed | sensor-relay --offline --db field.db
//!
//! # Drain the buffer once the link is back (sync-only mode)
//! sensor-relay --db field.db --sink tcp://collector:9400 sync
//!
//! # Inspect the buffer
//! sensor-relay --db field.db stats
//! ```
//!
//! Input lines look like:
//!
//! ```text
//! {"kind":"device","captured_at":"2026-03-01T12:00:00Z","data":{"kismet.device.base.macaddr":"AA:BB:CC:00:11:22"}}
//! {"kind":"event","data":{"kismet.eventbus.type":"ALERT","text":"deauth flood"}}
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sensor_relay::{
    source, BufferStats, BufferStore, Config, ConsoleSink, IngressStatsSnapshot, MemorySink,
    RelayService, RetentionSweeper, Shutdown, Sink, SqliteBuffer, TcpSink,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
enum SinkTarget {
    Console,
    Memory,
    Tcp(String),
}

fn parse_sink(s: &str) -> Result<SinkTarget, String> {
    match s {
        "console" => Ok(SinkTarget::Console),
        "memory" => Ok(SinkTarget::Memory),
        other => match other.strip_prefix("tcp://") {
            Some(addr) if !addr.is_empty() => Ok(SinkTarget::Tcp(addr.to_string())),
            _ => Err(format!(
                "unknown sink '{}' (expected console, memory or tcp://host:port)",
                other
            )),
        },
    }
}

/// Store-and-forward relay for sensor records
#[derive(Parser, Debug)]
#[command(name = "sensor-relay")]
#[command(about = "Sensor Relay - store-and-forward delivery with a durable local buffer")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Buffer database path (SQLite file)
    #[arg(long)]
    db: Option<String>,

    /// Never contact the sink; buffer everything
    #[arg(long)]
    offline: bool,

    /// Sink: console, memory, or tcp://host:port
    #[arg(long, default_value = "console", value_parser = parse_sink)]
    sink: SinkTarget,

    /// Records per kind per reconciler pass
    #[arg(long)]
    batch_size: Option<usize>,

    /// Reconciler interval (seconds)
    #[arg(long)]
    sync_interval: Option<u64>,

    /// Keep synced records this many days
    #[arg(long)]
    retention_days: Option<u64>,

    /// Prefix for destination partitions
    #[arg(long)]
    index_prefix: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Relay stdin records until EOF or Ctrl+C (default)
    Run,

    /// Connect once, run one reconciliation pass, and exit
    Sync,

    /// Show buffer statistics
    Stats,

    /// Delete synced records older than the retention window
    Sweep,

    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "sensor-relay.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (RUST_LOG wins over --log-level)
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let command = args.command.clone().unwrap_or(Commands::Run);
    if let Commands::GenConfig { output } = &command {
        return cmd_gen_config(output);
    }

    let config = build_config(&args)?;

    match args.sink.clone() {
        SinkTarget::Console => dispatch(command, config, Arc::new(ConsoleSink::new())).await,
        SinkTarget::Memory => dispatch(command, config, Arc::new(MemorySink::new())).await,
        SinkTarget::Tcp(addr) => dispatch(command, config, Arc::new(TcpSink::new(addr))).await,
    }
}

fn build_config(args: &Args) -> Result<Config> {
    let mut config = match args.config {
        Some(ref path) => Config::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(ref db) = args.db {
        config.buffer_path = db.clone();
    }
    if args.offline {
        config.offline_mode = true;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(secs) = args.sync_interval {
        config.sync_interval_secs = secs;
    }
    if let Some(days) = args.retention_days {
        config.retention_days = days;
    }
    if let Some(ref prefix) = args.index_prefix {
        config.index_prefix = prefix.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn dispatch<K: Sink + 'static>(command: Commands, config: Config, sink: Arc<K>) -> Result<()> {
    let store = Arc::new(
        SqliteBuffer::new(&config.buffer_path)
            .with_context(|| format!("opening buffer {}", config.buffer_path))?,
    );

    match command {
        Commands::Run => cmd_run(config, store, sink).await,
        Commands::Sync => {
            if config.offline_mode {
                bail!("sync needs a sink; drop --offline");
            }
            let report = RelayService::new(config, Arc::clone(&store), sink)
                .sync_once()
                .await?;
            println!(
                "Synced {} records ({} devices, {} events, {} dropped)",
                report.marked(),
                report.device,
                report.event,
                report.dropped
            );
            print_buffer_stats(&store.stats()?);
            Ok(())
        }
        Commands::Stats => {
            print_buffer_stats(&store.stats()?);
            Ok(())
        }
        Commands::Sweep => {
            let shutdown = Shutdown::new();
            let sweeper = RetentionSweeper::new(&config, store, shutdown.signal());
            let deleted = sweeper.sweep_once()?;
            println!("Deleted {} synced records older than {} days", deleted, config.retention_days);
            Ok(())
        }
        Commands::GenConfig { output } => cmd_gen_config(&output),
    }
}

async fn cmd_run<K: Sink + 'static>(
    config: Config,
    store: Arc<SqliteBuffer>,
    sink: Arc<K>,
) -> Result<()> {
    let relay = RelayService::new(config, store, sink).start()?;
    let (tx, ingress) = relay.spawn_ingress();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut parse_errors = 0u64;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match source::parse_line(&line) {
                    Ok(record) => {
                        if tx.send(record).await.is_err() {
                            tracing::error!("Ingress task stopped unexpectedly");
                            break;
                        }
                    }
                    Err(e) => {
                        parse_errors += 1;
                        tracing::warn!("Skipping unparseable input line: {}", e);
                    }
                },
                None => {
                    tracing::info!("Input closed");
                    break;
                }
            },
            _ = &mut ctrl_c => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    // Let every queued record reach the router before stopping the workers
    drop(tx);
    if let Err(e) = ingress.await {
        tracing::error!("Ingress task failed: {}", e);
    }

    let ingress_stats = relay.ingress_stats();
    let buffer_stats = relay.stats()?;
    relay.shutdown().await;

    println!("\nFinal Statistics:");
    print_ingress_stats(&ingress_stats, parse_errors);
    print_buffer_stats(&buffer_stats);
    Ok(())
}

fn cmd_gen_config(output: &Path) -> Result<()> {
    let content = format!(
        r#"# Sensor Relay Configuration
# Generated by sensor-relay gen-config

{}
"#,
        Config::example_toml()?
    );

    std::fs::write(output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn print_ingress_stats(stats: &IngressStatsSnapshot, parse_errors: u64) {
    println!("--- Ingress ---");
    println!(
        "  {} received ({:.1} rec/s), {} delivered, {} buffered, {} lost, {} unparseable",
        stats.received,
        stats.records_per_second(),
        stats.delivered,
        stats.buffered,
        stats.storage_faults,
        parse_errors
    );
}

fn print_buffer_stats(stats: &BufferStats) {
    println!("--- Buffer ---");
    println!(
        "  Devices: {} unsynced / {} total",
        stats.device.unsynced, stats.device.total
    );
    println!(
        "  Events:  {} unsynced / {} total",
        stats.event.unsynced, stats.event.total
    );
}
