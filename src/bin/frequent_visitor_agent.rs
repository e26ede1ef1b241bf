//! Frequent Visitor Identification Agent
//!
//! Consumes user-activity events from JSONL shards, scores visit frequency
//! per identity and publishes `userTag` events for frequent visitors.
//!
//! Usage:
//!   cargo run --release --bin frequent_visitor_agent -- --shard streams/shard-0.jsonl
//!   cargo run --release --bin frequent_visitor_agent -- --name
//!
//! See `AgentConfig::from_env` for the environment variables.

use clap::Parser;
use dotenv::dotenv;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use visitflow::config::{AgentConfig, AGENT_NAME};
use visitflow::pipeline::{system_clock, EventPublisher};
use visitflow::substrate::{JsonlEventPublisher, SqliteCheckpointStore, Worker};

#[derive(Parser, Debug)]
#[command(name = "frequent_visitor_agent")]
struct Cli {
    /// Print the agent name and exit
    #[arg(long)]
    name: bool,

    /// Shard file to consume (repeatable, overrides SHARD_PATHS)
    #[arg(long = "shard")]
    shards: Vec<PathBuf>,

    /// Keep tailing shards instead of stopping at end of file
    #[arg(long)]
    follow: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    if cli.name {
        println!("{}", AGENT_NAME);
        return Ok(());
    }

    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let mut config = AgentConfig::from_env()?;
    if !cli.shards.is_empty() {
        config.shard_paths = cli.shards;
    }
    config.validate()?;

    info!("🚀 {} starting", config.agent_name);
    info!("   ├─ Stream: {}", config.stream_name);
    info!("   ├─ Worker: {}", config.worker_id);
    info!("   ├─ Shards: {}", config.shard_paths.len());
    info!("   ├─ Checkpoints: {}", config.checkpoint_db_path.display());
    info!("   ├─ Tag output: {}", config.tag_output_path.display());
    info!(
        "   └─ Window: {} x {} (threshold {})",
        config.window.window,
        config.window.unit.as_str(),
        config.window.threshold
    );

    let checkpoints = Arc::new(SqliteCheckpointStore::open(&config.checkpoint_db_path)?);
    let publisher: Arc<dyn EventPublisher> = Arc::new(JsonlEventPublisher::new(
        &config.tag_output_path,
        config.stream_name.clone(),
    )?);

    let worker = Worker::new(config, checkpoints, publisher, system_clock()).follow(cli.follow);

    tokio::select! {
        result = worker.run() => {
            let reports = result?;
            for report in &reports {
                info!(
                    "📊 Shard {} ended ({:?}) at sequence {}",
                    report.shard_id, report.reason, report.position
                );
            }
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
                Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
            }
        }
    }

    info!("✅ Agent stopped");
    Ok(())
}
