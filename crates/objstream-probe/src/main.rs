//! objstream probe - exercise a self-healing object stream against a live
//! JSON-RPC service.
//!
//! Connects, performs a number of calls, prints each response as one JSON
//! line on stdout and closes the stream. Logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use objstream::{ObjectStream, StreamConfig};
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "objstream-probe")]
#[command(about = "Send JSON-RPC calls over a self-healing object stream")]
struct Args {
    /// Host to connect to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to connect to
    #[arg(short, long, default_value = "8070")]
    port: u16,

    /// Method to call
    #[arg(short, long, default_value = "wallet_status")]
    method: String,

    /// Call parameters as a JSON document
    #[arg(long)]
    params: Option<String>,

    /// Heartbeat period in seconds (0 disables the heartbeat)
    #[arg(long, default_value = "10")]
    heartbeat_secs: u64,

    /// Number of calls to make
    #[arg(short, long, default_value = "1")]
    count: u32,

    /// Pause between calls in milliseconds
    #[arg(long, default_value = "0")]
    pause_ms: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let params = match &args.params {
        Some(raw) => Some(
            serde_json::from_str::<serde_json::Value>(raw).context("--params is not valid JSON")?,
        ),
        None => None,
    };

    let heartbeat = (args.heartbeat_secs > 0).then(|| Duration::from_secs(args.heartbeat_secs));
    let config = StreamConfig::new(&args.host, args.port).with_heartbeat_interval(heartbeat);

    info!("Connecting to {}", config.address());
    let stream = ObjectStream::connect(config)
        .await
        .with_context(|| format!("failed to connect to {}:{}", args.host, args.port))?;
    info!("Connected to {}", stream.peer_addr());

    let outcome = tokio::select! {
        result = run_calls(&stream, &args, params) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, closing stream");
            Ok(())
        }
    };

    let stats = stream.stats();
    info!(
        "Generation {}, {} reconnects, {} heartbeats sent",
        stats.generation, stats.reconnects, stats.heartbeats_sent
    );
    stream.close().await?;
    outcome
}

async fn run_calls(
    stream: &ObjectStream,
    args: &Args,
    params: Option<serde_json::Value>,
) -> Result<()> {
    for n in 0..args.count {
        if n > 0 && args.pause_ms > 0 {
            tokio::time::sleep(Duration::from_millis(args.pause_ms)).await;
        }

        match stream.call(&args.method, params.clone()).await {
            Ok(response) => println!("{}", serde_json::to_string(&response)?),
            Err(e) if e.is_connection_level() => {
                // The stream reconnects in the background; later calls may succeed.
                warn!("Call {} failed: {}", n + 1, e);
            }
            Err(e) => return Err(e).context(format!("call {} to {} failed", n + 1, args.method)),
        }
    }
    Ok(())
}
