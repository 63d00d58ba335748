//! JS8Chess - UCI chess engine bridge over JS8Call radio.
//!
//! The engine reads UCI commands from stdin and writes responses to stdout,
//! so all logging goes to `~/.js8chess/js8chess.log` and stderr.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use js8_bridge::RadioLink;
use js8chess::config;
use js8chess::engine::{Engine, StdoutSink};
use protocol::WireColor;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "js8chess", about = "UCI chess engine bridge over JS8Call radio")]
struct Cli {
    /// Transmit a NEW game proposal as White (W) or Black (B) on startup.
    #[arg(long, value_name = "W|B", value_parser = parse_color)]
    propose: Option<WireColor>,

    /// Log level: trace, debug, info, warn or error.
    #[arg(long, default_value = "info", value_name = "LEVEL")]
    loglevel: String,
}

fn parse_color(raw: &str) -> Result<WireColor, String> {
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => {
            WireColor::from_char(c).ok_or_else(|| format!("expected W or B, got {raw:?}"))
        }
        _ => Err(format!("expected W or B, got {raw:?}")),
    }
}

/// Logs to stderr and to a file in the data directory; RUST_LOG overrides
/// the CLI level when set.
fn init_logging(level: &str, dir: &std::path::Path) -> anyhow::Result<()> {
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("js8chess.log"))
        .with_context(|| format!("could not open log file in {}", dir.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let dir = config::data_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("could not create {}", dir.display()))?;
    init_logging(&cli.loglevel, &dir)?;
    tracing::info!("JS8Chess starting");

    let cfg = config::load(&dir)?;
    tracing::info!(
        local = %cfg.local_callsign,
        remote = %cfg.remote_callsign,
        host = %cfg.js8_host,
        port = cfg.js8_port,
        "config loaded"
    );

    let link = Arc::new(RadioLink::new(&cfg.js8_host, cfg.js8_port));
    let engine = Arc::new(Engine::new(cfg, dir, link.clone(), Arc::new(StdoutSink)));

    let mut inbound = link.start();
    let dispatcher = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                engine
                    .handle_radio_text(&message.from, &message.to, &message.text)
                    .await;
            }
        })
    };

    if let Some(color) = cli.propose {
        engine.send_new_proposal(color).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !engine.handle_command(&line) {
            break;
        }
    }

    link.stop().await;
    dispatcher.abort();
    tracing::info!("JS8Chess exiting");
    Ok(())
}
