use std::path::PathBuf;

use adventure_bot::{Adventure, Config, ConsoleRoom, Room};
use anyhow::Context;
use clap::Parser;
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// adventure-bot — play a text adventure from a chat room
#[derive(Parser, Debug)]
#[command(name = "adventure-bot", version, about = "Play a text adventure from a chat room")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "adventure.toml")]
    config: PathBuf,

    /// Room to play in on the console (defaults to the first configured room)
    #[arg(long)]
    room: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout belongs to the console room.
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let room_name = cli
        .room
        .or_else(|| config.rooms.first().map(|room| room.name.clone()))
        .unwrap_or_else(|| "console".to_string());
    info!(
        "playing {} as {} in &{room_name}",
        config.session.program, config.nick
    );

    let mut adventure = Adventure::new(config.session.clone(), config.settle);
    let mut room = ConsoleRoom::new(room_name, config.nick.clone(), tokio::io::stdout());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // One message at a time, so sessions are never touched concurrently.
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                let message = room.receive(&line);
                if let Err(e) = adventure.on_message(&mut room, &message).await {
                    error!("lost the room: {e}");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    adventure.on_vacated(room.name()).await;
    adventure.shutdown().await;
    Ok(())
}
