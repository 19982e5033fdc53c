//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p arpg_client -- [--addr 127.0.0.1:40000] [--name Ysolde] [--config game.json]
//!
//! The client connects, enters the world with the configured login, and keeps
//! its view of the world in sync until the host goes away. Device input is not
//! wired up, so the player stands still and host prints go to stdout.

use std::env;

use anyhow::Context;
use arpg_client::{client::ClientState, GameClient};
use arpg_shared::config::GameConfig;
use tokio::time::{Duration, Instant};
use tracing::info;

#[derive(Default)]
struct Args {
    addr: Option<String>,
    name: Option<String>,
    config: Option<String>,
}

fn parse_args() -> Args {
    let mut out = Args::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        match (args[i].as_str(), value) {
            ("--addr", Some(v)) => out.addr = Some(v),
            ("--name", Some(v)) => out.name = Some(v),
            ("--config", Some(v)) => out.config = Some(v),
            _ => {
                i += 1;
                continue;
            }
        }
        i += 2;
    }
    out
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    let mut cfg = match &args.config {
        Some(path) => GameConfig::load(path)?,
        None => GameConfig::default(),
    };
    if let Some(addr) = args.addr {
        cfg.server_addr = addr;
    }
    if let Some(name) = args.name {
        cfg.player_name = name;
    }
    info!(server = %cfg.server_addr, name = %cfg.player_name, "Starting client");

    let frame = Duration::from_secs_f64(1.0 / f64::from(cfg.physics_hz.max(1)));
    let mut game = GameClient::connect(cfg).await.context("connect")?;
    game.client_mut().enter_world();

    let mut last = Instant::now();
    let mut next = last;
    let mut reported = 0u64;
    loop {
        let now = Instant::now();
        game.step((now - last).as_secs_f64());
        last = now;

        let client = game.client();
        if client.state() == ClientState::Disconnected {
            info!("Host closed the connection");
            break;
        }
        let world = client.world();
        let fresh = (world.messages_received - reported).min(world.messages.len() as u64);
        for message in world.messages.iter().skip(world.messages.len() - fresh as usize) {
            println!("{message}");
        }
        reported = world.messages_received;

        next += frame;
        tokio::time::sleep_until(next).await;
    }
    Ok(())
}
