//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p arpg_server -- [--addr 127.0.0.1:40000] [--zone meadow]
//!                               [--templates data.json] [--config game.json]
//!
//! The server loads the zone, accepts clients and runs the physics, combat and
//! network flush clocks until the process is killed.

use std::env;

use anyhow::Context;
use arpg_server::GameServer;
use arpg_shared::{config::GameConfig, templates::TemplateStore};
use tokio::time::{Duration, Instant};
use tracing::info;

#[derive(Default)]
struct Args {
    addr: Option<String>,
    zone: Option<String>,
    templates: Option<String>,
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
            ("--zone", Some(v)) => out.zone = Some(v),
            ("--templates", Some(v)) => out.templates = Some(v),
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
    if let Some(zone) = args.zone {
        cfg.zone = zone;
    }
    let templates = match &args.templates {
        Some(path) => TemplateStore::load(path)?,
        None => TemplateStore::builtin(),
    };
    info!(
        addr = %cfg.server_addr,
        zone = %cfg.zone,
        physics_hz = cfg.physics_hz,
        combat_hz = cfg.combat_hz,
        net_hz = cfg.net_hz,
        "Starting server"
    );

    let frame = Duration::from_secs_f64(1.0 / f64::from(cfg.physics_hz.max(1)));
    let mut server = GameServer::new(cfg, templates)
        .await
        .context("create server")?;
    info!(local = %server.local_addr(), "Server listening");

    let mut last = Instant::now();
    let mut next = last;
    loop {
        let now = Instant::now();
        server.step((now - last).as_secs_f64());
        last = now;

        next += frame;
        tokio::time::sleep_until(next).await;
    }
}
