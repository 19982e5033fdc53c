//! Networked host.
//!
//! `GameServer` owns a [`Host`] driven by a TCP [`Peer`]. Each step drains the
//! peer's events through the handler table, then advances the simulation
//! clocks by the frame time.
//!
//! Determinism notes:
//! - Incoming calls are applied in arrival order before any tick of the step.
//! - The simulation never awaits the network; sends are queued on IO tasks.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use arpg_shared::{config::GameConfig, net::Peer, rpc::Dispatcher, templates::TemplateStore};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::host::Host;

/// Authoritative game server.
pub struct GameServer {
    host: Host<Peer>,
    dispatcher: Dispatcher<Host<Peer>>,
}

impl GameServer {
    /// Binds `cfg.server_addr` and loads the configured zone.
    pub async fn new(cfg: GameConfig, templates: TemplateStore) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let peer = Peer::host(addr).await?;
        let host = Host::new(peer, cfg, templates).context("load zone")?;
        Ok(Self {
            host,
            dispatcher: Host::build_dispatcher(),
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.host.endpoint().transport().local_addr()
    }

    pub fn host(&self) -> &Host<Peer> {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut Host<Peer> {
        &mut self.host
    }

    /// Handles every network event received since the last pump.
    pub fn pump(&mut self) -> usize {
        let events = self.host.endpoint_mut().transport_mut().poll();
        let n = events.len();
        for event in events {
            self.host.handle_event(&self.dispatcher, event);
        }
        if n > 0 {
            debug!(events = n, "Pumped network events");
        }
        n
    }

    /// One frame: network events, then every simulation tick due.
    pub fn step(&mut self, frame_dt: f64) {
        self.pump();
        self.host.step(frame_dt);
    }

    /// Runs `ticks` frames at the physics rate in real time.
    pub async fn run_for_ticks(&mut self, ticks: u32) {
        let dt = Duration::from_secs_f64(1.0 / f64::from(self.host.config().physics_hz.max(1)));
        let mut next = Instant::now();
        for _ in 0..ticks {
            next += dt;
            self.step(dt.as_secs_f64());
            tokio::time::sleep_until(next).await;
        }
    }

    /// Stops accepting and drops every connection.
    pub fn shutdown(&mut self) {
        self.host.endpoint_mut().transport_mut().shutdown();
        info!("Server shut down");
    }
}

/// Helper for tests: a server on an ephemeral localhost port.
pub async fn bind_ephemeral(mut cfg: GameConfig) -> anyhow::Result<(GameServer, GameConfig)> {
    cfg.server_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string();
    let server = GameServer::new(cfg.clone(), TemplateStore::builtin()).await?;
    cfg.server_addr = server.local_addr().to_string();
    Ok((server, cfg))
}
