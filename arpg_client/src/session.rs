//! Networked client.
//!
//! `GameClient` drives a [`Client`] over a TCP [`Peer`]: each step drains the
//! peer's events through the handler table, then runs the due physics ticks.

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use arpg_shared::{config::GameConfig, net::Peer, rpc::Dispatcher, templates::TemplateStore};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::client::{Client, ClientState};

pub struct GameClient {
    client: Client<Peer>,
    dispatcher: Dispatcher<Client<Peer>>,
}

impl GameClient {
    /// Connects to `cfg.server_addr`.
    pub async fn connect(cfg: GameConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(server = %addr, "Connecting to host");
        let peer = Peer::connect(addr).await?;
        let mut game = Self {
            client: Client::new(peer, cfg, TemplateStore::builtin()),
            dispatcher: Client::build_dispatcher(),
        };
        // Registers the host connection so calls can be sent right away.
        game.pump();
        Ok(game)
    }

    pub fn client(&self) -> &Client<Peer> {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut Client<Peer> {
        &mut self.client
    }

    pub fn is_connected(&self) -> bool {
        self.client.endpoint().transport().is_running()
    }

    /// Handles every network event received since the last pump.
    pub fn pump(&mut self) -> usize {
        let events = self.client.endpoint_mut().transport_mut().poll();
        let n = events.len();
        for event in events {
            self.client.handle_event(&self.dispatcher, event);
        }
        if n > 0 {
            debug!(events = n, "Pumped network events");
        }
        n
    }

    /// One frame: network events, then prediction and interpolation.
    pub fn step(&mut self, frame_dt: f64) {
        self.pump();
        self.client.step(frame_dt, std::time::Instant::now());
    }

    /// Steps at the physics rate until `done` holds or `timeout` passes.
    /// Returns whether `done` held.
    pub async fn run_until(
        &mut self,
        timeout: Duration,
        mut done: impl FnMut(&Client<Peer>) -> bool,
    ) -> bool {
        let hz = self.client.config().physics_hz.max(1);
        let dt = Duration::from_secs_f64(1.0 / f64::from(hz));
        let deadline = Instant::now() + timeout;
        let mut next = Instant::now();
        while Instant::now() < deadline {
            next += dt;
            self.step(dt.as_secs_f64());
            if done(&self.client) {
                return true;
            }
            if self.client.state() == ClientState::Disconnected {
                return false;
            }
            tokio::time::sleep_until(next).await;
        }
        false
    }

    /// Closes the connection to the host.
    pub fn disconnect(&mut self) {
        self.client.endpoint_mut().transport_mut().shutdown();
        info!("Disconnected");
    }
}
