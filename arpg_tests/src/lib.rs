//! Helpers for socket-level tests.
//!
//! A `Cluster` owns one server and any number of clients on loopback TCP and
//! steps all of them on the test task, one physics frame at a time.

use std::time::Duration;

use arpg_client::GameClient;
use arpg_server::{server::bind_ephemeral, GameServer};
use arpg_shared::config::GameConfig;
use tokio::time::Instant;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

pub struct Cluster {
    pub server: GameServer,
    pub clients: Vec<GameClient>,
    cfg: GameConfig,
}

impl Cluster {
    /// A server on an ephemeral port with a seeded combat RNG.
    pub async fn start() -> anyhow::Result<Self> {
        let cfg = GameConfig {
            rng_seed: Some(11),
            ..Default::default()
        };
        let (server, cfg) = bind_ephemeral(cfg).await?;
        Ok(Self {
            server,
            clients: Vec::new(),
            cfg,
        })
    }

    /// Connects a client named `name` and asks to enter the world.
    pub async fn join(&mut self, name: &str) -> anyhow::Result<usize> {
        let cfg = GameConfig {
            player_name: name.to_string(),
            ..self.cfg.clone()
        };
        let mut client = GameClient::connect(cfg).await?;
        client.client_mut().enter_world();
        self.clients.push(client);
        Ok(self.clients.len() - 1)
    }

    fn frame(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.cfg.physics_hz.max(1)))
    }

    /// Steps everything by one physics frame.
    pub async fn tick(&mut self) {
        let dt = self.frame();
        self.server.step(dt.as_secs_f64());
        for client in &mut self.clients {
            client.step(dt.as_secs_f64());
        }
        tokio::time::sleep(dt).await;
    }

    /// Ticks until `done` holds or `timeout` passes. Returns whether it held.
    pub async fn run_until(
        &mut self,
        timeout: Duration,
        mut done: impl FnMut(&Cluster) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            self.tick().await;
            if done(self) {
                return true;
            }
        }
        false
    }

    pub async fn run_for(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            self.tick().await;
        }
    }
}
