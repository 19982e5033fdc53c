//! In-memory host harness for unit tests.

use std::time::Instant;

use arpg_shared::{
    config::GameConfig,
    net::{ConnectionId, MemoryTransport, PeerEvent},
    protocol::RequestEnterWorld,
    registry::Uuid,
    rpc::{decode_frame, encode_frame, split_frame, Dispatcher, RemoteCall},
    states::LoginState,
    templates::TemplateStore,
};
use bytes::Bytes;

use crate::host::Host;

pub struct Harness {
    pub host: Host<MemoryTransport>,
    dispatcher: Dispatcher<Host<MemoryTransport>>,
    next_conn: u32,
}

/// Frames the host sent, in order.
pub struct Sent(Vec<(ConnectionId, Bytes)>);

impl Sent {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Call names sent to `conn`.
    pub fn names(&self, conn: ConnectionId) -> Vec<String> {
        self.0
            .iter()
            .filter(|(c, _)| *c == conn)
            .filter_map(|(_, frame)| split_frame(frame.clone()).ok().map(|(name, _)| name))
            .collect()
    }

    /// Every `R` sent to `conn`.
    pub fn calls<R: RemoteCall>(&self, conn: ConnectionId) -> Vec<R> {
        self.0
            .iter()
            .filter(|(c, _)| *c == conn)
            .filter_map(|(_, frame)| decode_frame::<R>(frame.clone()).ok().flatten())
            .collect()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(GameConfig {
            rng_seed: Some(7),
            ..Default::default()
        })
    }

    pub fn with_config(cfg: GameConfig) -> Self {
        let host = Host::new(MemoryTransport::host(), cfg, TemplateStore::builtin())
            .expect("builtin zone loads");
        Self {
            host,
            dispatcher: Host::build_dispatcher(),
            next_conn: 1,
        }
    }

    pub fn connect(&mut self) -> ConnectionId {
        let conn = ConnectionId(self.next_conn);
        self.next_conn += 1;
        self.host.endpoint_mut().transport_mut().open(conn);
        self.host
            .handle_event(&self.dispatcher, PeerEvent::Connected(conn));
        conn
    }

    pub fn disconnect(&mut self, conn: ConnectionId) {
        self.host.endpoint_mut().transport_mut().close(conn);
        self.host
            .handle_event(&self.dispatcher, PeerEvent::Disconnected(conn));
    }

    pub fn send<R: RemoteCall>(&mut self, conn: ConnectionId, rpc: &R) {
        let event = PeerEvent::Message {
            conn,
            frame: encode_frame(rpc),
            received_at: Instant::now(),
        };
        self.host.handle_event(&self.dispatcher, event);
    }

    /// Connects and enters the world with the default login under `name`.
    pub fn login(&mut self, name: &str) -> (ConnectionId, Uuid) {
        let name = name.to_string();
        self.login_with(move |login| login.name = name)
    }

    pub fn login_with(&mut self, edit: impl FnOnce(&mut LoginState)) -> (ConnectionId, Uuid) {
        let conn = self.connect();
        let mut login = self.host.config().login_state();
        edit(&mut login);
        self.send(conn, &RequestEnterWorld { login });
        let uuid = self
            .host
            .world()
            .character_of(conn)
            .expect("login binds the connection");
        (conn, uuid)
    }

    pub fn drain(&mut self) -> Sent {
        Sent(self.host.endpoint_mut().transport_mut().take_sent())
    }
}
