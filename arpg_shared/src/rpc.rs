//! Named remote calls on top of a [`Transport`].
//!
//! A frame payload is `u16 name length | name | encoded arguments`. Each call
//! is a typed struct declared with `remote_call!`; arguments are encoded with
//! the state codec in declared order.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::codec::{put_str, take_str, MalformedStateError, WireState};
use crate::net::{ConnectionId, Transport};

/// A remote-callable procedure and its ordered arguments.
pub trait RemoteCall: Sized {
    const NAME: &'static str;

    /// Type names of state-record arguments that must be registered before
    /// the call is sent.
    fn payload_types() -> Vec<&'static str>;
    fn encode_args(&self, buf: &mut BytesMut);
    fn decode_args(buf: &mut Bytes) -> Result<Self, MalformedStateError>;
}

/// Declares a remote call.
///
/// ```ignore
/// remote_call! {
///     pub struct RemoteKill("remote_kill") { uuid: Uuid }
/// }
/// ```
macro_rules! remote_call {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident ($rpc:literal) {
            $(
                $(#[$fmeta:meta])*
                $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl $crate::rpc::RemoteCall for $name {
            const NAME: &'static str = $rpc;

            #[allow(unused_mut)]
            fn payload_types() -> Vec<&'static str> {
                let mut out = Vec::new();
                $(
                    if let Some(n) = <$ty as $crate::codec::Wire>::type_name() {
                        out.push(n);
                    }
                )*
                out
            }

            fn encode_args(&self, buf: &mut ::bytes::BytesMut) {
                let _ = &buf;
                $( $crate::codec::Wire::put(&self.$field, buf); )*
            }

            fn decode_args(
                buf: &mut ::bytes::Bytes,
            ) -> Result<Self, $crate::codec::MalformedStateError> {
                let _ = &buf;
                Ok(Self {
                    $( $field: <$ty as $crate::codec::Wire>::take(buf)?, )*
                })
            }
        }
    };
}

/// Builds the frame for one call.
pub fn encode_frame<R: RemoteCall>(rpc: &R) -> Bytes {
    let mut buf = BytesMut::new();
    put_str(&mut buf, R::NAME);
    rpc.encode_args(&mut buf);
    buf.freeze()
}

/// Splits a frame into its call name and argument bytes.
pub fn split_frame(mut frame: Bytes) -> Result<(String, Bytes), MalformedStateError> {
    let name = take_str(&mut frame)?;
    Ok((name, frame))
}

/// Decodes a whole frame as `R`. Fails on a name mismatch or leftover bytes.
pub fn decode_frame<R: RemoteCall>(frame: Bytes) -> Result<Option<R>, MalformedStateError> {
    let (name, mut args) = split_frame(frame)?;
    if name != R::NAME {
        return Ok(None);
    }
    let rpc = R::decode_args(&mut args)?;
    if args.has_remaining() {
        return Err(MalformedStateError::TrailingBytes(args.remaining()));
    }
    Ok(Some(rpc))
}

/// Payload types an endpoint is allowed to send.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    names: BTreeSet<&'static str>,
}

impl TypeRegistry {
    pub fn register<S: WireState>(&mut self) -> &mut Self {
        self.names.insert(S::TYPE_NAME);
        self
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Panics if `R` carries an unregistered payload type.
    pub fn assert_registered<R: RemoteCall>(&self) {
        for name in R::payload_types() {
            assert!(
                self.is_registered(name),
                "payload type {name} used by {} is not registered",
                R::NAME
            );
        }
    }
}

/// Sending side of the RPC layer.
pub struct Endpoint<T: Transport> {
    transport: T,
    types: TypeRegistry,
}

impl<T: Transport> Endpoint<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            types: TypeRegistry::default(),
        }
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn is_hosting(&self) -> bool {
        self.transport.is_hosting()
    }

    /// Invokes `rpc` on the peer at the other end of `conn`.
    pub fn call<R: RemoteCall>(&mut self, conn: ConnectionId, rpc: &R) {
        self.types.assert_registered::<R>();
        self.transport.send_frame(conn, encode_frame(rpc));
    }

    /// Invokes `rpc` on every connection. Host only; a client does nothing.
    pub fn broadcast<R: RemoteCall>(&mut self, rpc: &R) {
        self.send_all(None, rpc);
    }

    /// Invokes `rpc` on every connection except `except`. Host only.
    pub fn broadcast_except<R: RemoteCall>(&mut self, except: ConnectionId, rpc: &R) {
        self.send_all(Some(except), rpc);
    }

    fn send_all<R: RemoteCall>(&mut self, except: Option<ConnectionId>, rpc: &R) {
        if !self.transport.is_hosting() {
            return;
        }
        self.types.assert_registered::<R>();
        let frame = encode_frame(rpc);
        for conn in self.transport.connections() {
            if Some(conn) != except {
                self.transport.send_frame(conn, frame.clone());
            }
        }
    }
}

type Handler<C> = Box<dyn Fn(&mut C, ConnectionId, Instant, Bytes) -> Result<(), MalformedStateError>>;

/// Receiving side: maps call names to typed handlers on a context `C`.
pub struct Dispatcher<C> {
    handlers: HashMap<&'static str, Handler<C>>,
}

impl<C: 'static> Default for Dispatcher<C> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<C: 'static> Dispatcher<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for `R`. A later registration replaces it.
    pub fn on<R: RemoteCall + 'static>(
        &mut self,
        handler: fn(&mut C, ConnectionId, Instant, R),
    ) -> &mut Self {
        self.handlers.insert(
            R::NAME,
            Box::new(move |ctx, conn, received_at, mut args| {
                let rpc = R::decode_args(&mut args)?;
                if args.has_remaining() {
                    return Err(MalformedStateError::TrailingBytes(args.remaining()));
                }
                handler(ctx, conn, received_at, rpc);
                Ok(())
            }),
        );
        self
    }

    pub fn handles(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Decodes and runs one frame. Returns false if it was dropped.
    pub fn dispatch(
        &self,
        ctx: &mut C,
        conn: ConnectionId,
        received_at: Instant,
        frame: Bytes,
    ) -> bool {
        let (name, args) = match split_frame(frame) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(conn = ?conn, error = %e, "Dropping unreadable frame");
                return false;
            }
        };
        let Some(handler) = self.handlers.get(name.as_str()) else {
            warn!(conn = ?conn, rpc = %name, "Unknown remote call dropped");
            return false;
        };
        match handler(ctx, conn, received_at, args) {
            Ok(()) => {
                debug!(conn = ?conn, rpc = %name, "Dispatched");
                true
            }
            Err(e) => {
                warn!(conn = ?conn, rpc = %name, error = %e, "Malformed arguments dropped");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Layout;
    use crate::math::Vec3;
    use crate::net::MemoryTransport;
    use crate::states::PhysicalState;

    remote_call! {
        struct Ping("ping") {
            seq: u32,
            note: String,
        }
    }

    remote_call! {
        struct Teleport("teleport") {
            state: PhysicalState,
        }
    }

    remote_call! {
        struct Nudge("nudge") {}
    }

    state_record! {
        struct Unregistered("Unregistered", Layout::Fixed) {
            x: i32,
        }
    }

    remote_call! {
        struct SendUnregistered("send_unregistered") {
            payload: Unregistered,
        }
    }

    #[derive(Default)]
    struct Log {
        seen: Vec<(ConnectionId, u32, String)>,
        nudges: usize,
    }

    fn on_ping(log: &mut Log, conn: ConnectionId, _at: Instant, rpc: Ping) {
        log.seen.push((conn, rpc.seq, rpc.note));
    }

    fn on_nudge(log: &mut Log, _conn: ConnectionId, _at: Instant, _rpc: Nudge) {
        log.nudges += 1;
    }

    #[test]
    fn frame_carries_name_then_args() {
        let frame = encode_frame(&Ping {
            seq: 7,
            note: "hi".into(),
        });
        let (name, args) = split_frame(frame.clone()).unwrap();
        assert_eq!(name, "ping");
        assert_eq!(args.len(), 4 + 2 + 2);
        let back: Ping = decode_frame(frame).unwrap().unwrap();
        assert_eq!(back.seq, 7);
        assert!(decode_frame::<Nudge>(encode_frame(&back)).unwrap().is_none());
    }

    #[test]
    fn dispatcher_routes_by_name_and_drops_garbage() {
        let mut d = Dispatcher::<Log>::new();
        d.on(on_ping).on(on_nudge);
        let mut log = Log::default();
        let now = Instant::now();

        let ping = encode_frame(&Ping {
            seq: 1,
            note: "a".into(),
        });
        assert!(d.dispatch(&mut log, ConnectionId(3), now, ping.clone()));
        assert!(d.dispatch(&mut log, ConnectionId(3), now, encode_frame(&Nudge {})));

        // Truncated arguments.
        let cut = ping.slice(..ping.len() - 1);
        assert!(!d.dispatch(&mut log, ConnectionId(3), now, cut));

        // Unknown name.
        let other = encode_frame(&Teleport {
            state: PhysicalState::default(),
        });
        assert!(!d.dispatch(&mut log, ConnectionId(3), now, other));

        assert_eq!(log.seen, vec![(ConnectionId(3), 1, "a".to_string())]);
        assert_eq!(log.nudges, 1);
    }

    #[test]
    fn broadcast_is_host_only() {
        let mut client = Endpoint::new(MemoryTransport::client());
        client.broadcast(&Nudge {});
        assert!(client.transport_mut().take_sent().is_empty());

        let mut host = Endpoint::new(MemoryTransport::host());
        for id in 1..=3 {
            host.transport_mut().open(ConnectionId(id));
        }
        host.broadcast_except(ConnectionId(2), &Nudge {});
        let conns: Vec<_> = host
            .transport_mut()
            .take_sent()
            .into_iter()
            .map(|(c, _)| c)
            .collect();
        assert_eq!(conns, vec![ConnectionId(1), ConnectionId(3)]);
    }

    #[test]
    fn registered_payload_is_sent() {
        let mut host = Endpoint::new(MemoryTransport::host());
        host.types_mut().register::<PhysicalState>();
        host.transport_mut().open(ConnectionId(1));
        host.call(
            ConnectionId(1),
            &Teleport {
                state: PhysicalState {
                    position: Vec3::UP,
                    ..Default::default()
                },
            },
        );
        assert_eq!(host.transport_mut().take_sent().len(), 1);
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn unregistered_payload_panics() {
        let mut host = Endpoint::new(MemoryTransport::host());
        host.transport_mut().open(ConnectionId(1));
        host.call(ConnectionId(1), &SendUnregistered {
            payload: Unregistered { x: 1 },
        });
    }
}
