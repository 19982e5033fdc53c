//! Identity primitives shared by the host and client registries.
//!
//! Entities never hold references to each other; they hold ids. Removing an
//! entity from its owning map is enough to "destroy" it, and stale ids simply
//! fail lookup.

use std::collections::HashMap;
use std::fmt;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::codec::{FieldKind, MalformedStateError, Value, Wire};
use crate::net::ConnectionId;

/// Network-unique character id, assigned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uuid(pub u32);

/// Network-unique instance id of an item, container, power or effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u32);

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

macro_rules! id_wire {
    ($ty:ident) => {
        impl Wire for $ty {
            fn kind() -> FieldKind {
                FieldKind::Int
            }
            fn put(&self, buf: &mut BytesMut) {
                self.0.put(buf);
            }
            fn take(buf: &mut Bytes) -> Result<Self, MalformedStateError> {
                u32::take(buf).map($ty)
            }
            fn to_value(&self) -> Value {
                self.0.to_value()
            }
            fn from_value(value: &Value) -> Option<Self> {
                u32::from_value(value).map($ty)
            }
        }
    };
}

id_wire!(Uuid);
id_wire!(InstanceId);

/// Monotonic id source. Ids start at 1 and are never reused.
#[derive(Debug, Clone)]
pub struct IdCounter {
    next: u32,
}

impl Default for IdCounter {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl IdCounter {
    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Id the next call will hand out.
    pub fn peek(&self) -> u32 {
        self.next
    }
}

/// Independent counters for every kind of instance the host creates.
#[derive(Debug, Default)]
pub struct InstanceCounters {
    pub items: IdCounter,
    pub containers: IdCounter,
    pub powers: IdCounter,
    pub effects: IdCounter,
}

impl InstanceCounters {
    pub fn next_item(&mut self) -> InstanceId {
        InstanceId(self.items.next_id())
    }

    pub fn next_container(&mut self) -> InstanceId {
        InstanceId(self.containers.next_id())
    }

    pub fn next_power(&mut self) -> InstanceId {
        InstanceId(self.powers.next_id())
    }

    pub fn next_effect(&mut self) -> InstanceId {
        InstanceId(self.effects.next_id())
    }
}

/// Connection binding errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindError {
    ConnectionBound(Uuid),
    CharacterBound(ConnectionId),
}

/// Bidirectional connection ↔ character table.
///
/// At most one character per connection and one connection per character.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    by_conn: HashMap<ConnectionId, Uuid>,
    by_uuid: HashMap<Uuid, ConnectionId>,
}

impl ConnectionTable {
    pub fn bind(&mut self, conn: ConnectionId, uuid: Uuid) -> Result<(), BindError> {
        if let Some(existing) = self.by_conn.get(&conn) {
            return Err(BindError::ConnectionBound(*existing));
        }
        if let Some(existing) = self.by_uuid.get(&uuid) {
            return Err(BindError::CharacterBound(*existing));
        }
        self.by_conn.insert(conn, uuid);
        self.by_uuid.insert(uuid, conn);
        Ok(())
    }

    pub fn uuid_of(&self, conn: ConnectionId) -> Option<Uuid> {
        self.by_conn.get(&conn).copied()
    }

    pub fn conn_of(&self, uuid: Uuid) -> Option<ConnectionId> {
        self.by_uuid.get(&uuid).copied()
    }

    pub fn unbind_conn(&mut self, conn: ConnectionId) -> Option<Uuid> {
        let uuid = self.by_conn.remove(&conn)?;
        self.by_uuid.remove(&uuid);
        Some(uuid)
    }

    pub fn unbind_uuid(&mut self, uuid: Uuid) -> Option<ConnectionId> {
        let conn = self.by_uuid.remove(&uuid)?;
        self.by_conn.remove(&conn);
        Some(conn)
    }

    pub fn len(&self) -> usize {
        self.by_conn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_conn.is_empty()
    }

    /// Bound pairs, ordered by connection id.
    pub fn pairs(&self) -> Vec<(ConnectionId, Uuid)> {
        let mut out: Vec<_> = self.by_conn.iter().map(|(c, u)| (*c, *u)).collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonic_and_independent() {
        let mut ids = InstanceCounters::default();
        assert_eq!(ids.next_item(), InstanceId(1));
        assert_eq!(ids.next_item(), InstanceId(2));
        assert_eq!(ids.next_power(), InstanceId(1));
        assert_eq!(ids.items.peek(), 3);
    }

    #[test]
    fn connection_table_is_one_to_one() {
        let mut table = ConnectionTable::default();
        table.bind(ConnectionId(1), Uuid(10)).unwrap();
        assert_eq!(
            table.bind(ConnectionId(1), Uuid(11)),
            Err(BindError::ConnectionBound(Uuid(10)))
        );
        assert_eq!(
            table.bind(ConnectionId(2), Uuid(10)),
            Err(BindError::CharacterBound(ConnectionId(1)))
        );
        assert_eq!(table.conn_of(Uuid(10)), Some(ConnectionId(1)));

        assert_eq!(table.unbind_uuid(Uuid(10)), Some(ConnectionId(1)));
        assert_eq!(table.uuid_of(ConnectionId(1)), None);
        assert!(table.is_empty());
    }
}
