//! `arpg_server`
//!
//! The authoritative host:
//! - World registry keyed by uuid and instance id
//! - Login, spawn and disconnect cleanup
//! - Server-side movement replay of client inputs
//! - Auto-attacks, powers and effects on a fixed combat tick
//! - Atomic equipment and inventory moves
//!
//! Networking model:
//! - TCP frames carrying named remote calls, see `arpg_shared::rpc`

pub mod combat;
pub mod effects;
pub mod host;
pub mod inventory;
pub mod login;
pub mod movement;
pub mod powers;
pub mod server;
pub mod world;

#[cfg(test)]
mod test_support;

pub use host::Host;
pub use server::GameServer;
