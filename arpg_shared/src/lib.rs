//! `arpg_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Deterministic where the host and client must agree (movement, codec).
//! - Clear separation of concerns (codec, net, rpc, movement, rules, items).
//! - Traits at the seams the simulation depends on (`Transport`, `Raycaster`,
//!   `AttrSource`/`AttrTarget`).
//! - No `unsafe`.

#[macro_use]
pub mod codec;
#[macro_use]
pub mod rpc;

pub mod character;
pub mod config;
pub mod items;
pub mod math;
pub mod movement;
pub mod net;
pub mod protocol;
pub mod registry;
pub mod rules;
pub mod scheduler;
pub mod states;
pub mod templates;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::character::*;
    pub use crate::codec::{AttrSource, AttrTarget, Value, WireState};
    pub use crate::config::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::registry::*;
    pub use crate::rpc::{Dispatcher, Endpoint, RemoteCall, TypeRegistry};
    pub use crate::scheduler::*;
    pub use crate::states::*;
}
