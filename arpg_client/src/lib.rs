//! `arpg_client`
//!
//! Client-side systems:
//! - Local registry of everything the host has spawned
//! - Input sampling into per-tick movement input
//! - Prediction of the player's movement, reconciled against host echoes
//! - Interpolation of observed characters between host updates

pub mod client;
pub mod input;
pub mod interp;
pub mod prediction;
pub mod session;
pub mod world;

pub use client::Client;
pub use session::GameClient;
