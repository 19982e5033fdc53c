//! Configuration system.
//!
//! Loads game configuration from JSON strings/files. Every field has a
//! default, so a config file only needs the keys it changes. Command-line
//! flags override whatever was loaded.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::math::Vec4;
use crate::movement::MovementConfig;
use crate::states::LoginState;

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Movement integration rate.
    #[serde(default = "default_physics_hz")]
    pub physics_hz: u32,
    /// Attack, power and effect rate.
    #[serde(default = "default_combat_hz")]
    pub combat_hz: u32,
    /// State broadcast rate.
    #[serde(default = "default_net_hz")]
    pub net_hz: u32,
    /// Zone loaded by the host.
    #[serde(default = "default_zone")]
    pub zone: String,
    /// Optional template file replacing the built-in set.
    #[serde(default)]
    pub templates_path: Option<String>,
    /// Player name (client only).
    #[serde(default = "default_player_name")]
    pub player_name: String,
    /// Player colour (client only).
    #[serde(default = "default_player_color")]
    pub player_color: Vec4,
    /// Item templates per equipment slot (client only).
    #[serde(default = "default_equipment")]
    pub equipment: Vec<Option<u32>>,
    /// Item templates in the starting inventory (client only).
    #[serde(default = "default_inventory")]
    pub inventory: Vec<Option<u32>>,
    /// Power templates to start with (client only).
    #[serde(default = "default_powers")]
    pub powers: Vec<u32>,
    /// Inventory container length.
    #[serde(default = "default_inventory_slots")]
    pub inventory_slots: usize,
    /// Energy regained per second by living characters.
    #[serde(default = "default_energy_regen")]
    pub energy_regen_per_sec: f64,
    /// Seed for combat rolls; random when unset.
    #[serde(default)]
    pub rng_seed: Option<u64>,
    #[serde(default)]
    pub movement: MovementConfig,
}

fn default_server_addr() -> String {
    "127.0.0.1:40000".to_string()
}

fn default_physics_hz() -> u32 {
    60
}

fn default_combat_hz() -> u32 {
    10
}

fn default_net_hz() -> u32 {
    20
}

fn default_zone() -> String {
    crate::templates::DEFAULT_ZONE.to_string()
}

fn default_player_name() -> String {
    "Player".to_string()
}

fn default_player_color() -> Vec4 {
    Vec4::new(0.2, 0.4, 0.9, 1.0)
}

fn default_equipment() -> Vec<Option<u32>> {
    vec![Some(1), Some(2)]
}

fn default_inventory() -> Vec<Option<u32>> {
    vec![Some(3), Some(4), Some(5)]
}

fn default_powers() -> Vec<u32> {
    vec![1, 2, 3]
}

fn default_inventory_slots() -> usize {
    12
}

fn default_energy_regen() -> f64 {
    2.0
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            physics_hz: default_physics_hz(),
            combat_hz: default_combat_hz(),
            net_hz: default_net_hz(),
            zone: default_zone(),
            templates_path: None,
            player_name: default_player_name(),
            player_color: default_player_color(),
            equipment: default_equipment(),
            inventory: default_inventory(),
            powers: default_powers(),
            inventory_slots: default_inventory_slots(),
            energy_regen_per_sec: default_energy_regen(),
            rng_seed: None,
            movement: MovementConfig::default(),
        }
    }
}

impl GameConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Login request built from the client-side fields.
    pub fn login_state(&self) -> LoginState {
        LoginState {
            name: self.player_name.clone(),
            color: self.player_color,
            equipment: self.equipment.clone(),
            inventory: self.inventory.clone(),
            powers: self.powers.clone(),
            ..Default::default()
        }
    }
}
