//! Template store: items, powers, effects and zones keyed by id.
//!
//! A built-in set ships with the crate; a JSON file with the same shape
//! replaces it wholesale.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::items::{ItemKind, ItemTemplate, SlotMask};
use crate::math::{Vec3, Vec4};
use crate::movement::{Aabb, CollisionWorld};
use crate::states::StatDelta;

/// Who a power may be aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerTarget {
    /// Always the caster.
    #[serde(rename = "self")]
    Caster,
    /// The caster's current target, which may be the caster.
    #[default]
    Target,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerTemplate {
    pub id: u32,
    pub name: String,
    pub cost: i32,
    /// Global cooldown started on use.
    pub gcd: f64,
    pub cooldown: f64,
    pub target: PowerTarget,
    pub range: f32,
    /// Effect template spawned on use.
    pub effect: u32,
}

impl Default for PowerTemplate {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            cost: 0,
            gcd: 1.5,
            cooldown: 0.0,
            target: PowerTarget::Target,
            range: crate::rules::ATTACK_RANGE,
            effect: 0,
        }
    }
}

/// One change an effect makes to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "amount", rename_all = "lowercase")]
pub enum SubEffect {
    /// Reduced by armor.
    Damage(i32),
    /// Capped at max health.
    Heal(i32),
    /// Clamped to [0, max energy].
    Energy(i32),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectTemplate {
    pub id: u32,
    pub name: String,
    pub instant: Vec<SubEffect>,
    pub tick: Vec<SubEffect>,
    pub tick_rate: f64,
    pub duration: f64,
    /// Applied for the whole duration and removed on expiry.
    pub persistent: StatDelta,
}

/// A stationary zone character.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NpcSpawn {
    pub position: Vec3,
    pub rotation: Vec3,
    /// Loose login attributes; missing or mistyped ones fall back to defaults.
    pub attrs: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneTemplate {
    pub id: String,
    pub name: String,
    pub spawn: Vec3,
    pub ground: Option<f32>,
    pub boxes: Vec<Aabb>,
    pub npcs: Vec<NpcSpawn>,
}

impl Default for ZoneTemplate {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            spawn: Vec3::ZERO,
            ground: Some(0.0),
            boxes: Vec::new(),
            npcs: Vec::new(),
        }
    }
}

impl ZoneTemplate {
    pub fn collision_world(&self) -> CollisionWorld {
        CollisionWorld::new(self.ground, self.boxes.clone())
    }
}

/// On-disk shape of a template file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateFile {
    pub items: Vec<ItemTemplate>,
    pub powers: Vec<PowerTemplate>,
    pub effects: Vec<EffectTemplate>,
    pub zones: Vec<ZoneTemplate>,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    items: BTreeMap<u32, ItemTemplate>,
    powers: BTreeMap<u32, PowerTemplate>,
    effects: BTreeMap<u32, EffectTemplate>,
    zones: BTreeMap<String, ZoneTemplate>,
}

impl From<TemplateFile> for TemplateStore {
    fn from(file: TemplateFile) -> Self {
        Self {
            items: file.items.into_iter().map(|t| (t.id, t)).collect(),
            powers: file.powers.into_iter().map(|t| (t.id, t)).collect(),
            effects: file.effects.into_iter().map(|t| (t.id, t)).collect(),
            zones: file.zones.into_iter().map(|z| (z.id.clone(), z)).collect(),
        }
    }
}

impl TemplateStore {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<TemplateFile>(s).map(Self::from)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read templates {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse templates {}", path.display()))
    }

    pub fn item(&self, id: u32) -> Option<&ItemTemplate> {
        self.items.get(&id)
    }

    pub fn power(&self, id: u32) -> Option<&PowerTemplate> {
        self.powers.get(&id)
    }

    pub fn effect(&self, id: u32) -> Option<&EffectTemplate> {
        self.effects.get(&id)
    }

    pub fn zone(&self, id: &str) -> Option<&ZoneTemplate> {
        self.zones.get(id)
    }

    /// Adds or replaces a zone.
    pub fn insert_zone(&mut self, zone: ZoneTemplate) {
        self.zones.insert(zone.id.clone(), zone);
    }

    pub fn zone_ids(&self) -> impl Iterator<Item = &str> {
        self.zones.keys().map(String::as_str)
    }

    /// The default content set.
    pub fn builtin() -> Self {
        TemplateFile {
            items: builtin_items(),
            powers: builtin_powers(),
            effects: builtin_effects(),
            zones: vec![builtin_zone()],
        }
        .into()
    }
}

/// Id of the zone the built-in set provides.
pub const DEFAULT_ZONE: &str = "meadow";

fn weapon(id: u32, name: &str, style: &str, damage: i32, delay: f64, valid: SlotMask) -> ItemTemplate {
    ItemTemplate {
        id,
        name: name.to_string(),
        kind: ItemKind::Weapon,
        style: Some(style.to_string()),
        damage,
        delay,
        valid_slots: valid,
        ..Default::default()
    }
}

fn armor(id: u32, name: &str, slot: SlotMask, stats: StatDelta) -> ItemTemplate {
    ItemTemplate {
        id,
        name: name.to_string(),
        kind: ItemKind::Armor,
        stats,
        valid_slots: slot,
        ..Default::default()
    }
}

fn builtin_items() -> Vec<ItemTemplate> {
    vec![
        weapon(1, "Rusty Sword", "swords", 6, 1.6, SlotMask::MH | SlotMask::OH),
        armor(
            2,
            "Wooden Shield",
            SlotMask::OH,
            StatDelta {
                armor: 5,
                ..Default::default()
            },
        ),
        ItemTemplate {
            excluded_slots: SlotMask::OH,
            stats: StatDelta {
                strength: 2,
                ..Default::default()
            },
            ..weapon(3, "Greataxe", "axes", 12, 2.4, SlotMask::MH)
        },
        ItemTemplate {
            stats: StatDelta {
                dexterity: 1,
                ..Default::default()
            },
            ..weapon(4, "Dagger", "daggers", 3, 1.0, SlotMask::MH | SlotMask::OH)
        },
        armor(
            5,
            "Leather Cap",
            SlotMask::HEAD,
            StatDelta {
                armor: 2,
                ..Default::default()
            },
        ),
        armor(
            6,
            "Ring of Haste",
            SlotMask::RING,
            StatDelta {
                haste: 10,
                ..Default::default()
            },
        ),
        armor(
            7,
            "Amulet of Vigor",
            SlotMask::NECK,
            StatDelta {
                static_health: 20,
                ..Default::default()
            },
        ),
    ]
}

fn builtin_powers() -> Vec<PowerTemplate> {
    vec![
        PowerTemplate {
            id: 1,
            name: "Firebolt".into(),
            cost: 10,
            gcd: 1.5,
            cooldown: 3.0,
            target: PowerTarget::Target,
            range: 20.0,
            effect: 1,
        },
        PowerTemplate {
            id: 2,
            name: "Mend".into(),
            cost: 15,
            gcd: 1.5,
            cooldown: 8.0,
            target: PowerTarget::Caster,
            range: 0.0,
            effect: 2,
        },
        PowerTemplate {
            id: 3,
            name: "Battle Cry".into(),
            cost: 20,
            gcd: 1.0,
            cooldown: 30.0,
            target: PowerTarget::Caster,
            range: 0.0,
            effect: 3,
        },
        PowerTemplate {
            id: 4,
            name: "Venom".into(),
            cost: 5,
            gcd: 1.5,
            cooldown: 6.0,
            target: PowerTarget::Target,
            range: crate::rules::ATTACK_RANGE,
            effect: 4,
        },
    ]
}

fn builtin_effects() -> Vec<EffectTemplate> {
    vec![
        EffectTemplate {
            id: 1,
            name: "Firebolt".into(),
            instant: vec![SubEffect::Damage(8)],
            ..Default::default()
        },
        EffectTemplate {
            id: 2,
            name: "Mend".into(),
            instant: vec![SubEffect::Heal(10)],
            tick: vec![SubEffect::Heal(2)],
            tick_rate: 1.0,
            duration: 5.0,
            ..Default::default()
        },
        EffectTemplate {
            id: 3,
            name: "Battle Cry".into(),
            duration: 10.0,
            persistent: StatDelta {
                strength: 5,
                armor: 5,
                static_health: 25,
                ..Default::default()
            },
            ..Default::default()
        },
        EffectTemplate {
            id: 4,
            name: "Venom".into(),
            tick: vec![SubEffect::Damage(3), SubEffect::Energy(-2)],
            tick_rate: 1.0,
            duration: 6.0,
            persistent: StatDelta {
                speed: -30,
                ..Default::default()
            },
            ..Default::default()
        },
    ]
}

fn builtin_zone() -> ZoneTemplate {
    let npc = |x: f32, z: f32, attrs: serde_json::Value| NpcSpawn {
        position: Vec3::new(x, 0.0, z),
        rotation: Vec3::ZERO,
        attrs: attrs.as_object().cloned().unwrap_or_default(),
    };
    ZoneTemplate {
        id: DEFAULT_ZONE.to_string(),
        name: "Quiet Meadow".to_string(),
        spawn: Vec3::new(0.0, 0.0, 0.0),
        ground: Some(0.0),
        boxes: vec![
            Aabb {
                min: Vec3::new(8.0, 0.0, -2.0),
                max: Vec3::new(9.0, 2.5, 6.0),
            },
            Aabb {
                min: Vec3::new(-12.0, 0.0, 10.0),
                max: Vec3::new(-6.0, 1.0, 14.0),
            },
        ],
        npcs: vec![
            npc(
                4.0,
                4.0,
                serde_json::json!({ "name": "Training Dummy", "static_health": 500, "armor": 0 }),
            ),
            npc(
                -5.0,
                3.0,
                serde_json::json!({
                    "name": "Goblin",
                    "static_health": 40,
                    "armor": 3,
                    "color": [0.3, 0.8, 0.3, 1.0],
                }),
            ),
        ],
    }
}

/// Default colour of zone NPCs that do not set one.
pub const NPC_COLOR: Vec4 = Vec4::new(0.8, 0.2, 0.2, 1.0);
