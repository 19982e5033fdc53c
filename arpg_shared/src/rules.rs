//! Combat formulas. Pure functions; randomness is passed in.

use rand::Rng;

/// Reach of melee attacks and targeted powers.
pub const ATTACK_RANGE: f32 = 3.0;

pub fn in_range(from: crate::math::Vec3, to: crate::math::Vec3, range: f32) -> bool {
    from.distance_sq(to) <= range * range
}
/// Base damage of an unarmed hit.
pub const FISTS_DAMAGE: i32 = 2;
/// Attack delay in seconds when no weapon is held.
pub const UNARMED_DELAY: f64 = 1.0;
/// Off-hand timers run this many times slower than the main hand.
pub const OFF_HAND_SLOWDOWN: f64 = 1.5;
/// Chance that a landed hit raises the weapon skill by one.
pub const SKILL_UP_CHANCE: f64 = 0.5;
/// Skill trained by unarmed hits.
pub const FISTS_SKILL: &str = "fists";

const SIGMOID_EPS: f64 = 1e-9;

/// Logistic function, kept strictly inside (0, 1).
pub fn sigmoid(x: f64) -> f64 {
    let s = 1.0 / (1.0 + (-x).exp());
    s.clamp(SIGMOID_EPS, 1.0 - SIGMOID_EPS)
}

/// Attack-timer rate for a haste rating. Never negative.
pub fn haste_modifier(haste: i32) -> f64 {
    (1.0 + f64::from(haste) / 100.0).max(0.0)
}

/// Movement multiplier for a speed rating.
pub fn speed_modifier(speed: i32) -> f32 {
    (1.0 + speed as f32 / 100.0).max(0.0)
}

/// Chance that an attack misses: the attacker's dexterity against the
/// target's reflex.
pub fn miss_chance(attacker_dex: i32, target_ref: i32) -> f64 {
    sigmoid(f64::from(attacker_dex - target_ref) / 10.0)
}

/// Multiplier on weapon damage from strength against armor, in (0, 2).
pub fn damage_scale(strength: i32, armor: i32) -> f64 {
    2.0 * sigmoid(f64::from(strength) - f64::from(armor))
}

/// Inclusive damage bounds for a scaled base.
pub fn damage_range(base: i32, scale: f64) -> (i32, i32) {
    let scaled = f64::from(base) * scale;
    ((scaled * 0.5).ceil() as i32, (scaled * 1.5).ceil() as i32)
}

pub fn roll_damage<R: Rng + ?Sized>(rng: &mut R, base: i32, strength: i32, armor: i32) -> i32 {
    let (min, max) = damage_range(base, damage_scale(strength, armor));
    if max <= min {
        return min;
    }
    rng.gen_range(min..=max)
}

/// Off-hand hits deal half damage, rounded up.
pub fn off_hand_damage(damage: i32) -> i32 {
    (damage + 1).div_euclid(2)
}

/// Damage left after armor, for effect damage.
pub fn armor_mitigate(amount: i32, armor: i32) -> i32 {
    let armor = armor.max(0);
    (f64::from(amount) * 100.0 / (100.0 + f64::from(armor))).round() as i32
}
