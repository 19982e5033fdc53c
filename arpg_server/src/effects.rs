//! Effects spawned by powers.
//!
//! Instant sub-effects land once on creation. An effect with a duration stays
//! on its target, firing its tick sub-effects every `tick_rate` seconds, and
//! holds its persistent stat delta until it expires.

use arpg_shared::{
    codec::{AttrTarget, WireState},
    net::Transport,
    registry::{InstanceId, Uuid},
    rules::armor_mitigate,
    templates::SubEffect,
};
use tracing::debug;

use crate::host::Host;
use crate::world::Effect;

const TIMER_EPS: f64 = 1e-9;

impl<T: Transport> Host<T> {
    /// Creates an effect from `template` on `target`. Returns the id of the
    /// stored effect, or `None` if it was instant-only.
    pub fn spawn_effect(&mut self, template: u32, source: Uuid, target: Uuid) -> Option<InstanceId> {
        let Some(tpl) = self.templates.effect(template).cloned() else {
            debug!(template, "Unknown effect template");
            return None;
        };
        if !self.world.characters.contains_key(&target) {
            return None;
        }
        for sub in &tpl.instant {
            self.apply_sub_effect(target, *sub);
        }
        if tpl.duration <= 0.0 {
            return None;
        }

        let id = self.world.ids.next_effect();
        if let Some(c) = self.world.characters.get_mut(&target) {
            if !tpl.persistent.is_empty() {
                tpl.persistent.apply_diff(c, false);
            }
            c.effects.push(id);
        }
        self.world.effects.insert(
            id,
            Effect {
                id,
                template,
                source,
                target,
                duration: tpl.duration,
                elapsed: 0.0,
                tick_timer: 0.0,
                persistent: tpl.persistent.clone(),
            },
        );
        self.world.mark_dirty(target);
        debug!(effect = %id, name = %tpl.name, source = %source, target = %target, "Effect started");
        Some(id)
    }

    /// Applies one sub-effect to `target` and marks it for broadcast.
    pub fn apply_sub_effect(&mut self, target: Uuid, sub: SubEffect) {
        let Some(c) = self.world.characters.get_mut(&target) else {
            return;
        };
        match sub {
            SubEffect::Damage(amount) => c.health -= armor_mitigate(amount, c.armor),
            SubEffect::Heal(amount) => {
                if c.health < c.max_health {
                    c.health = (c.health + amount).min(c.max_health);
                }
            }
            SubEffect::Energy(amount) => {
                c.energy = (c.energy + amount).clamp(0, c.max_energy.max(0));
            }
        }
        c.rederive();
        self.world.mark_dirty(target);
    }

    /// Ticks and expires every live effect.
    pub(crate) fn effects_tick(&mut self, dt: f64) {
        let ids: Vec<InstanceId> = self.world.effects.keys().copied().collect();
        for id in ids {
            let Some(effect) = self.world.effects.get_mut(&id) else {
                continue;
            };
            let Some(tpl) = self.templates.effect(effect.template) else {
                continue;
            };
            effect.elapsed += dt;
            let mut fires = 0;
            if !tpl.tick.is_empty() && tpl.tick_rate > 0.0 {
                effect.tick_timer += dt;
                while effect.tick_timer + TIMER_EPS >= tpl.tick_rate {
                    effect.tick_timer -= tpl.tick_rate;
                    fires += 1;
                }
            }
            let expired = effect.elapsed + TIMER_EPS >= effect.duration;
            let target = effect.target;
            let subs = tpl.tick.clone();

            for _ in 0..fires {
                for sub in &subs {
                    self.apply_sub_effect(target, *sub);
                }
            }
            if expired {
                self.expire_effect(id);
            }
        }
    }

    /// Removes an effect and takes its persistent delta back off the target.
    pub fn expire_effect(&mut self, id: InstanceId) {
        let Some(effect) = self.world.effects.remove(&id) else {
            return;
        };
        if let Some(c) = self.world.characters.get_mut(&effect.target) {
            if !effect.persistent.is_empty() {
                effect.persistent.apply_diff(c, true);
            }
            c.effects.retain(|e| *e != id);
        }
        self.world.mark_dirty(effect.target);
        debug!(effect = %id, target = %effect.target, "Effect expired");
    }
}
