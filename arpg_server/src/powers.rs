//! Power use, cooldowns and the global cooldown.
//!
//! A request that arrives while the GCD or the power's own cooldown is
//! running queues the power instead. Each character holds at most one queued
//! power; asking for the queued power again takes it back out.

use std::time::Instant;

use arpg_shared::{
    net::{ConnectionId, Transport},
    protocol::RequestUsePower,
    registry::{InstanceId, Uuid},
    rules::in_range,
    templates::PowerTarget,
};
use tracing::{debug, info};

use crate::host::Host;

const TIMER_EPS: f64 = 1e-9;

fn count_down(timer: &mut f64, dt: f64) {
    *timer -= dt;
    if *timer <= TIMER_EPS {
        *timer = 0.0;
    }
}

impl<T: Transport> Host<T> {
    pub(crate) fn on_use_power(&mut self, conn: ConnectionId, _at: Instant, rpc: RequestUsePower) {
        let Some(uuid) = self.world.character_of(conn) else {
            return;
        };
        self.use_power(uuid, rpc.power);
    }

    /// Uses, queues or un-queues `power` for `uuid`.
    pub fn use_power(&mut self, uuid: Uuid, power: InstanceId) {
        let Some(p) = self.world.powers.get(&power) else {
            debug!(uuid = %uuid, power = %power, "Unknown power ignored");
            return;
        };
        if p.owner != uuid {
            debug!(uuid = %uuid, power = %power, "Power not owned");
            return;
        }
        let cooling = p.on_cooldown();
        let Some(c) = self.world.characters.get_mut(&uuid) else {
            return;
        };
        if !c.alive {
            return;
        }
        if c.combat.queued_power == Some(power) {
            c.combat.queued_power = None;
            debug!(uuid = %uuid, power = %power, "Power un-queued");
            return;
        }
        if c.combat.gcd > 0.0 || cooling {
            c.combat.queued_power = Some(power);
            debug!(uuid = %uuid, power = %power, "Power queued");
            return;
        }
        self.activate_power(uuid, power);
    }

    /// Counts cooldowns down and fires queued powers that became ready.
    pub(crate) fn powers_tick(&mut self, dt: f64) {
        for p in self.world.powers.values_mut() {
            count_down(&mut p.cooldown, dt);
        }
        let mut ready = Vec::new();
        for c in self.world.characters.values_mut() {
            count_down(&mut c.combat.gcd, dt);
            let Some(queued) = c.combat.queued_power else {
                continue;
            };
            if c.combat.gcd > 0.0 {
                continue;
            }
            match self.world.powers.get(&queued) {
                None => c.combat.queued_power = None,
                Some(p) if !p.on_cooldown() => {
                    c.combat.queued_power = None;
                    ready.push((c.uuid, queued));
                }
                Some(_) => {}
            }
        }
        for (uuid, power) in ready {
            self.activate_power(uuid, power);
        }
    }

    /// Checks cost and target, pays, starts the cooldowns and spawns the
    /// power's effect. Returns whether the power went off.
    pub fn activate_power(&mut self, uuid: Uuid, power: InstanceId) -> bool {
        let Some(template) = self
            .world
            .powers
            .get(&power)
            .and_then(|p| self.templates.power(p.template))
            .cloned()
        else {
            debug!(uuid = %uuid, power = %power, "Power without template");
            return false;
        };
        let Some(caster) = self.world.characters.get(&uuid) else {
            return false;
        };
        if caster.energy < template.cost {
            debug!(uuid = %uuid, power = %template.name, "Not enough energy");
            return false;
        }

        let target = match template.target {
            PowerTarget::Caster => uuid,
            PowerTarget::Target => match caster.target {
                Some(t) => t,
                None => {
                    self.print(uuid, "You have no target.");
                    return false;
                }
            },
        };
        if target != uuid {
            let Some(other) = self.world.characters.get(&target).filter(|c| c.alive) else {
                self.print(uuid, "Your target is gone.");
                return false;
            };
            if !in_range(caster.position(), other.position(), template.range) {
                self.print(uuid, "Your target is too far away.");
                return false;
            }
            if !self.line_of_sight(uuid, target) {
                self.print(uuid, "You can't see your target.");
                return false;
            }
        }

        if let Some(c) = self.world.characters.get_mut(&uuid) {
            c.energy -= template.cost;
            c.combat.gcd = template.gcd;
        }
        if let Some(p) = self.world.powers.get_mut(&power) {
            p.cooldown = template.cooldown;
        }
        self.world.mark_dirty(uuid);
        info!(uuid = %uuid, power = %template.name, target = %target, "Power used");
        self.spawn_effect(template.effect, uuid, target);
        true
    }
}

#[cfg(test)]
mod tests {
    use arpg_shared::{math::Vec3, protocol::RemotePrint};

    use super::*;
    use crate::test_support::Harness;

    fn power_of(h: &Harness, uuid: Uuid, template: u32) -> InstanceId {
        let world = h.host.world();
        world.characters[&uuid]
            .powers
            .iter()
            .copied()
            .find(|p| world.powers[p].template == template)
            .unwrap()
    }

    #[test]
    fn mend_costs_energy_and_starts_both_cooldowns() {
        let mut h = Harness::new();
        let (conn, uuid) = h.login("Healer");
        let mend = power_of(&h, uuid, 2);
        h.host.world_mut().characters.get_mut(&uuid).unwrap().health = 50;

        h.send(conn, &RequestUsePower { power: mend });
        let c = &h.host.world().characters[&uuid];
        assert_eq!(c.energy, 50 - 15);
        assert_eq!(c.combat.gcd, 1.5);
        assert_eq!(c.health, 60);
        assert_eq!(h.host.world().powers[&mend].cooldown, 8.0);
    }

    #[test]
    fn requests_during_gcd_queue_and_fire_later() {
        let mut h = Harness::new();
        let (conn, uuid) = h.login("Caster");
        let mend = power_of(&h, uuid, 2);
        let cry = power_of(&h, uuid, 3);

        h.send(conn, &RequestUsePower { power: mend });
        h.send(conn, &RequestUsePower { power: cry });
        assert_eq!(
            h.host.world().characters[&uuid].combat.queued_power,
            Some(cry)
        );

        for _ in 0..14 {
            h.host.powers_tick(0.1);
        }
        assert!(h.host.world().powers[&cry].cooldown == 0.0);
        assert_eq!(
            h.host.world().characters[&uuid].combat.queued_power,
            Some(cry)
        );
        h.host.powers_tick(0.1);
        let c = &h.host.world().characters[&uuid];
        assert_eq!(c.combat.queued_power, None);
        assert_eq!(c.combat.gcd, 1.0);
        assert_eq!(h.host.world().powers[&cry].cooldown, 30.0);
    }

    #[test]
    fn selecting_the_queued_power_again_unqueues_it() {
        let mut h = Harness::new();
        let (conn, uuid) = h.login("Caster");
        let mend = power_of(&h, uuid, 2);
        let cry = power_of(&h, uuid, 3);
        h.send(conn, &RequestUsePower { power: mend });
        h.send(conn, &RequestUsePower { power: cry });
        h.send(conn, &RequestUsePower { power: cry });
        assert_eq!(h.host.world().characters[&uuid].combat.queued_power, None);

        // A different power replaces the queued one.
        h.send(conn, &RequestUsePower { power: cry });
        h.send(conn, &RequestUsePower { power: mend });
        assert_eq!(
            h.host.world().characters[&uuid].combat.queued_power,
            Some(mend)
        );
    }

    #[test]
    fn insufficient_energy_is_silent() {
        let mut h = Harness::new();
        let (conn, uuid) = h.login("Tired");
        let cry = power_of(&h, uuid, 3);
        h.host.world_mut().characters.get_mut(&uuid).unwrap().energy = 5;
        h.drain();
        assert!(!h.host.activate_power(uuid, cry));
        assert_eq!(h.host.world().characters[&uuid].combat.gcd, 0.0);
        assert!(h.drain().calls::<RemotePrint>(conn).is_empty());
    }

    #[test]
    fn targeted_power_needs_a_target_in_range() {
        let mut h = Harness::new();
        let (conn, uuid) = h.login("Mage");
        let bolt = power_of(&h, uuid, 1);
        h.drain();

        assert!(!h.host.activate_power(uuid, bolt));
        let prints: Vec<RemotePrint> = h.drain().calls(conn);
        assert_eq!(prints[0].message, "You have no target.");

        let goblin = Uuid(2);
        let world = h.host.world_mut();
        world.characters.get_mut(&uuid).unwrap().target = Some(goblin);
        world.characters.get_mut(&uuid).unwrap().body.position = Vec3::new(40.0, 0.0, 40.0);
        assert!(!h.host.activate_power(uuid, bolt));

        h.host.world_mut().characters.get_mut(&uuid).unwrap().body.position =
            Vec3::new(-5.0, 0.0, 8.0);
        let before = h.host.world().characters[&goblin].health;
        assert!(h.host.activate_power(uuid, bolt));
        assert!(h.host.world().characters[&goblin].health < before);
    }

    #[test]
    fn foreign_powers_are_ignored() {
        let mut h = Harness::new();
        let (_, a) = h.login("A");
        let (conn_b, b) = h.login("B");
        let mend_a = power_of(&h, a, 2);
        h.send(conn_b, &RequestUsePower { power: mend_a });
        assert_eq!(h.host.world().characters[&b].combat.gcd, 0.0);
        assert_eq!(h.host.world().characters[&a].combat.gcd, 0.0);
    }
}
