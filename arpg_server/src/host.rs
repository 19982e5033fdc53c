//! The authoritative host.
//!
//! `Host` is the explicit context every handler and tick runs against. It owns
//! the RPC endpoint, the world registry, templates and the combat RNG. The
//! gameplay systems live in sibling modules as further `impl Host` blocks.
//!
//! Determinism notes:
//! - All world mutation happens inside `step()` and the RPC handlers it drives.
//! - Collections are ordered maps so iteration order is stable.
//! - Randomness only comes from `rng`, which can be seeded from config.

use std::collections::BTreeSet;

use anyhow::Context;
use arpg_shared::{
    character::Character,
    codec::WireState,
    config::GameConfig,
    net::{ConnectionId, PeerEvent, Transport},
    protocol::{
        register_payload_types, RemoteKill, RemotePrint, RequestEnterWorld, RequestJump,
        RequestMove, RequestMoveItem, RequestSetTarget, RequestToggleCombat, RequestUsePower,
        SpawnNpc,
    },
    registry::Uuid,
    rpc::{Dispatcher, Endpoint, RemoteCall},
    scheduler::{Phase, Scheduler},
    states::LoginState,
    templates::{TemplateStore, ZoneTemplate, NPC_COLOR},
};
use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, info};

use crate::world::HostWorld;

pub struct Host<T: Transport> {
    pub(crate) endpoint: Endpoint<T>,
    pub(crate) world: HostWorld,
    pub(crate) templates: TemplateStore,
    pub(crate) cfg: GameConfig,
    pub(crate) zone: ZoneTemplate,
    pub(crate) rng: StdRng,
    /// Connections that already asked to enter the world.
    pub(crate) entered: BTreeSet<ConnectionId>,
    scheduler: Scheduler,
}

impl<T: Transport> Host<T> {
    /// Loads `cfg.zone` from `templates` and spawns its NPC roster.
    pub fn new(transport: T, cfg: GameConfig, templates: TemplateStore) -> anyhow::Result<Self> {
        let zone = templates
            .zone(&cfg.zone)
            .cloned()
            .with_context(|| format!("unknown zone {}", cfg.zone))?;

        let mut endpoint = Endpoint::new(transport);
        register_payload_types(endpoint.types_mut());

        let rng = match cfg.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let scheduler = Scheduler::new(cfg.physics_hz, cfg.combat_hz, cfg.net_hz);

        let mut host = Self {
            endpoint,
            world: HostWorld::new(zone.collision_world()),
            templates,
            cfg,
            zone,
            rng,
            entered: BTreeSet::new(),
            scheduler,
        };
        host.spawn_zone_npcs();
        info!(
            zone = %host.zone.id,
            npcs = host.world.characters.len(),
            "Zone loaded"
        );
        Ok(host)
    }

    fn spawn_zone_npcs(&mut self) {
        for spawn in self.zone.npcs.clone() {
            let uuid = self.world.next_uuid();
            let login = LoginState::populate(&spawn.attrs);
            let mut npc = Character::from_login(uuid, &login, &self.cfg.movement);
            if !spawn.attrs.contains_key("color") {
                npc.color = NPC_COLOR;
            }
            npc.body.position = spawn.position;
            npc.body.rotation = spawn.rotation;
            debug!(uuid = %uuid, name = %npc.name, "Spawned zone NPC");
            self.world.insert_character(npc, &self.cfg.movement);
        }
    }

    pub fn world(&self) -> &HostWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut HostWorld {
        &mut self.world
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn config(&self) -> &GameConfig {
        &self.cfg
    }

    pub fn zone(&self) -> &ZoneTemplate {
        &self.zone
    }

    pub fn endpoint(&self) -> &Endpoint<T> {
        &self.endpoint
    }

    pub fn endpoint_mut(&mut self) -> &mut Endpoint<T> {
        &mut self.endpoint
    }

    /// Handler table for every client → host call.
    pub fn build_dispatcher() -> Dispatcher<Self>
    where
        T: 'static,
    {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .on::<RequestEnterWorld>(Self::on_enter_world)
            .on::<RequestMove>(Self::on_request_move)
            .on::<RequestJump>(Self::on_request_jump)
            .on::<RequestToggleCombat>(Self::on_toggle_combat)
            .on::<RequestSetTarget>(Self::on_set_target)
            .on::<RequestUsePower>(Self::on_use_power)
            .on::<RequestMoveItem>(Self::on_move_item);
        dispatcher
    }

    /// Feeds one transport event through the host.
    pub fn handle_event(&mut self, dispatcher: &Dispatcher<Self>, event: PeerEvent)
    where
        T: 'static,
    {
        match event {
            PeerEvent::Connected(conn) => {
                info!(conn = ?conn, "Client connected");
            }
            PeerEvent::Message {
                conn,
                frame,
                received_at,
            } => {
                dispatcher.dispatch(self, conn, received_at, frame);
            }
            PeerEvent::Disconnected(conn) => self.on_disconnected(conn),
        }
    }

    /// Destroys the connection's character, if any, and tells everyone.
    pub fn on_disconnected(&mut self, conn: ConnectionId) {
        self.entered.remove(&conn);
        let Some(uuid) = self.world.character_of(conn) else {
            info!(conn = ?conn, "Client left before entering the world");
            return;
        };
        self.world.destroy_character(uuid);
        self.endpoint.broadcast(&RemoteKill { uuid });
        info!(conn = ?conn, uuid = %uuid, "Client disconnected");
    }

    /// Runs every tick due after `frame_dt` seconds, in phase order.
    pub fn step(&mut self, frame_dt: f64) {
        for tick in self.scheduler.advance(frame_dt) {
            match tick.phase {
                Phase::Physics => self.physics_tick(tick.dt as f32),
                Phase::Combat => self.combat_tick(tick.dt),
                Phase::NetFlush => self.flush(),
            }
        }
    }

    /// One combat tick: attacks, powers, effects, regeneration, deaths.
    pub fn combat_tick(&mut self, dt: f64) {
        self.attacks_tick(dt);
        self.powers_tick(dt);
        self.effects_tick(dt);
        self.regen_tick(dt);
        self.death_check();
    }

    fn regen_tick(&mut self, dt: f64) {
        let rate = self.cfg.energy_regen_per_sec;
        let mut changed = Vec::new();
        for c in self.world.characters.values_mut() {
            if !c.alive {
                continue;
            }
            if c.energy >= c.max_energy {
                c.energy_carry = 0.0;
                continue;
            }
            c.energy_carry += rate * dt;
            let whole = (c.energy_carry + 1e-9).floor();
            if whole >= 1.0 {
                c.energy_carry -= whole;
                c.energy = (c.energy + whole as i32).min(c.max_energy);
                changed.push(c.uuid);
            }
        }
        for uuid in changed {
            self.world.mark_dirty(uuid);
        }
    }

    /// Destroys every character at or below zero health.
    pub fn death_check(&mut self) {
        let dead: Vec<Uuid> = self
            .world
            .characters
            .values()
            .filter(|c| c.health <= 0)
            .map(|c| c.uuid)
            .collect();
        for uuid in dead {
            if let Some(c) = self.world.characters.get_mut(&uuid) {
                c.alive = false;
                info!(uuid = %uuid, name = %c.name, "Character died");
            }
            self.world.destroy_character(uuid);
            self.endpoint.broadcast(&RemoteKill { uuid });
        }
    }

    /// Sends `rpc` to the client owning `uuid`. NPCs have nobody to send to.
    pub(crate) fn send_to<R: RemoteCall>(&mut self, uuid: Uuid, rpc: &R) {
        match self.world.conns.conn_of(uuid) {
            Some(conn) => self.endpoint.call(conn, rpc),
            None => debug!(uuid = %uuid, rpc = R::NAME, "No connection to send to"),
        }
    }

    /// Sends `rpc` to every in-world client except the owner of `except`.
    pub(crate) fn broadcast_world<R: RemoteCall>(&mut self, rpc: &R, except: Option<Uuid>) {
        for (conn, uuid) in self.world.conns.pairs() {
            if Some(uuid) != except {
                self.endpoint.call(conn, rpc);
            }
        }
    }

    pub(crate) fn print(&mut self, uuid: Uuid, message: impl Into<String>) {
        let message = message.into();
        debug!(uuid = %uuid, %message, "Print");
        self.send_to(uuid, &RemotePrint { message });
    }

    pub(crate) fn spawn_npc_message(c: &Character) -> SpawnNpc {
        SpawnNpc {
            uuid: c.uuid,
            color: c.color,
            combat: c.npc_state(),
            physical: c.physical_state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use arpg_shared::{net::MemoryTransport, templates::DEFAULT_ZONE};

    use super::*;
    use crate::test_support::Harness;

    #[test]
    fn zone_npcs_spawn_with_login_fallbacks() {
        let h = Harness::new();
        let world = h.host.world();
        assert_eq!(world.characters.len(), 2);

        let dummy = &world.characters[&Uuid(1)];
        assert_eq!(dummy.name, "Training Dummy");
        assert_eq!((dummy.health, dummy.max_health), (500, 500));
        assert_eq!(dummy.color, NPC_COLOR);
        assert_eq!(dummy.strength, 5);

        let goblin = &world.characters[&Uuid(2)];
        assert_eq!(goblin.armor, 3);
        assert_ne!(goblin.color, NPC_COLOR);
        assert!(world.conns.is_empty());
    }

    #[test]
    fn unknown_zone_fails_startup() {
        let cfg = GameConfig {
            zone: "nowhere".into(),
            ..Default::default()
        };
        let err = Host::new(MemoryTransport::host(), cfg, TemplateStore::builtin())
            .err()
            .unwrap();
        assert!(err.to_string().contains("nowhere"));
        assert!(TemplateStore::builtin().zone(DEFAULT_ZONE).is_some());
    }

    #[test]
    fn death_check_destroys_and_broadcasts_kill() {
        let mut h = Harness::new();
        let (a, ua) = h.login("Doomed");
        let (b, ub) = h.login("Witness");
        h.host.world_mut().characters.get_mut(&ub).unwrap().target = Some(ua);
        h.host.world_mut().characters.get_mut(&ua).unwrap().health = 5;
        h.drain();

        h.host.world_mut().characters.get_mut(&ua).unwrap().health -= 8;
        assert_eq!(h.host.world().characters[&ua].health, -3);
        h.host.combat_tick(0.1);

        assert!(!h.host.world().characters.contains_key(&ua));
        assert_eq!(h.host.world().characters[&ub].target, None);
        let sent = h.drain();
        let kill = RemoteKill { uuid: ua };
        assert_eq!(sent.calls::<RemoteKill>(a), vec![kill.clone()]);
        assert_eq!(sent.calls::<RemoteKill>(b), vec![kill]);
    }

    #[test]
    fn step_runs_phases_from_frame_time() {
        let mut h = Harness::new();
        let (conn, uuid) = h.login("Stepper");
        h.host.world_mut().characters.get_mut(&uuid).unwrap().energy = 0;
        h.drain();
        // One second: 60 physics, 10 combat and 20 flush ticks.
        for _ in 0..10 {
            h.host.step(0.1);
        }
        let energy = h.host.world().characters[&uuid].energy;
        assert_eq!(energy, 2);
        let names = h.drain().names(conn);
        assert!(names.iter().any(|n| n == "update_pc_cbstate"));
    }

    #[test]
    fn regen_carries_fractions() {
        let mut h = Harness::new();
        let (_, uuid) = h.login("Ysolde");
        h.host.world_mut().characters.get_mut(&uuid).unwrap().energy = 10;
        // 2 energy/s at 0.1 s ticks: one point every five ticks.
        for _ in 0..4 {
            h.host.combat_tick(0.1);
        }
        assert_eq!(h.host.world().characters[&uuid].energy, 10);
        h.host.combat_tick(0.1);
        assert_eq!(h.host.world().characters[&uuid].energy, 11);
        assert!(h.host.world().dirty.contains(&uuid));
    }
}
