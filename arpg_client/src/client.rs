//! Client implementation.
//!
//! `Client` is the explicit context every host → client handler runs
//! against. It keeps:
//! - The local registry of characters, containers, items and powers
//! - Prediction of the player's own movement, reconciled on host echoes
//! - Interpolation buffers for every observed character
//! - The sampled input for the next physics tick

use std::time::Instant;

use arpg_shared::{
    character::Character,
    codec::WireState,
    config::GameConfig,
    items::ContainerKind,
    math::wrap_degrees,
    movement::{integrate, start_jump, SERVER_OFFSET},
    net::{ConnectionId, PeerEvent, Transport},
    protocol::{
        register_payload_types, LoadZone, RemoteAddItem, RemoteAddPower, RemoteKill,
        RemotePrint, RemoteUpdateContainer, RequestEnterWorld, RequestJump, RequestMoveItem,
        RequestSetTarget, RequestToggleCombat, RequestUsePower, SpawnNpc, SpawnPc,
        UpdateNpcCbState, UpdateNpcLerpAttrs, UpdateNpcMoving, UpdatePcCbState,
        UpdatePcLerpAttrs, UpdatePcSkill,
    },
    registry::{InstanceId, Uuid},
    rpc::{Dispatcher, Endpoint, RemoteCall},
    scheduler::{Phase, Scheduler},
    templates::TemplateStore,
};
use tracing::{debug, info, warn};

use crate::{
    input::{build_request, InputState},
    interp::ObserverBuffer,
    prediction::PredictionBuffer,
    world::ClientWorld,
};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Connected, not yet asked to enter the world.
    Connected,
    /// `request_enter_world` sent, waiting for the player spawn.
    Entering,
    /// The player character exists.
    InWorld,
    /// The player character was killed.
    Dead,
    /// The host went away.
    Disconnected,
}

pub struct Client<T: Transport> {
    endpoint: Endpoint<T>,
    world: ClientWorld,
    prediction: PredictionBuffer,
    cfg: GameConfig,
    templates: TemplateStore,
    scheduler: Scheduler,
    state: ClientState,
    input: InputState,
    jump_requested: bool,
}

impl<T: Transport> Client<T> {
    /// Wraps a transport already connected to the host.
    pub fn new(transport: T, cfg: GameConfig, templates: TemplateStore) -> Self {
        let mut endpoint = Endpoint::new(transport);
        register_payload_types(endpoint.types_mut());
        let scheduler = Scheduler::new(cfg.physics_hz, 0, 0);
        Self {
            endpoint,
            world: ClientWorld::default(),
            prediction: PredictionBuffer::default(),
            cfg,
            templates,
            scheduler,
            state: ClientState::Connected,
            input: InputState::default(),
            jump_requested: false,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn world(&self) -> &ClientWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut ClientWorld {
        &mut self.world
    }

    pub fn prediction(&self) -> &PredictionBuffer {
        &self.prediction
    }

    pub fn config(&self) -> &GameConfig {
        &self.cfg
    }

    pub fn endpoint(&self) -> &Endpoint<T> {
        &self.endpoint
    }

    pub fn endpoint_mut(&mut self) -> &mut Endpoint<T> {
        &mut self.endpoint
    }

    /// Handler table for every host → client call.
    pub fn build_dispatcher() -> Dispatcher<Self>
    where
        T: 'static,
    {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .on::<LoadZone>(Self::on_load_zone)
            .on::<SpawnPc>(Self::on_spawn_pc)
            .on::<SpawnNpc>(Self::on_spawn_npc)
            .on::<RemoteKill>(Self::on_remote_kill)
            .on::<RemotePrint>(Self::on_remote_print)
            .on::<UpdatePcCbState>(Self::on_update_pc_cbstate)
            .on::<UpdateNpcCbState>(Self::on_update_npc_cbstate)
            .on::<UpdatePcLerpAttrs>(Self::on_update_pc_lerp_attrs)
            .on::<UpdateNpcLerpAttrs>(Self::on_update_npc_lerp_attrs)
            .on::<UpdateNpcMoving>(Self::on_update_npc_moving)
            .on::<UpdatePcSkill>(Self::on_update_pc_skill)
            .on::<RemoteAddItem>(Self::on_remote_add_item)
            .on::<RemoteAddPower>(Self::on_remote_add_power)
            .on::<RemoteUpdateContainer>(Self::on_remote_update_container);
        dispatcher
    }

    /// Feeds one transport event through the client.
    pub fn handle_event(&mut self, dispatcher: &Dispatcher<Self>, event: PeerEvent)
    where
        T: 'static,
    {
        match event {
            PeerEvent::Connected(_) => {
                info!("Connected to host");
            }
            PeerEvent::Message {
                conn,
                frame,
                received_at,
            } => {
                dispatcher.dispatch(self, conn, received_at, frame);
            }
            PeerEvent::Disconnected(_) => self.on_host_lost(),
        }
    }

    /// The host is gone: forget every character.
    pub fn on_host_lost(&mut self) {
        info!(characters = self.world.characters.len(), "Host disconnected");
        self.world.clear();
        self.world.zone = None;
        self.prediction.reset();
        self.state = ClientState::Disconnected;
    }

    fn send<R: RemoteCall>(&mut self, rpc: &R) {
        self.endpoint.call(ConnectionId::HOST, rpc);
    }

    fn in_world(&self, what: &str) -> bool {
        if self.state == ClientState::InWorld {
            return true;
        }
        debug!(state = ?self.state, request = what, "Request outside the world ignored");
        false
    }

    /// Asks the host for a character built from the configured login.
    pub fn enter_world(&mut self) {
        if self.state != ClientState::Connected {
            warn!(state = ?self.state, "Enter-world already requested");
            return;
        }
        let login = self.cfg.login_state();
        info!(name = %login.name, "Entering world");
        self.send(&RequestEnterWorld { login });
        self.state = ClientState::Entering;
    }

    /// Input used by the following physics ticks.
    pub fn set_input(&mut self, input: InputState) {
        self.input = input;
    }

    /// Jumps on the next physics tick.
    pub fn jump(&mut self) {
        self.jump_requested = true;
    }

    pub fn toggle_combat(&mut self) {
        if self.in_world("toggle_combat") {
            self.send(&RequestToggleCombat {});
        }
    }

    pub fn set_target(&mut self, target: Option<Uuid>) {
        if self.in_world("set_target") {
            self.send(&RequestSetTarget { target });
        }
    }

    pub fn use_power(&mut self, power: InstanceId) {
        if self.in_world("use_power") {
            self.send(&RequestUsePower { power });
        }
    }

    pub fn move_item(&mut self, item: InstanceId, to_container: InstanceId, to_slot: u32) {
        if self.in_world("move_item") {
            self.send(&RequestMoveItem {
                item,
                to_container,
                to_slot,
            });
        }
    }

    /// Runs every physics tick due after `frame_dt` seconds, then moves
    /// observers to where they should be drawn at `now`.
    pub fn step(&mut self, frame_dt: f64, now: Instant) {
        for tick in self.scheduler.advance(frame_dt) {
            if tick.phase == Phase::Physics {
                self.physics_tick(tick.dt as f32);
            }
        }
        self.interpolate_observers(now);
    }

    fn physics_dt(&self) -> f32 {
        1.0 / self.cfg.physics_hz.max(1) as f32
    }

    /// Predicts one step of the player's movement and sends it to the host.
    pub fn physics_tick(&mut self, dt: f32) {
        if self.state != ClientState::InWorld {
            return;
        }
        let Some(uuid) = self.world.player else {
            return;
        };
        let input = self.input.move_input();
        self.input.mouse_yaw = 0.0;
        let jump = std::mem::take(&mut self.jump_requested);

        let world = &mut self.world;
        let cfg = &self.cfg.movement;
        let Some(c) = world.characters.get_mut(&uuid) else {
            return;
        };
        let jumped = jump && start_jump(&mut c.body.motion, cfg);
        let moved = integrate(
            &mut c.body,
            &input,
            c.speed,
            cfg,
            &world.collision,
            Some(uuid),
            dt,
        );
        if moved {
            world.collision.set_body(uuid, c.body.bounds(cfg));
        }
        let seq = self.prediction.record(c.body.position, c.body.rotation);

        if jumped {
            self.send(&RequestJump {});
        }
        self.send(&build_request(seq, &input));
    }

    fn interpolate_observers(&mut self, now: Instant) {
        let world = &mut self.world;
        for (uuid, buf) in &world.observers {
            if let Some(c) = world.characters.get_mut(uuid) {
                let (position, rotation) = buf.sample(now);
                c.body.position = position;
                c.body.rotation = rotation;
            }
        }
    }

    fn on_load_zone(&mut self, _conn: ConnectionId, _at: Instant, rpc: LoadZone) {
        match self.templates.zone(&rpc.zone) {
            Some(zone) => {
                self.world.collision = zone.collision_world();
                info!(zone = %zone.id, name = %zone.name, "Zone loaded");
            }
            None => warn!(zone = %rpc.zone, "Unknown zone, keeping current collision"),
        }
        self.world.zone = Some(rpc.zone);
    }

    fn on_spawn_pc(&mut self, _conn: ConnectionId, _at: Instant, rpc: SpawnPc) {
        let mut c = Character::new(rpc.uuid, &self.cfg.movement);
        c.color = rpc.color;
        rpc.combat.apply(&mut c);
        rpc.physical.apply(&mut c);
        rpc.skills.apply(&mut c.skills);
        c.equipment = Some(rpc.equipment);
        c.inventory = Some(rpc.inventory);
        c.powers = rpc.powers;

        self.world
            .track_container(rpc.equipment, ContainerKind::Equipment, rpc.uuid);
        self.world
            .track_container(rpc.inventory, ContainerKind::Inventory, rpc.uuid);
        info!(uuid = %rpc.uuid, name = %c.name, "Player spawned");
        self.world.insert(c, &self.cfg.movement);
        self.world.player = Some(rpc.uuid);
        self.prediction.reset();
        self.state = ClientState::InWorld;
    }

    fn on_spawn_npc(&mut self, _conn: ConnectionId, at: Instant, rpc: SpawnNpc) {
        let mut c = Character::new(rpc.uuid, &self.cfg.movement);
        c.mirror = true;
        c.color = rpc.color;
        rpc.combat.apply(&mut c);
        rpc.physical.apply(&mut c);
        let buf = ObserverBuffer::new(c.body.position, c.body.rotation, at);
        debug!(uuid = %rpc.uuid, name = %c.name, "Observer spawned");
        self.world.insert(c, &self.cfg.movement);
        self.world.observers.insert(rpc.uuid, buf);
    }

    fn on_remote_kill(&mut self, _conn: ConnectionId, _at: Instant, rpc: RemoteKill) {
        let was_player = self.world.player == Some(rpc.uuid);
        if let Some(c) = self.world.remove(rpc.uuid) {
            info!(uuid = %rpc.uuid, name = %c.name, "Character removed");
        }
        if was_player {
            self.prediction.reset();
            self.state = ClientState::Dead;
        }
    }

    fn on_remote_print(&mut self, _conn: ConnectionId, _at: Instant, rpc: RemotePrint) {
        info!(message = %rpc.message, "Host message");
        self.world.push_message(rpc.message);
    }

    fn on_update_pc_cbstate(&mut self, _conn: ConnectionId, _at: Instant, rpc: UpdatePcCbState) {
        if self.world.player != Some(rpc.uuid) {
            debug!(uuid = %rpc.uuid, "Owner state for a character we do not own");
            return;
        }
        if let Some(c) = self.world.player_mut() {
            rpc.state.apply(c);
        }
    }

    fn on_update_npc_cbstate(&mut self, _conn: ConnectionId, _at: Instant, rpc: UpdateNpcCbState) {
        match self.world.characters.get_mut(&rpc.uuid) {
            Some(c) => rpc.state.apply(c),
            None => debug!(uuid = %rpc.uuid, "State for unknown character"),
        }
    }

    fn on_update_pc_lerp_attrs(&mut self, _conn: ConnectionId, _at: Instant, rpc: UpdatePcLerpAttrs) {
        let Some(correction) = self
            .prediction
            .reconcile(rpc.seq, rpc.position, rpc.rotation)
        else {
            return;
        };
        if correction.is_zero() {
            return;
        }
        debug!(seq = rpc.seq, delta = ?correction.position, "Prediction corrected");
        let dt = self.physics_dt();
        if let Some(c) = self.world.player_mut() {
            let offset = c.body.velocity.get(SERVER_OFFSET) + correction.position * (1.0 / dt);
            c.body.velocity.set(SERVER_OFFSET, offset);
            c.body.rotation += correction.rotation;
            c.body.rotation.y = wrap_degrees(c.body.rotation.y);
        }
    }

    fn on_update_npc_lerp_attrs(&mut self, _conn: ConnectionId, at: Instant, rpc: UpdateNpcLerpAttrs) {
        let Some(c) = self.world.characters.get(&rpc.uuid) else {
            debug!(uuid = %rpc.uuid, "Transform for unknown character");
            return;
        };
        let mut authoritative = c.body.clone();
        authoritative.position = rpc.position;
        let bounds = authoritative.bounds(&self.cfg.movement);
        self.world.collision.set_body(rpc.uuid, bounds);
        self.world
            .observers
            .entry(rpc.uuid)
            .and_modify(|buf| buf.push(rpc.position, rpc.rotation, at))
            .or_insert_with(|| ObserverBuffer::new(rpc.position, rpc.rotation, at));
    }

    fn on_update_npc_moving(&mut self, _conn: ConnectionId, _at: Instant, rpc: UpdateNpcMoving) {
        debug!(uuid = %rpc.uuid, moving = rpc.moving, "Animation trigger");
        self.world.moving.insert(rpc.uuid, rpc.moving);
    }

    fn on_update_pc_skill(&mut self, _conn: ConnectionId, _at: Instant, rpc: UpdatePcSkill) {
        if let Some(c) = self.world.player_mut() {
            info!(skill = %rpc.skill, level = rpc.level, "Skill up");
            c.skills.insert(rpc.skill, rpc.level);
        }
    }

    fn on_remote_add_item(&mut self, _conn: ConnectionId, _at: Instant, rpc: RemoteAddItem) {
        self.world.items.insert(rpc.item, rpc.template);
    }

    fn on_remote_add_power(&mut self, _conn: ConnectionId, _at: Instant, rpc: RemoteAddPower) {
        self.world.powers.insert(rpc.power, rpc.template);
    }

    fn on_remote_update_container(
        &mut self,
        _conn: ConnectionId,
        _at: Instant,
        rpc: RemoteUpdateContainer,
    ) {
        match self.world.containers.get_mut(&rpc.container) {
            Some(container) => container.slots = rpc.items,
            None => debug!(container = %rpc.container, "Update for untracked container"),
        }
    }
}
