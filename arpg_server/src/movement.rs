//! Authoritative movement.
//!
//! Clients send one `request_move` per predicted physics tick. The host queues
//! them, integrates each in order with the same step the client ran, and on
//! the flush tick echoes the last integrated sequence number back.

use std::time::Instant;

use arpg_shared::{
    movement::{integrate, start_jump, MoveInput},
    net::{ConnectionId, Transport},
    protocol::{
        RequestJump, RequestMove, UpdateNpcCbState, UpdateNpcLerpAttrs, UpdateNpcMoving,
        UpdatePcCbState, UpdatePcLerpAttrs,
    },
    registry::Uuid,
};
use tracing::debug;

use crate::host::Host;
use crate::world::PendingInput;

/// Queued inputs integrated per character per physics tick. The rest waits.
pub const MAX_INPUTS_PER_TICK: usize = 8;

impl<T: Transport> Host<T> {
    pub(crate) fn on_request_move(&mut self, conn: ConnectionId, _at: Instant, rpc: RequestMove) {
        let Some(uuid) = self.world.character_of(conn) else {
            debug!(conn = ?conn, "Move from connection without a character");
            return;
        };
        let Some(state) = self.world.movement.get_mut(&uuid) else {
            return;
        };
        if rpc.seq <= state.newest_seq() {
            debug!(uuid = %uuid, seq = rpc.seq, "Stale move dropped");
            return;
        }
        state.queue.push_back(PendingInput::Move {
            seq: rpc.seq,
            input: MoveInput {
                kb_dir: rpc.kb_dir,
                kb_y_rot: rpc.kb_y_rot,
                mouse_y_rot: rpc.mouse_y_rot,
            },
        });
    }

    pub(crate) fn on_request_jump(&mut self, conn: ConnectionId, _at: Instant, _rpc: RequestJump) {
        let Some(uuid) = self.world.character_of(conn) else {
            return;
        };
        if let Some(state) = self.world.movement.get_mut(&uuid) {
            state.queue.push_back(PendingInput::Jump);
        }
    }

    /// Integrates queued player input and settles NPCs.
    pub fn physics_tick(&mut self, dt: f32) {
        let uuids: Vec<Uuid> = self.world.characters.keys().copied().collect();
        for uuid in uuids {
            if self.world.conns.conn_of(uuid).is_some() {
                self.integrate_queued(uuid, dt);
            } else {
                self.integrate_step(uuid, &MoveInput::default(), dt);
            }
        }
    }

    fn integrate_queued(&mut self, uuid: Uuid, dt: f32) {
        let mut moves = 0;
        while moves < MAX_INPUTS_PER_TICK {
            let Some(state) = self.world.movement.get_mut(&uuid) else {
                return;
            };
            let Some(next) = state.queue.pop_front() else {
                return;
            };
            match next {
                PendingInput::Jump => {
                    let cfg = &self.cfg.movement;
                    if let Some(c) = self.world.characters.get_mut(&uuid) {
                        start_jump(&mut c.body.motion, cfg);
                    }
                }
                PendingInput::Move { seq, input } => {
                    state.last_seq = seq;
                    self.integrate_step(uuid, &input, dt);
                    moves += 1;
                }
            }
        }
    }

    fn integrate_step(&mut self, uuid: Uuid, input: &MoveInput, dt: f32) {
        let world = &mut self.world;
        let cfg = &self.cfg.movement;
        let Some(c) = world.characters.get_mut(&uuid) else {
            return;
        };
        let rotation = c.body.rotation;
        let moved = integrate(
            &mut c.body,
            input,
            c.speed,
            cfg,
            &world.collision,
            Some(uuid),
            dt,
        );
        let turned = c.body.rotation != rotation;
        if moved {
            world.collision.set_body(uuid, c.body.bounds(cfg));
        }
        if let Some(state) = world.movement.get_mut(&uuid) {
            state.moved |= moved;
            state.changed |= moved || turned;
        }
    }

    /// Network flush: transforms, moving flags, then dirty combat states.
    pub fn flush(&mut self) {
        self.flush_movement();
        self.flush_combat_states();
    }

    fn flush_movement(&mut self) {
        let uuids: Vec<Uuid> = self.world.movement.keys().copied().collect();
        for uuid in uuids {
            let Some(c) = self.world.characters.get(&uuid) else {
                continue;
            };
            let (position, rotation) = (c.body.position, c.body.rotation);
            let Some(state) = self.world.movement.get_mut(&uuid) else {
                continue;
            };
            let echo = state.changed || state.last_seq != state.acked_seq;
            let changed = std::mem::take(&mut state.changed);
            let moved = std::mem::take(&mut state.moved);
            let seq = state.last_seq;
            state.acked_seq = seq;
            let toggled = state.moving != moved;
            state.moving = moved;

            if echo && self.world.conns.conn_of(uuid).is_some() {
                self.send_to(
                    uuid,
                    &UpdatePcLerpAttrs {
                        seq,
                        position,
                        rotation,
                    },
                );
            }
            if changed {
                self.broadcast_world(
                    &UpdateNpcLerpAttrs {
                        uuid,
                        position,
                        rotation,
                    },
                    Some(uuid),
                );
            }
            if toggled {
                self.broadcast_world(&UpdateNpcMoving { uuid, moving: moved }, Some(uuid));
            }
        }
    }

    fn flush_combat_states(&mut self) {
        for uuid in std::mem::take(&mut self.world.dirty) {
            let Some(c) = self.world.characters.get(&uuid) else {
                continue;
            };
            let pc = UpdatePcCbState {
                uuid,
                state: c.pc_state(),
            };
            let npc = UpdateNpcCbState {
                uuid,
                state: c.npc_state(),
            };
            self.send_to(uuid, &pc);
            self.broadcast_world(&npc, Some(uuid));
        }
    }
}

#[cfg(test)]
mod tests {
    use arpg_shared::{
        math::Vec3,
        movement::{Body, MovementConfig},
        protocol::{RequestMove, UpdateNpcLerpAttrs, UpdateNpcMoving, UpdatePcLerpAttrs},
    };

    use super::*;
    use crate::test_support::Harness;

    fn step_input(seq: u32, x: f32) -> RequestMove {
        RequestMove {
            seq,
            kb_dir: Vec3::new(x, 0.0, 0.0),
            kb_y_rot: 0.0,
            mouse_y_rot: 0.0,
        }
    }

    #[test]
    fn host_matches_a_local_replay_of_the_same_inputs() {
        let mut h = Harness::new();
        let (conn, uuid) = h.login("Runner");
        h.drain();

        let dt = 1.0 / 60.0;
        let cfg = MovementConfig::default();
        let start = h.host.world().characters[&uuid].body.clone();
        let mut local: Body = start;
        for seq in 1..=5 {
            h.send(conn, &step_input(seq, 1.0));
            h.host.physics_tick(dt);
            integrate(
                &mut local,
                &MoveInput {
                    kb_dir: Vec3::new(1.0, 0.0, 0.0),
                    ..Default::default()
                },
                0,
                &cfg,
                &h.host.world().collision,
                Some(uuid),
                dt,
            );
        }
        let host_pos = h.host.world().characters[&uuid].body.position;
        assert!((host_pos - local.position).len() < 1e-5);
        assert!(host_pos.x > 0.3);

        h.host.flush();
        let sent = h.drain();
        let echo: Vec<UpdatePcLerpAttrs> = sent.calls(conn);
        assert_eq!(echo.len(), 1);
        assert_eq!(echo[0].seq, 5);
        assert_eq!(echo[0].position, host_pos);
    }

    #[test]
    fn stale_and_duplicate_sequence_numbers_are_dropped() {
        let mut h = Harness::new();
        let (conn, uuid) = h.login("Runner");
        h.send(conn, &step_input(3, 1.0));
        h.send(conn, &step_input(3, 1.0));
        h.send(conn, &step_input(2, 1.0));
        h.send(conn, &step_input(4, 1.0));
        assert_eq!(h.host.world().movement[&uuid].queue.len(), 2);
        h.host.physics_tick(1.0 / 60.0);
        assert_eq!(h.host.world().movement[&uuid].last_seq, 4);
    }

    #[test]
    fn input_backlog_is_capped_per_tick() {
        let mut h = Harness::new();
        let (conn, uuid) = h.login("Runner");
        for seq in 1..=12 {
            h.send(conn, &step_input(seq, 1.0));
        }
        h.host.physics_tick(1.0 / 60.0);
        let state = &h.host.world().movement[&uuid];
        assert_eq!(state.last_seq, MAX_INPUTS_PER_TICK as u32);
        assert_eq!(state.queue.len(), 12 - MAX_INPUTS_PER_TICK);
    }

    #[test]
    fn observers_get_transforms_and_moving_flags() {
        let mut h = Harness::new();
        let (a, ua) = h.login("Runner");
        let (b, _) = h.login("Watcher");
        h.host.physics_tick(1.0 / 60.0);
        h.host.flush();
        h.drain();

        h.send(a, &step_input(1, 1.0));
        h.host.physics_tick(1.0 / 60.0);
        h.host.flush();
        let sent = h.drain();
        let lerp: Vec<UpdateNpcLerpAttrs> = sent.calls(b);
        assert_eq!(lerp.len(), 1);
        assert_eq!(lerp[0].uuid, ua);
        let moving: Vec<UpdateNpcMoving> = sent.calls(b);
        assert_eq!(moving, vec![UpdateNpcMoving { uuid: ua, moving: true }]);
        assert!(sent.calls::<UpdateNpcLerpAttrs>(a).is_empty());

        // Standing still flips the flag back once.
        h.host.flush();
        let sent = h.drain();
        let moving: Vec<UpdateNpcMoving> = sent.calls(b);
        assert_eq!(moving, vec![UpdateNpcMoving { uuid: ua, moving: false }]);
        h.host.flush();
        assert!(h.drain().calls::<UpdateNpcMoving>(b).is_empty());
    }

    #[test]
    fn jump_is_applied_before_the_next_move() {
        let mut h = Harness::new();
        let (conn, uuid) = h.login("Jumper");
        // Settle onto the ground first.
        h.send(conn, &step_input(1, 0.0));
        h.host.physics_tick(1.0 / 60.0);
        assert!(h.host.world().characters[&uuid].body.motion.grounded);

        h.send(conn, &RequestJump {});
        h.send(conn, &step_input(2, 0.0));
        h.host.physics_tick(1.0 / 60.0);
        let c = &h.host.world().characters[&uuid];
        assert!(c.body.motion.jumping);
        assert!(c.body.position.y > 0.0);
    }
}
