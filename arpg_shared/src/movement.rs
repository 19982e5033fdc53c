//! Deterministic character movement.
//!
//! Host and client run the same [`integrate`] step so that a client's
//! prediction matches the host's result for the same inputs.
//!
//! Per tick, in order:
//! - keyboard input sets yaw and the `keyboard` velocity component
//! - gravity accumulates while airborne and not jumping
//! - an active jump spends its remaining height
//! - grounding probe (landing clamps the fall onto the surface)
//! - swept collision along the summed velocity, sliding along walls
//! - ceiling check while moving up
//! - commit `position += v * dt`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::math::{wrap_degrees, Vec3};
use crate::registry::Uuid;
use crate::rules::speed_modifier;

/// Velocity component names.
pub const GRAVITY: &str = "gravity";
pub const JUMP: &str = "jump";
pub const KEYBOARD: &str = "keyboard";
pub const SERVER_OFFSET: &str = "server_offset";

/// Height above the feet that probes and sweeps start from. Ledges lower
/// than this are stepped over.
pub const STEP: f32 = 0.05;

const JUMP_EPS: f32 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementConfig {
    #[serde(default = "default_gravity")]
    pub gravity: f32,
    #[serde(default = "default_max_jump_height")]
    pub max_jump_height: f32,
    #[serde(default = "default_max_jump_time")]
    pub max_jump_time: f32,
    /// Units per second at speed rating 0.
    #[serde(default = "default_base_speed")]
    pub base_speed: f32,
    /// Degrees per second at full keyboard turn.
    #[serde(default = "default_turn_rate")]
    pub turn_rate: f32,
    /// Extra probe length below the feet when standing still vertically.
    #[serde(default = "default_ground_probe")]
    pub ground_probe: f32,
    #[serde(default = "default_head_height")]
    pub head_height: f32,
    #[serde(default = "default_chest_height")]
    pub chest_height: f32,
    #[serde(default = "default_body_radius")]
    pub body_radius: f32,
}

fn default_gravity() -> f32 {
    20.0
}

fn default_max_jump_height() -> f32 {
    1.5
}

fn default_max_jump_time() -> f32 {
    0.3
}

fn default_base_speed() -> f32 {
    5.0
}

fn default_turn_rate() -> f32 {
    180.0
}

fn default_ground_probe() -> f32 {
    0.1
}

fn default_head_height() -> f32 {
    1.8
}

fn default_chest_height() -> f32 {
    1.2
}

fn default_body_radius() -> f32 {
    0.4
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            gravity: default_gravity(),
            max_jump_height: default_max_jump_height(),
            max_jump_time: default_max_jump_time(),
            base_speed: default_base_speed(),
            turn_rate: default_turn_rate(),
            ground_probe: default_ground_probe(),
            head_height: default_head_height(),
            chest_height: default_chest_height(),
            body_radius: default_body_radius(),
        }
    }
}

/// One tick of player input.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MoveInput {
    /// Local-space direction; only x/z are used.
    pub kb_dir: Vec3,
    /// Keyboard turn in [-1, 1], scaled by the turn rate.
    pub kb_y_rot: f32,
    /// Mouse yaw in degrees, applied as-is.
    pub mouse_y_rot: f32,
}

/// Named velocity contributions, summed each tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VelocityComponents {
    parts: BTreeMap<String, Vec3>,
}

impl VelocityComponents {
    pub fn get(&self, name: &str) -> Vec3 {
        self.parts.get(name).copied().unwrap_or(Vec3::ZERO)
    }

    pub fn set(&mut self, name: &str, v: Vec3) {
        self.parts.insert(name.to_string(), v);
    }

    pub fn remove(&mut self, name: &str) {
        self.parts.remove(name);
    }

    pub fn sum(&self) -> Vec3 {
        self.parts.values().fold(Vec3::ZERO, |acc, v| acc + *v)
    }

    pub fn clear(&mut self) {
        self.parts.clear();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotionState {
    pub jumping: bool,
    pub remaining_jump_height: f32,
    pub jump_speed: f32,
    pub grounded: bool,
}

impl MotionState {
    pub fn new(cfg: &MovementConfig) -> Self {
        Self {
            jumping: false,
            remaining_jump_height: cfg.max_jump_height,
            jump_speed: 0.0,
            grounded: false,
        }
    }
}

/// Everything [`integrate`] reads and writes.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub position: Vec3,
    /// Euler degrees.
    pub rotation: Vec3,
    pub scale: Vec3,
    pub velocity: VelocityComponents,
    pub motion: MotionState,
}

impl Body {
    pub fn new(position: Vec3, rotation: Vec3, cfg: &MovementConfig) -> Self {
        Self {
            position,
            rotation,
            scale: Vec3::ONE,
            velocity: VelocityComponents::default(),
            motion: MotionState::new(cfg),
        }
    }

    pub fn chest(&self, cfg: &MovementConfig) -> Vec3 {
        self.position + Vec3::UP * cfg.chest_height
    }

    pub fn bounds(&self, cfg: &MovementConfig) -> Aabb {
        let r = cfg.body_radius;
        Aabb {
            min: self.position + Vec3::new(-r, 0.0, -r),
            max: self.position + Vec3::new(r, cfg.head_height, r),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub distance: f32,
    pub point: Vec3,
    pub normal: Vec3,
    /// Character hit, if any.
    pub entity: Option<Uuid>,
}

/// Scene query used by movement and line-of-sight checks.
pub trait Raycaster {
    /// First hit along `dir` within `max_distance`, skipping `ignore`.
    fn raycast(
        &self,
        origin: Vec3,
        dir: Vec3,
        max_distance: f32,
        ignore: Option<Uuid>,
    ) -> Option<RayHit>;
}

/// Axis-aligned box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Slab test. Rays starting inside the box do not hit it.
    pub fn raycast(&self, origin: Vec3, dir: Vec3, max_distance: f32) -> Option<(f32, Vec3)> {
        let o = [origin.x, origin.y, origin.z];
        let d = [dir.x, dir.y, dir.z];
        let lo = [self.min.x, self.min.y, self.min.z];
        let hi = [self.max.x, self.max.y, self.max.z];

        let mut t_enter = f32::NEG_INFINITY;
        let mut t_exit = f32::INFINITY;
        let mut axis = 0usize;
        let mut sign = 0.0f32;
        for i in 0..3 {
            if d[i].abs() < 1e-8 {
                if o[i] < lo[i] || o[i] > hi[i] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d[i];
            let (mut t0, mut t1) = ((lo[i] - o[i]) * inv, (hi[i] - o[i]) * inv);
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            // The entry face points back against the ray.
            let s = if d[i] < 0.0 { 1.0 } else { -1.0 };
            if t0 > t_enter {
                t_enter = t0;
                axis = i;
                sign = s;
            }
            t_exit = t_exit.min(t1);
        }
        if t_enter > t_exit || t_enter < 0.0 || t_enter > max_distance {
            return None;
        }
        let mut normal = [0.0f32; 3];
        normal[axis] = sign;
        Some((t_enter, Vec3::new(normal[0], normal[1], normal[2])))
    }
}

/// Ground plane, static boxes and character bodies.
#[derive(Debug, Clone, Default)]
pub struct CollisionWorld {
    pub ground: Option<f32>,
    pub boxes: Vec<Aabb>,
    bodies: BTreeMap<Uuid, Aabb>,
}

impl CollisionWorld {
    pub fn new(ground: Option<f32>, boxes: Vec<Aabb>) -> Self {
        Self {
            ground,
            boxes,
            bodies: BTreeMap::new(),
        }
    }

    pub fn set_body(&mut self, uuid: Uuid, bounds: Aabb) {
        self.bodies.insert(uuid, bounds);
    }

    pub fn remove_body(&mut self, uuid: Uuid) {
        self.bodies.remove(&uuid);
    }

    pub fn clear_bodies(&mut self) {
        self.bodies.clear();
    }
}

impl Raycaster for CollisionWorld {
    fn raycast(
        &self,
        origin: Vec3,
        dir: Vec3,
        max_distance: f32,
        ignore: Option<Uuid>,
    ) -> Option<RayHit> {
        let dir = dir.normalized();
        if dir.is_zero() {
            return None;
        }
        let mut best: Option<RayHit> = None;
        let mut consider = |distance: f32, normal: Vec3, entity: Option<Uuid>| {
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(RayHit {
                    distance,
                    point: origin + dir * distance,
                    normal,
                    entity,
                });
            }
        };

        if let Some(ground) = self.ground {
            if dir.y < 0.0 && origin.y >= ground {
                let t = (origin.y - ground) / -dir.y;
                if t <= max_distance {
                    consider(t, Vec3::UP, None);
                }
            }
        }
        for b in &self.boxes {
            if let Some((t, n)) = b.raycast(origin, dir, max_distance) {
                consider(t, n, None);
            }
        }
        for (uuid, b) in &self.bodies {
            if Some(*uuid) == ignore {
                continue;
            }
            if let Some((t, n)) = b.raycast(origin, dir, max_distance) {
                consider(t, n, Some(*uuid));
            }
        }
        best
    }
}

/// Begins a jump. Only allowed while grounded and not already jumping.
pub fn start_jump(motion: &mut MotionState, cfg: &MovementConfig) -> bool {
    if !motion.grounded || motion.jumping {
        return false;
    }
    motion.jumping = true;
    motion.remaining_jump_height = cfg.max_jump_height;
    motion.jump_speed = cfg.max_jump_height / cfg.max_jump_time;
    true
}

/// Ends a jump early. No-op when not jumping.
pub fn cancel_jump(motion: &mut MotionState, cfg: &MovementConfig) {
    if !motion.jumping {
        return;
    }
    motion.jumping = false;
    motion.remaining_jump_height = cfg.max_jump_height;
    motion.jump_speed = 0.0;
}

/// Advances one body by one tick. Returns true if its position changed.
pub fn integrate(
    body: &mut Body,
    input: &MoveInput,
    speed: i32,
    cfg: &MovementConfig,
    world: &dyn Raycaster,
    self_id: Option<Uuid>,
    dt: f32,
) -> bool {
    if dt <= 0.0 {
        return false;
    }

    let turn = input.kb_y_rot * cfg.turn_rate * dt + input.mouse_y_rot;
    body.rotation.y = wrap_degrees(body.rotation.y + turn);
    let flat = input.kb_dir.with_y(0.0).normalized();
    let keyboard = flat.rotate_yaw(body.rotation.y) * (cfg.base_speed * speed_modifier(speed));
    body.velocity.set(KEYBOARD, keyboard);

    let motion = &mut body.motion;
    if motion.grounded {
        body.velocity.set(GRAVITY, Vec3::ZERO);
    } else if !motion.jumping {
        let g = body.velocity.get(GRAVITY);
        body.velocity.set(GRAVITY, g.with_y(g.y - cfg.gravity * dt));
    }

    if motion.jumping {
        let mut speed = motion.jump_speed;
        let step = speed * dt;
        if motion.remaining_jump_height - step <= JUMP_EPS {
            speed = motion.remaining_jump_height.max(0.0) / dt;
            cancel_jump(motion, cfg);
        } else {
            motion.remaining_jump_height -= step;
        }
        body.velocity.set(JUMP, Vec3::UP * speed);
    } else {
        body.velocity.remove(JUMP);
    }

    let v_y = body.velocity.sum().y;
    let feet = body.position + Vec3::UP * STEP;
    if v_y > 0.0 {
        motion.grounded = false;
    } else if v_y == 0.0 {
        motion.grounded = world
            .raycast(feet, Vec3::DOWN, STEP + cfg.ground_probe, self_id)
            .is_some();
    } else {
        let fall = -v_y * dt;
        match world.raycast(feet, Vec3::DOWN, fall + STEP, self_id) {
            Some(hit) => {
                motion.grounded = true;
                let snap = -(hit.distance - STEP).max(0.0) / dt;
                let g = body.velocity.get(GRAVITY);
                let others = v_y - g.y;
                body.velocity.set(GRAVITY, g.with_y(snap - others));
            }
            None => motion.grounded = false,
        }
    }

    let mut v = body.velocity.sum();
    let speed_now = v.len();
    if speed_now > 0.0 {
        if let Some(hit) = world.raycast(feet, v, speed_now * dt, self_id) {
            if v.dot(hit.normal) < 0.0 {
                let slide = v.project_on_plane(hit.normal).normalized() * speed_now;
                let blocked = slide.is_zero()
                    || world
                        .raycast(feet, slide, slide.len() * dt, self_id)
                        .is_some();
                v = if blocked { Vec3::ZERO } else { slide };
            }
        }
    }

    if v.y > 0.0 {
        let head = body.position + Vec3::UP * cfg.head_height;
        if world.raycast(head, Vec3::UP, v.y * dt, self_id).is_some() {
            v.y = 0.0;
        }
    }

    body.velocity.remove(SERVER_OFFSET);
    let before = body.position;
    body.position += v * dt;
    body.position != before
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_world() -> CollisionWorld {
        CollisionWorld::new(Some(0.0), Vec::new())
    }

    fn grounded_body(cfg: &MovementConfig) -> Body {
        let mut body = Body::new(Vec3::ZERO, Vec3::ZERO, cfg);
        body.motion.grounded = true;
        body
    }

    #[test]
    fn jump_spends_exact_height_and_resets() {
        let cfg = MovementConfig {
            max_jump_height: 3.0,
            max_jump_time: 0.3,
            ..Default::default()
        };
        let world = CollisionWorld::default();
        let mut body = grounded_body(&cfg);
        assert!(start_jump(&mut body.motion, &cfg));
        assert!(!start_jump(&mut body.motion, &cfg));

        let dt = 1.0 / 60.0;
        let mut t = 0.0;
        while t < 0.3 - 1e-6 {
            integrate(&mut body, &MoveInput::default(), 0, &cfg, &world, None, dt);
            t += dt;
        }
        assert!(!body.motion.jumping);
        assert_eq!(body.motion.remaining_jump_height, cfg.max_jump_height);
        assert!((body.position.y - 3.0).abs() < 1e-3, "peak {}", body.position.y);
    }

    #[test]
    fn cancel_jump_when_idle_is_noop() {
        let cfg = MovementConfig::default();
        let mut motion = MotionState::new(&cfg);
        motion.remaining_jump_height = 0.25;
        let before = motion.clone();
        cancel_jump(&mut motion, &cfg);
        assert_eq!(motion, before);
    }

    #[test]
    fn falling_body_lands_on_ground() {
        let cfg = MovementConfig::default();
        let world = flat_world();
        let mut body = Body::new(Vec3::new(0.0, 2.0, 0.0), Vec3::ZERO, &cfg);
        for _ in 0..120 {
            integrate(&mut body, &MoveInput::default(), 0, &cfg, &world, None, 1.0 / 60.0);
        }
        assert!(body.motion.grounded);
        assert!(body.position.y.abs() < 1e-4, "y = {}", body.position.y);
        assert_eq!(body.velocity.get(GRAVITY), Vec3::ZERO);
    }

    #[test]
    fn keyboard_moves_along_yaw() {
        let cfg = MovementConfig::default();
        let world = flat_world();
        let mut body = grounded_body(&cfg);
        body.rotation.y = 90.0;
        let input = MoveInput {
            kb_dir: Vec3::new(0.0, 0.0, 1.0),
            ..Default::default()
        };
        assert!(integrate(&mut body, &input, 100, &cfg, &world, None, 0.1));
        // Speed rating 100 doubles base speed.
        assert!((body.position.x - 1.0).abs() < 1e-4, "{:?}", body.position);
        assert!(body.position.z.abs() < 1e-4);
        assert!(body.motion.grounded);
    }

    #[test]
    fn wall_hit_slides_at_original_speed() {
        let cfg = MovementConfig::default();
        let wall = Aabb {
            min: Vec3::new(-10.0, 0.0, 1.0),
            max: Vec3::new(10.0, 3.0, 2.0),
        };
        let world = CollisionWorld::new(Some(0.0), vec![wall]);
        let mut body = grounded_body(&cfg);
        body.position = Vec3::new(0.0, 0.0, 0.9);
        let input = MoveInput {
            kb_dir: Vec3::new(1.0, 0.0, 1.0),
            ..Default::default()
        };
        integrate(&mut body, &input, 0, &cfg, &world, None, 0.1);
        assert!((body.position.z - 0.9).abs() < 1e-4, "{:?}", body.position);
        // Full base speed redirected along +x.
        assert!((body.position.x - 0.5).abs() < 1e-4, "{:?}", body.position);
    }

    #[test]
    fn corner_stops_movement() {
        let cfg = MovementConfig::default();
        let walls = vec![
            Aabb {
                min: Vec3::new(-10.0, 0.0, 1.0),
                max: Vec3::new(10.0, 3.0, 2.0),
            },
            Aabb {
                min: Vec3::new(1.0, 0.0, -10.0),
                max: Vec3::new(2.0, 3.0, 10.0),
            },
        ];
        let world = CollisionWorld::new(Some(0.0), walls);
        let mut body = grounded_body(&cfg);
        body.position = Vec3::new(0.9, 0.0, 0.9);
        let input = MoveInput {
            kb_dir: Vec3::new(1.0, 0.0, 1.0),
            ..Default::default()
        };
        assert!(!integrate(&mut body, &input, 0, &cfg, &world, None, 0.1));
    }

    #[test]
    fn ceiling_stops_upward_motion() {
        let cfg = MovementConfig::default();
        let ceiling = Aabb {
            min: Vec3::new(-5.0, 1.9, -5.0),
            max: Vec3::new(5.0, 2.5, 5.0),
        };
        let world = CollisionWorld::new(Some(0.0), vec![ceiling]);
        let mut body = grounded_body(&cfg);
        start_jump(&mut body.motion, &cfg);
        integrate(&mut body, &MoveInput::default(), 0, &cfg, &world, None, 0.1);
        assert_eq!(body.position.y, 0.0);
        assert!(body.motion.jumping);
    }

    #[test]
    fn server_offset_lasts_one_tick() {
        let cfg = MovementConfig::default();
        let world = flat_world();
        let mut body = grounded_body(&cfg);
        body.velocity.set(SERVER_OFFSET, Vec3::new(2.0, 0.0, 0.0));
        integrate(&mut body, &MoveInput::default(), 0, &cfg, &world, None, 0.5);
        assert!((body.position.x - 1.0).abs() < 1e-5);
        integrate(&mut body, &MoveInput::default(), 0, &cfg, &world, None, 0.5);
        assert!((body.position.x - 1.0).abs() < 1e-5);
    }

    #[test]
    fn raycast_skips_ignored_body_and_reports_entity() {
        let mut world = CollisionWorld::default();
        let cfg = MovementConfig::default();
        let body = Body::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, &cfg);
        world.set_body(Uuid(7), body.bounds(&cfg));
        let origin = Vec3::new(0.0, 1.0, 0.0);
        let dir = Vec3::new(0.0, 0.0, 1.0);
        let hit = world.raycast(origin, dir, 10.0, None).unwrap();
        assert_eq!(hit.entity, Some(Uuid(7)));
        assert!((hit.distance - 4.6).abs() < 1e-4);
        assert!(world.raycast(origin, dir, 10.0, Some(Uuid(7))).is_none());
        assert!(world.raycast(origin, dir, 4.0, None).is_none());
    }
}
