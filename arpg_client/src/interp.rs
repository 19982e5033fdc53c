//! Observer interpolation.
//!
//! The host sends discrete transforms for characters this client does not
//! own. Each observer moves from the previous snapshot to the latest over the
//! wall-clock gap between their arrivals, so it trails the host by one update.

use std::time::Instant;

use arpg_shared::math::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub position: Vec3,
    pub rotation: Vec3,
    pub at: Instant,
}

/// The last two transforms received for one observed character.
#[derive(Debug, Clone)]
pub struct ObserverBuffer {
    prev: Option<Snapshot>,
    latest: Snapshot,
}

impl ObserverBuffer {
    pub fn new(position: Vec3, rotation: Vec3, at: Instant) -> Self {
        Self {
            prev: None,
            latest: Snapshot {
                position,
                rotation,
                at,
            },
        }
    }

    pub fn push(&mut self, position: Vec3, rotation: Vec3, at: Instant) {
        self.prev = Some(self.latest);
        self.latest = Snapshot {
            position,
            rotation,
            at,
        };
    }

    pub fn latest(&self) -> &Snapshot {
        &self.latest
    }

    /// Fraction of the way from the previous snapshot to the latest at `now`.
    pub fn alpha(&self, now: Instant) -> f32 {
        let Some(prev) = self.prev else {
            return 1.0;
        };
        let span = self.latest.at.saturating_duration_since(prev.at).as_secs_f32();
        if span <= 0.0 {
            return 1.0;
        }
        let since = now.saturating_duration_since(self.latest.at).as_secs_f32();
        (since / span).clamp(0.0, 1.0)
    }

    /// Interpolated transform at `now`. Rotation takes the shortest arc.
    pub fn sample(&self, now: Instant) -> (Vec3, Vec3) {
        let Some(prev) = self.prev else {
            return (self.latest.position, self.latest.rotation);
        };
        let t = self.alpha(now);
        (
            prev.position.lerp(self.latest.position, t),
            prev.rotation.lerp_angles(self.latest.rotation, t),
        )
    }
}
