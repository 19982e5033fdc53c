//! Client-side prediction and reconciliation.
//!
//! Every predicted physics step is tagged with the next sequence number and
//! remembered until the host echoes it back. An echo whose authoritative
//! transform differs from the remembered one yields a [`Correction`]; later
//! predictions are shifted by the same delta so they stay comparable.

use std::collections::VecDeque;

use arpg_shared::math::{wrap_degrees, Vec3};
use tracing::debug;

/// Predictions kept before the oldest is dropped unacknowledged.
pub const MAX_PREDICTIONS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Predicted {
    seq: u32,
    position: Vec3,
    rotation: Vec3,
}

/// Difference between the host's transform and the prediction for one seq.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    pub seq: u32,
    pub position: Vec3,
    /// Per-axis shortest-arc rotation delta in degrees.
    pub rotation: Vec3,
}

impl Correction {
    pub fn is_zero(&self) -> bool {
        self.position.is_zero() && self.rotation.is_zero()
    }
}

#[derive(Debug, Clone)]
pub struct PredictionBuffer {
    next_seq: u32,
    last_acked: Option<u32>,
    history: VecDeque<Predicted>,
}

impl Default for PredictionBuffer {
    fn default() -> Self {
        Self {
            next_seq: 1,
            last_acked: None,
            history: VecDeque::new(),
        }
    }
}

impl PredictionBuffer {
    /// Sequence number the next recorded prediction gets.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn last_acked(&self) -> Option<u32> {
        self.last_acked
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Remembers the transform reached by one predicted step.
    pub fn record(&mut self, position: Vec3, rotation: Vec3) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.history.push_back(Predicted {
            seq,
            position,
            rotation,
        });
        while self.history.len() > MAX_PREDICTIONS {
            self.history.pop_front();
        }
        seq
    }

    /// The remembered transform for `seq`, if still held.
    pub fn predicted(&self, seq: u32) -> Option<(Vec3, Vec3)> {
        self.history
            .iter()
            .find(|p| p.seq == seq)
            .map(|p| (p.position, p.rotation))
    }

    /// Reconciles an authoritative echo for `seq`.
    ///
    /// Returns `None` for a stale echo or one whose prediction is no longer
    /// held.
    pub fn reconcile(&mut self, seq: u32, position: Vec3, rotation: Vec3) -> Option<Correction> {
        if self.last_acked.is_some_and(|acked| seq < acked) {
            debug!(seq, "Stale movement echo ignored");
            return None;
        }
        self.last_acked = Some(seq);
        while self.history.front().is_some_and(|p| p.seq < seq) {
            self.history.pop_front();
        }
        let predicted = self.history.front().filter(|p| p.seq == seq).copied()?;

        let correction = Correction {
            seq,
            position: position - predicted.position,
            rotation: Vec3::new(
                wrap_degrees(rotation.x - predicted.rotation.x),
                wrap_degrees(rotation.y - predicted.rotation.y),
                wrap_degrees(rotation.z - predicted.rotation.z),
            ),
        };
        if !correction.is_zero() {
            for p in &mut self.history {
                p.position += correction.position;
                p.rotation += correction.rotation;
            }
        }
        Some(correction)
    }

    /// Forgets every prediction and restarts the sequence.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
