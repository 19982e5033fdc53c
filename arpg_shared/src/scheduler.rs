//! Fixed-rate cooperative scheduler.
//!
//! Turns a variable frame delta into whole fixed-rate ticks. Due ticks come
//! out grouped by phase in declared order, so within a frame every physics
//! tick runs before any combat tick and the network flush runs last.

use tracing::debug;

/// Simulation phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Physics,
    Combat,
    NetFlush,
}

/// One due tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub phase: Phase,
    /// Fixed step length in seconds.
    pub dt: f64,
}

#[derive(Debug, Clone)]
struct Clock {
    phase: Phase,
    period: f64,
    acc: f64,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    clocks: Vec<Clock>,
    max_catch_up: u32,
}

const TICK_EPS: f64 = 1e-9;

impl Scheduler {
    /// Rates in Hz. A phase with a zero rate never fires.
    pub fn new(physics_hz: u32, combat_hz: u32, net_hz: u32) -> Self {
        let clock = |phase, hz: u32| Clock {
            phase,
            period: if hz == 0 { f64::INFINITY } else { 1.0 / f64::from(hz) },
            acc: 0.0,
        };
        Self {
            clocks: vec![
                clock(Phase::Physics, physics_hz),
                clock(Phase::Combat, combat_hz),
                clock(Phase::NetFlush, net_hz),
            ],
            max_catch_up: 8,
        }
    }

    /// Caps the ticks one phase may run per frame. Backlog beyond the cap is
    /// dropped.
    pub fn with_max_catch_up(mut self, max: u32) -> Self {
        self.max_catch_up = max.max(1);
        self
    }

    pub fn period(&self, phase: Phase) -> f64 {
        self.clocks
            .iter()
            .find(|c| c.phase == phase)
            .map_or(f64::INFINITY, |c| c.period)
    }

    /// Advances every clock by `frame_dt` seconds and returns the due ticks.
    pub fn advance(&mut self, frame_dt: f64) -> Vec<Tick> {
        let mut out = Vec::new();
        if frame_dt <= 0.0 || !frame_dt.is_finite() {
            return out;
        }
        for clock in &mut self.clocks {
            if !clock.period.is_finite() {
                continue;
            }
            clock.acc += frame_dt;
            let due = ((clock.acc + TICK_EPS) / clock.period).floor() as u64;
            let run = due.min(u64::from(self.max_catch_up));
            clock.acc = (clock.acc - run as f64 * clock.period).max(0.0);
            if due > run {
                clock.acc = 0.0;
                debug!(phase = ?clock.phase, dropped = due - run, "Scheduler backlog dropped");
            }
            for _ in 0..run {
                out.push(Tick {
                    phase: clock.phase,
                    dt: clock.period,
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phases(ticks: &[Tick]) -> Vec<Phase> {
        ticks.iter().map(|t| t.phase).collect()
    }

    #[test]
    fn ticks_are_grouped_in_phase_order() {
        let mut s = Scheduler::new(60, 5, 20);
        let ticks = s.advance(0.2);
        let p = phases(&ticks);
        assert_eq!(p.iter().filter(|x| **x == Phase::Physics).count(), 8);
        assert_eq!(p.iter().filter(|x| **x == Phase::Combat).count(), 1);
        assert_eq!(p.iter().filter(|x| **x == Phase::NetFlush).count(), 4);
        let mut sorted = p.clone();
        sorted.sort();
        assert_eq!(p, sorted);
    }

    #[test]
    fn remainder_carries_between_frames() {
        let mut s = Scheduler::new(10, 0, 0);
        assert!(s.advance(0.06).is_empty());
        assert_eq!(s.advance(0.06).len(), 1);
        assert!(s.advance(0.03).is_empty());
        assert_eq!(s.advance(0.05).len(), 1);
    }

    #[test]
    fn catch_up_is_capped() {
        let mut s = Scheduler::new(100, 0, 0).with_max_catch_up(3);
        assert_eq!(s.advance(1.0).len(), 3);
        // Backlog is gone.
        assert_eq!(s.advance(0.0).len(), 0);
        assert_eq!(s.advance(0.01).len(), 1);
    }

    #[test]
    fn fixed_dt_matches_rate() {
        let mut s = Scheduler::new(0, 5, 0);
        let ticks = s.advance(0.2);
        assert_eq!(ticks, vec![Tick { phase: Phase::Combat, dt: 0.2 }]);
    }
}
