//! Input handling.
//!
//! Windowing and device bindings live outside this crate. Whatever samples
//! the devices fills an `InputState`; the client turns it into one
//! `MoveInput` per physics tick.

use arpg_shared::{math::Vec3, movement::MoveInput, protocol::RequestMove};

/// User input state at a moment in time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    /// Forward/back axis in [-1, 1].
    pub forward: f32,
    /// Strafe axis in [-1, 1], positive to the right.
    pub right: f32,
    /// Keyboard turn in [-1, 1].
    pub turn: f32,
    /// Mouse yaw accumulated since the last tick, in degrees.
    pub mouse_yaw: f32,
}

impl InputState {
    pub fn move_input(self) -> MoveInput {
        MoveInput {
            kb_dir: Vec3::new(self.right.clamp(-1.0, 1.0), 0.0, self.forward.clamp(-1.0, 1.0)),
            kb_y_rot: self.turn.clamp(-1.0, 1.0),
            mouse_y_rot: self.mouse_yaw,
        }
    }
}

/// The call announcing one predicted step to the host.
pub fn build_request(seq: u32, input: &MoveInput) -> RequestMove {
    RequestMove {
        seq,
        kb_dir: input.kb_dir,
        kb_y_rot: input.kb_y_rot,
        mouse_y_rot: input.mouse_y_rot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axes_are_clamped_and_mouse_passes_through() {
        let input = InputState {
            forward: 3.0,
            right: -0.5,
            turn: -2.0,
            mouse_yaw: 45.0,
        }
        .move_input();
        assert_eq!(input.kb_dir, Vec3::new(-0.5, 0.0, 1.0));
        assert_eq!(input.kb_y_rot, -1.0);
        assert_eq!(input.mouse_y_rot, 45.0);

        let rpc = build_request(7, &input);
        assert_eq!(rpc.seq, 7);
        assert_eq!(rpc.kb_dir, input.kb_dir);
    }
}
