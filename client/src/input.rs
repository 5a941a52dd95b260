//! Client input management with latching and modal capture

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::controller::InputIntent;
use shared::math::Vec2;

/// Raw key state for one rendered frame. Whatever polls the keyboard (or a
/// [`ScriptedInput`]) fills this in.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KeyState {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
    pub rotate_left: bool,
    pub rotate_right: bool,
    pub jump: bool,
    pub crouch: bool,
    pub crawl: bool,
    pub run: bool,
}

impl KeyState {
    fn axis(negative: bool, positive: bool) -> f32 {
        match (negative, positive) {
            (true, false) => -1.0,
            (false, true) => 1.0,
            _ => 0.0,
        }
    }

    fn move_axis(&self) -> Vec2 {
        Vec2::new(
            Self::axis(self.left, self.right),
            Self::axis(self.back, self.forward),
        )
    }
}

/// Turns per frame key samples into per tick [`InputIntent`]s.
///
/// Frames usually run faster than the fixed tick, so a jump tapped between
/// two ticks would be lost if only the latest frame counted. Presses of
/// jump, crouch and crawl are therefore latched until the next tick takes
/// them. Held axes simply use the latest frame.
///
/// While a modal UI (inventory, chat box) captures input every intent is
/// zero and latched presses are dropped.
#[derive(Debug, Clone, Default)]
pub struct InputManager {
    latest: KeyState,
    jump_latched: bool,
    crouch_latched: bool,
    crawl_latched: bool,
    modal: bool,
}

impl InputManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the key state of one frame.
    pub fn sample(&mut self, keys: KeyState) {
        if self.modal {
            return;
        }
        self.latest = keys;
        self.jump_latched |= keys.jump;
        self.crouch_latched |= keys.crouch;
        self.crawl_latched |= keys.crawl;
    }

    pub fn set_modal(&mut self, captured: bool) {
        self.modal = captured;
        if captured {
            self.latest = KeyState::default();
            self.clear_latches();
        }
    }

    pub fn is_modal(&self) -> bool {
        self.modal
    }

    fn clear_latches(&mut self) {
        self.jump_latched = false;
        self.crouch_latched = false;
        self.crawl_latched = false;
    }

    /// Intent for the next fixed tick. Consumes latched presses.
    pub fn take_intent(&mut self) -> InputIntent {
        if self.modal {
            return InputIntent::default();
        }
        let intent = InputIntent {
            move_axis: self.latest.move_axis(),
            rotate: KeyState::axis(self.latest.rotate_left, self.latest.rotate_right),
            jump: self.jump_latched,
            crouch: self.crouch_latched,
            crawl: self.crawl_latched,
            run: self.latest.run,
        };
        self.clear_latches();
        intent
    }
}

/// Random walking input for headless bots and soak tests.
#[derive(Debug, Clone)]
pub struct ScriptedInput {
    rng: StdRng,
    current: KeyState,
    remaining: f32,
}

impl ScriptedInput {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            current: KeyState::default(),
            remaining: 0.0,
        }
    }

    /// Keys for a frame of `dt` seconds. Picks a new plan every one to three
    /// seconds and taps jump now and then.
    pub fn next_keys(&mut self, dt: f32) -> KeyState {
        self.remaining -= dt;
        if self.remaining <= 0.0 {
            self.remaining = self.rng.gen_range(1.0..3.0);
            self.current = KeyState {
                forward: self.rng.gen_bool(0.7),
                left: self.rng.gen_bool(0.2),
                right: self.rng.gen_bool(0.2),
                rotate_left: self.rng.gen_bool(0.25),
                rotate_right: self.rng.gen_bool(0.25),
                run: self.rng.gen_bool(0.3),
                ..KeyState::default()
            };
        }

        let mut keys = self.current;
        keys.jump = self.rng.gen_bool((0.2 * dt as f64).clamp(0.0, 1.0));
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_jump_latched_until_tick() {
        let mut input = InputManager::new();
        input.sample(KeyState {
            jump: true,
            ..KeyState::default()
        });
        input.sample(KeyState::default());

        assert!(input.take_intent().jump);
        assert!(!input.take_intent().jump);
    }

    #[test]
    fn test_axes_follow_latest_frame() {
        let mut input = InputManager::new();
        input.sample(KeyState {
            forward: true,
            left: true,
            rotate_right: true,
            run: true,
            ..KeyState::default()
        });
        let intent = input.take_intent();
        assert_approx_eq!(intent.move_axis.x, -1.0);
        assert_approx_eq!(intent.move_axis.y, 1.0);
        assert_approx_eq!(intent.rotate, 1.0);
        assert!(intent.run);

        input.sample(KeyState {
            forward: true,
            back: true,
            ..KeyState::default()
        });
        assert_approx_eq!(input.take_intent().move_axis.y, 0.0);
    }

    #[test]
    fn test_modal_capture_zeroes_intent() {
        let mut input = InputManager::new();
        input.sample(KeyState {
            forward: true,
            crouch: true,
            ..KeyState::default()
        });
        input.set_modal(true);
        input.sample(KeyState {
            jump: true,
            ..KeyState::default()
        });
        assert_eq!(input.take_intent(), InputIntent::default());

        input.set_modal(false);
        assert_eq!(input.take_intent(), InputIntent::default());
    }

    #[test]
    fn test_scripted_input_is_reproducible() {
        let mut a = ScriptedInput::new(7);
        let mut b = ScriptedInput::new(7);
        for _ in 0..200 {
            assert_eq!(a.next_keys(0.016), b.next_keys(0.016));
        }
    }
}
