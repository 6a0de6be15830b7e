//! Local input sampling on the frame clock, consumed on the tick clock
//!
//! The frame loop calls [`InputManager::update`] every render frame. The
//! simulation asks for one [`InputSnapshot`] per tick through
//! [`InputManager::fill_input`]. Directional keys are read fresh for every
//! tick, while the primary action is latched so a press shorter than a tick
//! is never lost.

use crate::camera::CameraRig;
use glam::Vec3;
use shared::{InputSnapshot, NetworkButtons, PRIMARY_ACTION};

/// Key state sampled for one render frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawInput {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
    pub primary: bool,
}

#[derive(Debug, Default)]
pub struct InputManager {
    keys: RawInput,
    // Pressed at any point since the last tick consumed it
    primary_latch: bool,
}

impl InputManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records this frame's keys and ORs the primary action into the latch
    pub fn update(&mut self, raw: RawInput) {
        self.keys = raw;
        self.primary_latch |= raw.primary;
    }

    pub fn primary_latched(&self) -> bool {
        self.primary_latch
    }

    /// Builds the input for the next simulation tick and resets the latch
    pub fn fill_input(&mut self, camera: Option<&dyn CameraRig>) -> InputSnapshot {
        let mut direction = Vec3::ZERO;
        if self.keys.forward {
            direction += Vec3::Z;
        }
        if self.keys.back {
            direction -= Vec3::Z;
        }
        if self.keys.left {
            direction -= Vec3::X;
        }
        if self.keys.right {
            direction += Vec3::X;
        }

        if let Some(camera) = camera {
            direction = camera.yaw_rotation() * direction;
        }

        let mut buttons = NetworkButtons::default();
        buttons.set(PRIMARY_ACTION, self.primary_latch);
        self.primary_latch = false;

        InputSnapshot {
            direction: direction.normalize_or_zero(),
            buttons,
        }
    }
}
