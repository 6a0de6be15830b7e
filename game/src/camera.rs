//! Camera collaborator used by input sampling and avatar spawning

use glam::Quat;
use log::debug;
use shared::NetworkId;

/// View rig that follows the locally controlled avatar
pub trait CameraRig {
    /// Horizontal orientation that directional input is expressed in
    fn yaw_rotation(&self) -> Quat;

    /// Called once when an avatar under local input authority spawns
    fn set_target(&mut self, target: NetworkId);
}

/// Camera with a fixed yaw, enough for headless peers and tests
#[derive(Debug, Clone, Default)]
pub struct FixedYawCamera {
    yaw: f32,
    target: Option<NetworkId>,
}

impl FixedYawCamera {
    pub fn new(yaw: f32) -> Self {
        Self { yaw, target: None }
    }

    pub fn target(&self) -> Option<NetworkId> {
        self.target
    }
}

impl CameraRig for FixedYawCamera {
    fn yaw_rotation(&self) -> Quat {
        Quat::from_rotation_y(self.yaw)
    }

    fn set_target(&mut self, target: NetworkId) {
        debug!("Camera following {}", target);
        self.target = Some(target);
    }
}
