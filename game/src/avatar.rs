//! Player avatar: movement, the cooldown-gated fire action and render sync

use crate::change_detector::{ChangeDetector, ReplicatedField};
use crate::projectile::Projectile;
use crate::world::{ProjectileSpawn, SimClock, TickContext};
use glam::{Quat, Vec3};
use log::{debug, trace};
use shared::{
    look_rotation, AvatarState, NetworkId, PlayerRef, TickTimer, FIRE_COOLDOWN_SECS,
    PLAYER_SPEED, PRIMARY_ACTION,
};

/// Predicted position is snapped back once it drifts this far from the authority
pub const RECONCILE_DISTANCE: f32 = 0.5;

pub const BASE_COLOR: Vec3 = Vec3::new(0.0, 0.0, 1.0);
pub const FLASH_COLOR: Vec3 = Vec3::ONE;

/// Authority a peer holds over one replica, fixed when the replica is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// State and input authority (the host's own avatar)
    Owner,
    StateAuthority,
    InputAuthority,
    Proxy,
}

impl Role {
    pub fn resolve(
        is_server: bool,
        local_player: Option<PlayerRef>,
        input_authority: Option<PlayerRef>,
    ) -> Self {
        let controls = local_player.is_some() && local_player == input_authority;
        match (is_server, controls) {
            (true, true) => Role::Owner,
            (true, false) => Role::StateAuthority,
            (false, true) => Role::InputAuthority,
            (false, false) => Role::Proxy,
        }
    }

    pub fn has_state_authority(self) -> bool {
        matches!(self, Role::Owner | Role::StateAuthority)
    }

    pub fn has_input_authority(self) -> bool {
        matches!(self, Role::Owner | Role::InputAuthority)
    }

    /// Proxies only mirror replicated state and never run the tick update
    pub fn simulates(self) -> bool {
        self != Role::Proxy
    }
}

#[derive(Debug)]
pub struct Avatar {
    id: NetworkId,
    input_authority: Option<PlayerRef>,
    role: Role,
    state: AvatarState,
    forward: Vec3,
    change_detector: ChangeDetector,
    color: Vec3,
}

impl Avatar {
    pub fn new(
        id: NetworkId,
        input_authority: Option<PlayerRef>,
        role: Role,
        position: Vec3,
        rotation: Quat,
    ) -> Self {
        let state = AvatarState::new(position, rotation);
        Self {
            id,
            input_authority,
            role,
            state,
            forward: rotation * Vec3::Z,
            change_detector: ChangeDetector::new(state),
            color: BASE_COLOR,
        }
    }

    pub fn id(&self) -> NetworkId {
        self.id
    }

    pub fn input_authority(&self) -> Option<PlayerRef> {
        self.input_authority
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> &AvatarState {
        &self.state
    }

    pub fn forward(&self) -> Vec3 {
        self.forward
    }

    pub fn color(&self) -> Vec3 {
        self.color
    }

    /// Advances the avatar by one simulation tick
    ///
    /// Without input for this tick the avatar is left untouched. Only the
    /// state authority evaluates the fire action; a successful fire restarts
    /// the cooldown, queues a projectile and flips the replicated toggle in
    /// the same tick.
    pub fn fixed_update_network(&mut self, ctx: &mut TickContext) {
        let Some(input) = self.input_authority.and_then(|player| ctx.take_input(player)) else {
            return;
        };
        let clock = ctx.clock;

        let direction = input.direction.normalize_or_zero();
        self.state.position += direction * PLAYER_SPEED * clock.delta_time();
        if direction != Vec3::ZERO {
            self.forward = direction;
            self.state.rotation = look_rotation(direction);
        }

        if !self.role.has_state_authority() {
            return;
        }

        if self.state.delay.expired_or_not_running(clock.tick)
            && input.buttons.is_set(PRIMARY_ACTION)
        {
            let previous_delay = self.state.delay;
            self.state.delay =
                TickTimer::from_seconds(clock.tick, clock.tick_rate, FIRE_COOLDOWN_SECS);
            ctx.spawns.push(ProjectileSpawn {
                shooter: self.id,
                previous_delay,
                position: self.state.position + self.forward,
                rotation: look_rotation(self.forward),
                owner: self.input_authority,
                init: Box::new(|projectile: &mut Projectile, clock: SimClock| {
                    projectile.init(clock)
                }),
            });
            self.state.spawned_projectile = !self.state.spawned_projectile;
            debug!("{} fired at tick {}", self.id, clock.tick);
        }
    }

    /// Undoes a fire whose projectile the transport refused to spawn
    pub fn cancel_fire(&mut self, previous_delay: TickTimer) {
        self.state.delay = previous_delay;
        self.state.spawned_projectile = !self.state.spawned_projectile;
        debug!("{} fire cancelled", self.id);
    }

    /// Applies state received from the state authority
    pub fn apply_replicated(&mut self, remote: &AvatarState) {
        // Authority-owned fields are plain mirrors everywhere else
        self.state.delay = remote.delay;
        self.state.spawned_projectile = remote.spawned_projectile;

        match self.role {
            Role::Proxy => {
                self.state.position = remote.position;
                self.state.rotation = remote.rotation;
                self.forward = remote.rotation * Vec3::Z;
            }
            Role::InputAuthority => {
                let distance = self.state.position.distance(remote.position);
                if distance > RECONCILE_DISTANCE {
                    debug!("{} reconciled, drift {:.2}", self.id, distance);
                    self.state.position = remote.position;
                    self.state.rotation = remote.rotation;
                    self.forward = remote.rotation * Vec3::Z;
                }
            }
            Role::Owner | Role::StateAuthority => {}
        }
    }

    /// Runs the per-frame visual update
    ///
    /// Returns true when the flash fired this frame.
    pub fn render(&mut self, frame_dt: f32) -> bool {
        let changes = self.change_detector.detect_changes(&self.state);
        let flashed = changes.contains(&ReplicatedField::SpawnedProjectile);
        if flashed {
            trace!("{} flash", self.id);
            self.color = FLASH_COLOR;
        }

        self.color = self.color.lerp(BASE_COLOR, frame_dt.clamp(0.0, 1.0));
        flashed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{InputSnapshot, NetworkButtons};
    use std::collections::HashMap;

    const OWNER: PlayerRef = PlayerRef(0);

    fn avatar(role: Role) -> Avatar {
        Avatar::new(NetworkId(1), Some(OWNER), role, Vec3::ZERO, Quat::IDENTITY)
    }

    fn input(direction: Vec3, fire: bool) -> InputSnapshot {
        let mut buttons = NetworkButtons::default();
        buttons.set(PRIMARY_ACTION, fire);
        InputSnapshot { direction, buttons }
    }

    fn context(tick: u32, input: Option<InputSnapshot>) -> TickContext {
        let inputs: HashMap<_, _> = input.into_iter().map(|input| (OWNER, input)).collect();
        TickContext::new(SimClock::new(tick, 60), inputs)
    }

    #[test]
    fn test_role_resolution() {
        let me = Some(PlayerRef(1));
        let other = Some(PlayerRef(2));
        assert_eq!(Role::resolve(true, me, me), Role::Owner);
        assert_eq!(Role::resolve(true, me, other), Role::StateAuthority);
        assert_eq!(Role::resolve(false, me, me), Role::InputAuthority);
        assert_eq!(Role::resolve(false, me, other), Role::Proxy);
        assert_eq!(Role::resolve(false, None, None), Role::Proxy);
    }

    #[test]
    fn test_moves_by_speed_times_delta() {
        let mut avatar = avatar(Role::Owner);
        let mut ctx = context(0, Some(input(Vec3::new(2.0, 0.0, 0.0), false)));

        avatar.fixed_update_network(&mut ctx);

        assert_approx_eq!(avatar.state().position.x, PLAYER_SPEED / 60.0, 1e-6);
        assert_approx_eq!(avatar.forward().x, 1.0, 1e-6);
    }

    #[test]
    fn test_zero_direction_keeps_facing() {
        let mut avatar = avatar(Role::Owner);
        avatar.fixed_update_network(&mut context(0, Some(input(Vec3::X, false))));
        avatar.fixed_update_network(&mut context(1, Some(input(Vec3::ZERO, false))));
        assert_eq!(avatar.forward(), Vec3::X);
    }

    #[test]
    fn test_missing_input_skips_tick() {
        let mut avatar = avatar(Role::Owner);
        let mut ctx = context(0, None);
        avatar.fixed_update_network(&mut ctx);

        assert_eq!(avatar.state().position, Vec3::ZERO);
        assert!(ctx.spawns.is_empty());
    }

    #[test]
    fn test_fire_restarts_cooldown_and_flips_toggle() {
        let mut avatar = avatar(Role::Owner);
        let mut ctx = context(10, Some(input(Vec3::ZERO, true)));
        avatar.fixed_update_network(&mut ctx);

        assert_eq!(ctx.spawns.len(), 1);
        assert_eq!(ctx.spawns[0].owner, Some(OWNER));
        assert_eq!(ctx.spawns[0].position, Vec3::Z);
        assert!(avatar.state().spawned_projectile);
        assert_eq!(avatar.state().delay.target_tick(), Some(40));
    }

    #[test]
    fn test_cooldown_blocks_until_expired() {
        let mut avatar = avatar(Role::StateAuthority);
        avatar.fixed_update_network(&mut context(0, Some(input(Vec3::ZERO, true))));

        let mut blocked = context(29, Some(input(Vec3::ZERO, true)));
        avatar.fixed_update_network(&mut blocked);
        assert!(blocked.spawns.is_empty());
        assert!(avatar.state().spawned_projectile);

        let mut ready = context(30, Some(input(Vec3::ZERO, true)));
        avatar.fixed_update_network(&mut ready);
        assert_eq!(ready.spawns.len(), 1);
        assert!(!avatar.state().spawned_projectile);
    }

    #[test]
    fn test_input_authority_never_fires() {
        let mut avatar = avatar(Role::InputAuthority);
        let mut ctx = context(0, Some(input(Vec3::Z, true)));
        avatar.fixed_update_network(&mut ctx);

        assert!(ctx.spawns.is_empty());
        assert!(!avatar.state().delay.is_running());
        // Movement is still predicted locally
        assert!(avatar.state().position.z > 0.0);
    }

    #[test]
    fn test_proxy_adopts_remote_state() {
        let mut avatar = avatar(Role::Proxy);
        let mut remote = AvatarState::new(Vec3::new(4.0, 10.0, 0.0), look_rotation(Vec3::X));
        remote.spawned_projectile = true;

        avatar.apply_replicated(&remote);
        assert_eq!(avatar.state().position, remote.position);
        assert!(avatar.state().spawned_projectile);
        assert_approx_eq!(avatar.forward().x, 1.0, 1e-5);
    }

    #[test]
    fn test_prediction_reconciles_only_past_threshold() {
        let mut avatar = avatar(Role::InputAuthority);

        let close = AvatarState::new(Vec3::new(0.2, 0.0, 0.0), Quat::IDENTITY);
        avatar.apply_replicated(&close);
        assert_eq!(avatar.state().position, Vec3::ZERO);

        let far = AvatarState::new(Vec3::new(2.0, 0.0, 0.0), Quat::IDENTITY);
        avatar.apply_replicated(&far);
        assert_eq!(avatar.state().position, far.position);
    }

    #[test]
    fn test_reconcile_snaps_facing() {
        let mut avatar = avatar(Role::InputAuthority);
        avatar.fixed_update_network(&mut context(0, Some(input(Vec3::Z, false))));
        assert_approx_eq!(avatar.forward().z, 1.0, 1e-6);

        // A small drift keeps the predicted facing
        let near = AvatarState::new(avatar.state().position, look_rotation(Vec3::X));
        avatar.apply_replicated(&near);
        assert_approx_eq!(avatar.forward().z, 1.0, 1e-6);

        let far = AvatarState::new(Vec3::new(3.0, 0.0, 0.0), look_rotation(Vec3::X));
        avatar.apply_replicated(&far);
        assert_approx_eq!(avatar.forward().x, 1.0, 1e-5);
        assert_approx_eq!(avatar.forward().z, 0.0, 1e-5);
    }

    #[test]
    fn test_cancel_fire_restores_gate() {
        let mut avatar = avatar(Role::Owner);
        let mut ctx = context(0, Some(input(Vec3::ZERO, true)));
        avatar.fixed_update_network(&mut ctx);
        let spawn = ctx.spawns.remove(0);
        assert_eq!(spawn.shooter, NetworkId(1));

        avatar.cancel_fire(spawn.previous_delay);
        assert!(!avatar.state().delay.is_running());
        assert!(!avatar.state().spawned_projectile);
        assert!(!avatar.render(0.016));

        // The next tick may fire again straight away
        let mut retry = context(1, Some(input(Vec3::ZERO, true)));
        avatar.fixed_update_network(&mut retry);
        assert_eq!(retry.spawns.len(), 1);
    }

    #[test]
    fn test_flash_fires_once_per_flip() {
        let mut avatar = avatar(Role::Owner);
        assert!(!avatar.render(0.016));

        avatar.fixed_update_network(&mut context(0, Some(input(Vec3::X, true))));
        assert!(avatar.render(0.0));
        assert_eq!(avatar.color(), FLASH_COLOR);
        assert!(!avatar.render(0.016));
    }

    #[test]
    fn test_color_decays_toward_base() {
        let mut avatar = avatar(Role::Owner);
        avatar.fixed_update_network(&mut context(0, Some(input(Vec3::ZERO, true))));
        avatar.render(0.5);

        let color = avatar.color();
        assert_approx_eq!(color.x, 0.5, 1e-6);
        assert_approx_eq!(color.z, 1.0, 1e-6);

        avatar.render(1.0);
        assert_eq!(avatar.color(), BASE_COLOR);
    }
}
