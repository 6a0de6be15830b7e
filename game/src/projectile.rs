//! Projectile spawned by the avatar fire action

use crate::world::SimClock;
use glam::{Quat, Vec3};
use log::debug;
use shared::{
    NetworkId, PlayerRef, ProjectileState, TickTimer, PROJECTILE_LIFETIME_SECS, PROJECTILE_SPEED,
};

#[derive(Debug, Clone)]
pub struct Projectile {
    id: NetworkId,
    owner: Option<PlayerRef>,
    state: ProjectileState,
    life: TickTimer,
    has_state_authority: bool,
}

impl Projectile {
    pub fn new(
        id: NetworkId,
        owner: Option<PlayerRef>,
        position: Vec3,
        rotation: Quat,
        has_state_authority: bool,
    ) -> Self {
        Self {
            id,
            owner,
            state: ProjectileState { position, rotation },
            life: TickTimer::NONE,
            has_state_authority,
        }
    }

    /// Starts the lifetime; runs once before the projectile is first replicated
    pub fn init(&mut self, clock: SimClock) {
        self.life = TickTimer::from_seconds(clock.tick, clock.tick_rate, PROJECTILE_LIFETIME_SECS);
    }

    pub fn id(&self) -> NetworkId {
        self.id
    }

    pub fn owner(&self) -> Option<PlayerRef> {
        self.owner
    }

    pub fn state(&self) -> &ProjectileState {
        &self.state
    }

    pub fn life(&self) -> TickTimer {
        self.life
    }

    /// Moves the projectile one tick along its facing
    ///
    /// Returns true once the lifetime has expired and the projectile should
    /// be despawned. Replicas without state authority never move on their own.
    pub fn fixed_update_network(&mut self, clock: SimClock) -> bool {
        if !self.has_state_authority {
            return false;
        }
        if self.life.expired(clock.tick) {
            debug!("{} expired at tick {}", self.id, clock.tick);
            return true;
        }

        self.state.position +=
            self.state.rotation * Vec3::Z * PROJECTILE_SPEED * clock.delta_time();
        false
    }

    pub fn apply_replicated(&mut self, remote: &ProjectileState) {
        if !self.has_state_authority {
            self.state = *remote;
        }
    }
}
