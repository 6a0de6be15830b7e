use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const PLAYER_SPEED: f32 = 5.0;
pub const FIRE_COOLDOWN_SECS: f32 = 0.5;
pub const PROJECTILE_SPEED: f32 = 5.0;
pub const PROJECTILE_LIFETIME_SECS: f32 = 5.0;
pub const SPAWN_SPACING: f32 = 3.0;
pub const SPAWN_HEIGHT: f32 = 10.0;
pub const SPAWN_DEPTH: f32 = 0.0;
pub const DEFAULT_TICK_RATE: u32 = 60;
pub const DEFAULT_PLAYER_COUNT: u32 = 10;

/// Bit index of the primary action (fire) button
pub const PRIMARY_ACTION: u8 = 0;

pub type Tick = u32;

/// Player identifier handed out by the session, stable for a connection's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerRef(pub u32);

impl PlayerRef {
    pub fn raw_encoded(self) -> u32 {
        self.0
    }

    pub fn player_id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PlayerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Player:{}]", self.0)
    }
}

/// Handle of a replicated entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkId(pub u32);

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Id:{}]", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkButtons(u32);

impl NetworkButtons {
    pub fn set(&mut self, button: u8, pressed: bool) {
        if pressed {
            self.0 |= 1 << button;
        } else {
            self.0 &= !(1 << button);
        }
    }

    pub fn is_set(&self, button: u8) -> bool {
        self.0 & (1 << button) != 0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Keeps every button pressed in either set
    pub fn merge(&mut self, other: NetworkButtons) {
        self.0 |= other.0;
    }
}

/// Input for one avatar on one simulation tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSnapshot {
    pub direction: Vec3,
    pub buttons: NetworkButtons,
}

/// Countdown measured in simulation ticks.
///
/// A timer that was never started is "not running"; a started timer expires
/// once the simulation clock reaches its target tick. Nothing here reads the
/// wall clock, so behaviour is independent of frame rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickTimer {
    target: Option<Tick>,
}

impl TickTimer {
    pub const NONE: TickTimer = TickTimer { target: None };

    pub fn from_ticks(current: Tick, ticks: u32) -> Self {
        Self {
            target: Some(current.saturating_add(ticks)),
        }
    }

    /// Seconds are rounded up to whole ticks so a cooldown never ends early
    pub fn from_seconds(current: Tick, tick_rate: u32, seconds: f32) -> Self {
        let ticks = (seconds * tick_rate as f32).ceil().max(0.0) as u32;
        Self::from_ticks(current, ticks)
    }

    pub fn is_running(&self) -> bool {
        self.target.is_some()
    }

    pub fn target_tick(&self) -> Option<Tick> {
        self.target
    }

    pub fn expired(&self, current: Tick) -> bool {
        matches!(self.target, Some(target) if current >= target)
    }

    pub fn expired_or_not_running(&self, current: Tick) -> bool {
        self.target.map_or(true, |target| current >= target)
    }

    pub fn remaining_ticks(&self, current: Tick) -> Option<u32> {
        self.target.map(|target| target.saturating_sub(current))
    }
}

/// Replicated fields of a player avatar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AvatarState {
    pub position: Vec3,
    pub rotation: Quat,
    pub delay: TickTimer,
    pub spawned_projectile: bool,
}

impl AvatarState {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            delay: TickTimer::NONE,
            spawned_projectile: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectileState {
    pub position: Vec3,
    pub rotation: Quat,
}

/// Remote procedure calls carried by the reliable channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rpc {
    /// First hop: input authority -> state authority
    SendMessage { message: String },
    /// Second hop: state authority -> all peers
    RelayMessage { message: String, source: PlayerRef },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Packet {
    Rpc {
        object: NetworkId,
        source: PlayerRef,
        rpc: Rpc,
    },
    StateSnapshot {
        tick: Tick,
        avatars: Vec<(NetworkId, AvatarState)>,
        projectiles: Vec<(NetworkId, ProjectileState)>,
    },
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Rotation that looks along `forward` on the horizontal plane
pub fn look_rotation(forward: Vec3) -> Quat {
    if forward.x == 0.0 && forward.z == 0.0 {
        return Quat::IDENTITY;
    }
    Quat::from_rotation_y(forward.x.atan2(forward.z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_buttons_set_and_clear() {
        let mut buttons = NetworkButtons::default();
        assert!(!buttons.is_set(PRIMARY_ACTION));

        buttons.set(PRIMARY_ACTION, true);
        assert!(buttons.is_set(PRIMARY_ACTION));
        assert_eq!(buttons.bits(), 1);

        buttons.set(3, true);
        buttons.set(PRIMARY_ACTION, false);
        assert!(!buttons.is_set(PRIMARY_ACTION));
        assert!(buttons.is_set(3));
    }

    #[test]
    fn test_buttons_merge_keeps_presses() {
        let mut pending = NetworkButtons::default();
        pending.set(PRIMARY_ACTION, true);

        pending.merge(NetworkButtons::default());
        assert!(pending.is_set(PRIMARY_ACTION));

        let mut other = NetworkButtons::default();
        other.set(2, true);
        pending.merge(other);
        assert!(pending.is_set(PRIMARY_ACTION));
        assert!(pending.is_set(2));
    }

    #[test]
    fn test_timer_not_running() {
        let timer = TickTimer::NONE;
        assert!(!timer.is_running());
        assert!(!timer.expired(100));
        assert!(timer.expired_or_not_running(0));
        assert_eq!(timer.remaining_ticks(5), None);
    }

    #[test]
    fn test_timer_from_seconds_rounds_up() {
        let timer = TickTimer::from_seconds(10, 60, FIRE_COOLDOWN_SECS);
        assert_eq!(timer.target_tick(), Some(40));

        let timer = TickTimer::from_seconds(0, 30, 0.1);
        assert_eq!(timer.target_tick(), Some(3));
    }

    #[test]
    fn test_timer_expiry() {
        let timer = TickTimer::from_ticks(10, 5);
        assert!(!timer.expired(14));
        assert!(!timer.expired_or_not_running(14));
        assert_eq!(timer.remaining_ticks(12), Some(3));
        assert!(timer.expired(15));
        assert!(timer.expired_or_not_running(16));
        assert_eq!(timer.remaining_ticks(20), Some(0));
    }

    #[test]
    fn test_look_rotation() {
        let rotation = look_rotation(Vec3::X);
        let forward = rotation * Vec3::Z;
        assert_approx_eq!(forward.x, 1.0, 1e-5);
        assert_approx_eq!(forward.z, 0.0, 1e-5);

        assert_eq!(look_rotation(Vec3::ZERO), Quat::IDENTITY);
    }

    #[test]
    fn test_player_ref_display() {
        assert_eq!(PlayerRef(3).to_string(), "[Player:3]");
        assert_eq!(PlayerRef(7).player_id(), 7);
    }

    #[test]
    fn test_packet_serialization_rpc() {
        let packet = Packet::Rpc {
            object: NetworkId(4),
            source: PlayerRef(2),
            rpc: Rpc::SendMessage {
                message: "Hey Mate!".to_string(),
            },
        };

        let bytes = packet.encode().unwrap();
        match Packet::decode(&bytes).unwrap() {
            Packet::Rpc { object, source, rpc } => {
                assert_eq!(object, NetworkId(4));
                assert_eq!(source, PlayerRef(2));
                assert_eq!(
                    rpc,
                    Rpc::SendMessage {
                        message: "Hey Mate!".to_string()
                    }
                );
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_snapshot() {
        let mut state = AvatarState::new(Vec3::new(3.0, 10.0, 0.0), Quat::IDENTITY);
        state.delay = TickTimer::from_ticks(5, 30);
        state.spawned_projectile = true;

        let packet = Packet::StateSnapshot {
            tick: 42,
            avatars: vec![(NetworkId(1), state)],
            projectiles: vec![],
        };

        let bytes = packet.encode().unwrap();
        match Packet::decode(&bytes).unwrap() {
            Packet::StateSnapshot {
                tick,
                avatars,
                projectiles,
            } => {
                assert_eq!(tick, 42);
                assert_eq!(avatars.len(), 1);
                assert_eq!(avatars[0].1, state);
                assert!(projectiles.is_empty());
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }
}
