//! Player avatar bookkeeping on the peer holding session authority
//!
//! The registry maps every joined player to the avatar spawned for them:
//! - An entry is inserted when a join is processed
//! - The entry is removed when the matching leave is processed
//! - Spawn positions are a pure function of the player identifier
//!
//! All mutation happens from session callbacks on the simulation thread,
//! so the registry needs no locking.

use glam::Vec3;
use shared::{NetworkId, PlayerRef, SPAWN_DEPTH, SPAWN_HEIGHT, SPAWN_SPACING};
use std::collections::HashMap;

/// Computes a collision-free spawn point for a player
///
/// Players are lined up along the x axis by `identifier mod capacity`,
/// so two players never share a slot while the session is under capacity.
pub fn spawn_position(player: PlayerRef, player_count: u32) -> Vec3 {
    let slot = player.raw_encoded() % player_count.max(1);
    Vec3::new(slot as f32 * SPAWN_SPACING, SPAWN_HEIGHT, SPAWN_DEPTH)
}

#[derive(Debug, Default)]
pub struct SpawnRegistry {
    spawned: HashMap<PlayerRef, NetworkId>,
}

impl SpawnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an avatar for a player
    ///
    /// Returns false and leaves the existing entry untouched when the
    /// player already has an avatar.
    pub fn insert(&mut self, player: PlayerRef, avatar: NetworkId) -> bool {
        if self.spawned.contains_key(&player) {
            return false;
        }
        self.spawned.insert(player, avatar);
        true
    }

    pub fn remove(&mut self, player: PlayerRef) -> Option<NetworkId> {
        self.spawned.remove(&player)
    }

    pub fn get(&self, player: PlayerRef) -> Option<NetworkId> {
        self.spawned.get(&player).copied()
    }

    pub fn contains(&self, player: PlayerRef) -> bool {
        self.spawned.contains_key(&player)
    }

    pub fn clear(&mut self) {
        self.spawned.clear();
    }

    pub fn len(&self) -> usize {
        self.spawned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spawned.is_empty()
    }

    pub fn players(&self) -> impl Iterator<Item = PlayerRef> + '_ {
        self.spawned.keys().copied()
    }
}
