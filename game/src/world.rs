//! Per-peer container of replicated entities and the tick it runs
//!
//! A [`World`] holds the local replica of every avatar and projectile in the
//! session. On the state authority it produces the snapshots other peers
//! apply; everywhere it runs the simulation for replicas the peer is
//! responsible for and the render pass for all of them.

use crate::avatar::{Avatar, Role};
use crate::projectile::Projectile;
use crate::transport::{Prefab, SpawnRequest};
use glam::{Quat, Vec3};
use log::{debug, info};
use shared::{InputSnapshot, NetworkId, Packet, PlayerRef, Tick, TickTimer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Simulation clock for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimClock {
    pub tick: Tick,
    pub tick_rate: u32,
}

impl SimClock {
    pub fn new(tick: Tick, tick_rate: u32) -> Self {
        Self { tick, tick_rate }
    }

    pub fn delta_time(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }
}

pub type ProjectileInit = Box<dyn FnOnce(&mut Projectile, SimClock) + Send>;

/// Projectile requested by an avatar during a tick
pub struct ProjectileSpawn {
    /// Avatar that fired
    pub shooter: NetworkId,
    /// Cooldown the shooter had before this fire
    pub previous_delay: TickTimer,
    pub position: Vec3,
    pub rotation: Quat,
    pub owner: Option<PlayerRef>,
    /// Runs on the new projectile before it is first replicated
    pub init: ProjectileInit,
}

impl ProjectileSpawn {
    pub fn request(&self) -> SpawnRequest {
        SpawnRequest {
            prefab: Prefab::Ball,
            position: self.position,
            rotation: self.rotation,
            input_authority: self.owner,
        }
    }
}

impl fmt::Debug for ProjectileSpawn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectileSpawn")
            .field("shooter", &self.shooter)
            .field("position", &self.position)
            .field("rotation", &self.rotation)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Inputs and outputs of one simulation tick
pub struct TickContext {
    pub clock: SimClock,
    inputs: HashMap<PlayerRef, InputSnapshot>,
    pub spawns: Vec<ProjectileSpawn>,
}

impl TickContext {
    pub fn new(clock: SimClock, inputs: HashMap<PlayerRef, InputSnapshot>) -> Self {
        Self {
            clock,
            inputs,
            spawns: Vec::new(),
        }
    }

    /// Hands out a player's input for this tick; a second call returns None
    pub fn take_input(&mut self, player: PlayerRef) -> Option<InputSnapshot> {
        self.inputs.remove(&player)
    }
}

#[derive(Debug, Default)]
pub struct World {
    is_server: bool,
    local_player: Option<PlayerRef>,
    avatars: BTreeMap<NetworkId, Avatar>,
    projectiles: BTreeMap<NetworkId, Projectile>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records who this peer is; roles of later replicas derive from it
    pub fn set_authority(&mut self, is_server: bool, local_player: Option<PlayerRef>) {
        self.is_server = is_server;
        self.local_player = local_player;
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }

    /// Creates the local replica for a spawned object
    ///
    /// Returns true when the replica is an avatar under local input
    /// authority, which is what the camera follows.
    pub fn on_spawned(&mut self, id: NetworkId, request: &SpawnRequest) -> bool {
        match request.prefab {
            Prefab::Player => {
                if self.avatars.contains_key(&id) {
                    return false;
                }
                let role = Role::resolve(self.is_server, self.local_player, request.input_authority);
                info!("Spawned avatar {} as {:?}", id, role);
                self.avatars.insert(
                    id,
                    Avatar::new(
                        id,
                        request.input_authority,
                        role,
                        request.position,
                        request.rotation,
                    ),
                );
                role.has_input_authority()
            }
            Prefab::Ball => {
                self.projectiles.entry(id).or_insert_with(|| {
                    Projectile::new(
                        id,
                        request.input_authority,
                        request.position,
                        request.rotation,
                        self.is_server,
                    )
                });
                false
            }
        }
    }

    pub fn on_despawned(&mut self, id: NetworkId) {
        if self.avatars.remove(&id).is_some() {
            info!("Despawned avatar {}", id);
        } else if self.projectiles.remove(&id).is_some() {
            debug!("Despawned projectile {}", id);
        }
    }

    /// Adds a projectile this peer spawned and runs its initializer
    pub fn add_projectile(&mut self, id: NetworkId, spawn: ProjectileSpawn, clock: SimClock) {
        let mut projectile =
            Projectile::new(id, spawn.owner, spawn.position, spawn.rotation, self.is_server);
        (spawn.init)(&mut projectile, clock);
        self.projectiles.insert(id, projectile);
    }

    /// Rolls back the fire that requested a spawn the transport refused
    pub fn cancel_spawn(&mut self, spawn: &ProjectileSpawn) {
        if let Some(avatar) = self.avatars.get_mut(&spawn.shooter) {
            avatar.cancel_fire(spawn.previous_delay);
        }
    }

    /// Runs one tick for every locally simulated replica
    ///
    /// Projectile spawns requested by avatars are left in `ctx.spawns`; the
    /// returned ids are projectiles whose lifetime ran out.
    pub fn fixed_update(&mut self, ctx: &mut TickContext) -> Vec<NetworkId> {
        for avatar in self.avatars.values_mut() {
            if avatar.role().simulates() {
                avatar.fixed_update_network(ctx);
            }
        }

        let clock = ctx.clock;
        self.projectiles
            .iter_mut()
            .filter_map(|(id, projectile)| projectile.fixed_update_network(clock).then_some(*id))
            .collect()
    }

    pub fn snapshot(&self, tick: Tick) -> Packet {
        Packet::StateSnapshot {
            tick,
            avatars: self
                .avatars
                .iter()
                .map(|(id, avatar)| (*id, *avatar.state()))
                .collect(),
            projectiles: self
                .projectiles
                .iter()
                .map(|(id, projectile)| (*id, *projectile.state()))
                .collect(),
        }
    }

    /// Applies an authoritative snapshot, returning its tick
    ///
    /// Entries for replicas this peer has not created yet are skipped.
    pub fn apply_snapshot(&mut self, packet: &Packet) -> Option<Tick> {
        let Packet::StateSnapshot {
            tick,
            avatars,
            projectiles,
        } = packet
        else {
            return None;
        };

        for (id, state) in avatars {
            if let Some(avatar) = self.avatars.get_mut(id) {
                avatar.apply_replicated(state);
            }
        }
        for (id, state) in projectiles {
            if let Some(projectile) = self.projectiles.get_mut(id) {
                projectile.apply_replicated(state);
            }
        }
        Some(*tick)
    }

    /// Runs the visual pass and returns how many avatars flashed
    pub fn render(&mut self, frame_dt: f32) -> usize {
        self.avatars
            .values_mut()
            .map(|avatar| avatar.render(frame_dt))
            .filter(|flashed| *flashed)
            .count()
    }

    pub fn avatar(&self, id: NetworkId) -> Option<&Avatar> {
        self.avatars.get(&id)
    }

    pub fn avatars(&self) -> impl Iterator<Item = &Avatar> + '_ {
        self.avatars.values()
    }

    pub fn projectile(&self, id: NetworkId) -> Option<&Projectile> {
        self.projectiles.get(&id)
    }

    pub fn projectile_count(&self) -> usize {
        self.projectiles.len()
    }

    /// The avatar this peer controls, if it has been spawned
    pub fn local_avatar(&self) -> Option<&Avatar> {
        self.avatars
            .values()
            .find(|avatar| avatar.role().has_input_authority())
    }

    pub fn local_avatar_mut(&mut self) -> Option<&mut Avatar> {
        self.avatars
            .values_mut()
            .find(|avatar| avatar.role().has_input_authority())
    }

    pub fn clear(&mut self) {
        self.avatars.clear();
        self.projectiles.clear();
    }
}
