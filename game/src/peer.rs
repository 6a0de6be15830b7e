//! A game peer and an in-process cluster of them
//!
//! A [`Peer`] bundles everything one process runs: the session coordinator,
//! local input, the replicated world, and the optional chat and camera
//! collaborators. [`LocalCluster`] drives several peers on one loopback hub
//! through the phases of a tick, in this order:
//! 1. Session and object events
//! 2. Pending remote calls
//! 3. Input for this tick
//! 4. Simulation, state authority first
//! 5. Snapshot publish and apply
//! 6. Render pass
//! 7. Clock advance

use crate::camera::{CameraRig, FixedYawCamera};
use crate::chat::{ChatDisplay, ChatPanel};
use crate::config::GameConfig;
use crate::error::{SessionError, TransportError};
use crate::input::{InputManager, RawInput};
use crate::loopback::{LoopbackFactory, LoopbackHub, ObjectEvent};
use crate::relay::{handle_rpc, rpc_send_message};
use crate::session::LobbyManager;
use crate::transport::{GameMode, SessionTransport};
use crate::world::{ProjectileSpawn, SimClock, TickContext, World};
use log::{debug, info, warn};
use shared::{InputSnapshot, NetworkId, Packet, PlayerRef};
use std::collections::HashMap;

pub struct Peer {
    name: String,
    lobby: LobbyManager<LoopbackFactory>,
    input: InputManager,
    /// Input this peer produced for the current tick, kept for prediction
    tick_input: Option<InputSnapshot>,
    world: World,
    chat: Option<ChatPanel>,
    camera: Option<Box<dyn CameraRig>>,
    flashes: usize,
}

impl Peer {
    pub fn new(name: impl Into<String>, config: GameConfig, factory: LoopbackFactory) -> Self {
        Self {
            name: name.into(),
            lobby: LobbyManager::new(config, factory),
            input: InputManager::new(),
            tick_input: None,
            world: World::new(),
            chat: None,
            camera: None,
            flashes: 0,
        }
    }

    pub fn with_chat(mut self, chat: ChatPanel) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn with_camera(mut self, camera: Box<dyn CameraRig>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lobby(&self) -> &LobbyManager<LoopbackFactory> {
        &self.lobby
    }

    pub fn lobby_mut(&mut self) -> &mut LobbyManager<LoopbackFactory> {
        &mut self.lobby
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn chat(&self) -> Option<&ChatPanel> {
        self.chat.as_ref()
    }

    pub fn chat_mut(&mut self) -> Option<&mut ChatPanel> {
        self.chat.as_mut()
    }

    pub fn is_server(&self) -> bool {
        self.world.is_server()
    }

    pub fn local_player(&mut self) -> Option<PlayerRef> {
        self.lobby
            .runner_mut()
            .and_then(|runner| runner.local_player())
    }

    /// Total number of flashes rendered by this peer
    pub fn flash_count(&self) -> usize {
        self.flashes
    }

    pub async fn start(&self, mode: GameMode) -> Result<(), SessionError> {
        self.lobby.start_game(mode).await
    }

    /// Feeds one render frame of local keys
    pub fn frame_input(&mut self, raw: RawInput) {
        self.input.update(raw);
    }

    /// Handles session events and applies spawned or despawned objects
    pub fn poll(&mut self) {
        self.lobby.pump_events();

        let Some(runner) = self.lobby.runner_mut() else {
            return;
        };
        if !runner.is_running() {
            if self.world.avatars().next().is_some() {
                info!("[{}] Session ended, clearing world", self.name);
                self.world.clear();
            }
            return;
        }

        self.world
            .set_authority(runner.is_server(), runner.local_player());
        for event in runner.drain_object_events() {
            match event {
                ObjectEvent::Spawned { id, request } => {
                    if self.world.on_spawned(id, &request) {
                        if let Some(camera) = self.camera.as_mut() {
                            camera.set_target(id);
                        }
                    }
                }
                ObjectEvent::Despawned(id) => self.world.on_despawned(id),
            }
        }
    }

    /// Executes remote calls addressed to this peer
    ///
    /// Calls for objects this peer does not know and calls rejected by the
    /// authority checks are logged and dropped.
    pub fn dispatch_rpcs(&mut self) -> Result<(), TransportError> {
        let Some(runner) = self.lobby.runner_mut() else {
            return Ok(());
        };
        if !runner.is_running() {
            return Ok(());
        }

        let local_player = runner.local_player();
        let state_authority = runner.state_authority();
        for packet in runner.drain_rpcs()? {
            let Packet::Rpc {
                object,
                source,
                rpc,
            } = packet
            else {
                continue;
            };
            let Some(avatar) = self.world.avatar(object) else {
                warn!("[{}] RPC for unknown object {}", self.name, object);
                continue;
            };

            let chat = self.chat.as_mut().map(|chat| chat as &mut dyn ChatDisplay);
            match handle_rpc(avatar, source, &rpc, local_player, state_authority, chat) {
                Ok(Some(call)) => runner.send_rpc(&call)?,
                Ok(None) => {}
                Err(e) => warn!("[{}] Dropped RPC: {}", self.name, e),
            }
        }
        Ok(())
    }

    /// Samples this tick's input and hands it to the transport
    ///
    /// While the transport takes no input the latched keys are left for a
    /// later tick.
    pub fn provide_input(&mut self) -> Result<(), TransportError> {
        let Some(runner) = self.lobby.runner_mut() else {
            return Ok(());
        };
        if !runner.is_running() || !runner.provides_input() {
            return Ok(());
        }

        let snapshot = self.input.fill_input(self.camera.as_deref());
        runner.submit_input(snapshot)?;
        self.tick_input = Some(snapshot);
        Ok(())
    }

    /// Runs one simulation tick
    ///
    /// The state authority simulates every avatar from the collected inputs
    /// and turns fire actions into projectile spawns. Other peers predict
    /// their own avatar from local input only.
    pub fn simulate(&mut self) -> Result<(), TransportError> {
        let tick_input = self.tick_input.take();
        let Some(runner) = self.lobby.runner_mut() else {
            return Ok(());
        };
        let Some(clock) = runner.clock() else {
            return Ok(());
        };

        let inputs = if runner.is_server() {
            runner.inputs_for_tick()?
        } else {
            runner
                .local_player()
                .zip(tick_input)
                .into_iter()
                .collect::<HashMap<_, _>>()
        };

        let mut ctx = TickContext::new(clock, inputs);
        let expired = self.world.fixed_update(&mut ctx);
        if runner.is_server() {
            commit_tick(&self.name, &mut self.world, runner, clock, ctx.spawns, expired);
        }
        Ok(())
    }

    /// Publishes (state authority) or applies (everyone else) the latest snapshot
    pub fn sync(&mut self) -> Result<(), TransportError> {
        let Some(runner) = self.lobby.runner_mut() else {
            return Ok(());
        };
        let Some(clock) = runner.clock() else {
            return Ok(());
        };

        if runner.is_server() {
            runner.publish_snapshot(&self.world.snapshot(clock.tick))
        } else {
            if let Some(packet) = runner.latest_snapshot()? {
                self.world.apply_snapshot(&packet);
            }
            Ok(())
        }
    }

    pub fn render(&mut self, frame_dt: f32) -> usize {
        let flashed = self.world.render(frame_dt);
        self.flashes += flashed;
        flashed
    }

    pub fn advance_tick(&mut self) -> Result<(), TransportError> {
        match self.lobby.runner_mut() {
            Some(runner) if runner.is_server() => runner.advance_tick().map(|_| ()),
            _ => Ok(()),
        }
    }

    /// Sends the chat panel's input field through the local avatar
    ///
    /// Returns false when nothing was sent: no chat panel, blank input, or no
    /// avatar under local control.
    pub fn send_chat(&mut self) -> Result<bool, TransportError> {
        let Some(message) = self.chat.as_mut().and_then(ChatPanel::take_outgoing) else {
            return Ok(false);
        };
        self.send_message(message)
    }

    pub fn send_message(&mut self, message: String) -> Result<bool, TransportError> {
        let Some(avatar) = self.world.local_avatar() else {
            return Ok(false);
        };
        let Some(runner) = self.lobby.runner_mut() else {
            return Ok(false);
        };
        let Some(player) = runner.local_player() else {
            return Ok(false);
        };

        match rpc_send_message(avatar, player, message) {
            Ok(call) => {
                runner.send_rpc(&call)?;
                Ok(true)
            }
            Err(e) => {
                warn!("[{}] Message not sent: {}", self.name, e);
                Ok(false)
            }
        }
    }

    pub fn shutdown(&mut self) {
        self.lobby.shutdown();
        self.world.clear();
    }
}

/// Hands the projectile spawns and expiries of one tick to the transport
///
/// A refused spawn is rolled back on the avatar that fired, so its cooldown
/// and flash toggle never change without a live projectile. Returns how many
/// spawns were refused.
fn commit_tick<T: SessionTransport + ?Sized>(
    name: &str,
    world: &mut World,
    transport: &mut T,
    clock: SimClock,
    spawns: Vec<ProjectileSpawn>,
    expired: Vec<NetworkId>,
) -> usize {
    let mut refused = 0;
    for spawn in spawns {
        match transport.spawn(spawn.request()) {
            Ok(id) => {
                debug!("[{}] Spawned projectile {}", name, id);
                world.add_projectile(id, spawn, clock);
            }
            Err(e) => {
                warn!("[{}] Projectile for {} refused: {}", name, spawn.shooter, e);
                world.cancel_spawn(&spawn);
                refused += 1;
            }
        }
    }

    for id in expired {
        if let Err(e) = transport.despawn(id) {
            warn!("[{}] Failed to despawn {}: {}", name, id, e);
        }
        world.on_despawned(id);
    }
    refused
}

/// Several peers sharing one loopback hub
pub struct LocalCluster {
    hub: LoopbackHub,
    config: GameConfig,
    peers: Vec<Peer>,
}

impl LocalCluster {
    pub fn new(config: GameConfig) -> Self {
        Self {
            hub: LoopbackHub::new(config.tick_rate),
            config,
            peers: Vec::new(),
        }
    }

    pub fn hub(&self) -> &LoopbackHub {
        &self.hub
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Creates a peer with a chat panel and a fixed camera, without starting it
    pub fn create_peer(&self, name: impl Into<String>) -> Peer {
        Peer::new(name, self.config.clone(), LoopbackFactory::new(self.hub.clone()))
            .with_chat(ChatPanel::new(self.config.max_chat_messages))
            .with_camera(Box::new(FixedYawCamera::default()))
    }

    /// Starts a new peer in the given mode and adds it to the cluster
    pub async fn join(
        &mut self,
        name: impl Into<String>,
        mode: GameMode,
    ) -> Result<usize, SessionError> {
        let peer = self.create_peer(name);
        peer.start(mode).await?;
        info!("[{}] Started as {:?}", peer.name(), mode);
        self.peers.push(peer);
        Ok(self.peers.len() - 1)
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn peer(&self, index: usize) -> Option<&Peer> {
        self.peers.get(index)
    }

    pub fn peer_mut(&mut self, index: usize) -> Option<&mut Peer> {
        self.peers.get_mut(index)
    }

    /// Shuts a peer down and removes it from the cluster
    pub fn leave(&mut self, index: usize) -> Option<Peer> {
        if index >= self.peers.len() {
            return None;
        }
        let mut peer = self.peers.remove(index);
        peer.shutdown();
        Some(peer)
    }

    /// Runs every tick phase across all peers
    pub fn run_tick(&mut self, frame_dt: f32) -> Result<(), TransportError> {
        for peer in &mut self.peers {
            peer.poll();
        }
        for peer in &mut self.peers {
            peer.dispatch_rpcs()?;
        }
        for peer in &mut self.peers {
            peer.provide_input()?;
        }

        for authority in [true, false] {
            for peer in self.peers.iter_mut().filter(|p| p.is_server() == authority) {
                peer.simulate()?;
            }
        }
        for authority in [true, false] {
            for peer in self.peers.iter_mut().filter(|p| p.is_server() == authority) {
                peer.sync()?;
            }
        }

        for peer in &mut self.peers {
            peer.render(frame_dt);
        }
        for peer in &mut self.peers {
            peer.advance_tick()?;
        }
        Ok(())
    }
}
