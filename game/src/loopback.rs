//! In-process session middleware connecting peers that share one process
//!
//! The loopback hub stands in for a real transport when running the demo
//! binary and the integration tests. It handles:
//! - Session rooms keyed by name, with host/client roles and a capacity limit
//! - Player assignment and join/leave/shutdown notifications
//! - Object spawn/despawn, replayed to late joiners
//! - Per-tick input collection for the state authority
//! - Authoritative snapshots and RPC routing, both passed through bincode
//!
//! Every runner created from one hub talks to the others through a shared
//! `Arc<Mutex<_>>`. The lock is only held inside [`LoopbackHub::with`] and
//! never across an await point.

use crate::error::TransportError;
use crate::relay::{RpcCall, RpcTarget};
use crate::transport::{
    GameMode, RunnerFactory, SessionEvent, SessionTransport, ShutdownReason, SpawnRequest,
    StartGameArgs,
};
use crate::world::SimClock;
use async_trait::async_trait;
use log::{debug, info, warn};
use shared::{InputSnapshot, NetworkId, Packet, PlayerRef, Tick};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

type ConnectionId = u32;

/// Object lifecycle notification delivered to every peer in a room
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectEvent {
    Spawned { id: NetworkId, request: SpawnRequest },
    Despawned(NetworkId),
}

/// One running session
#[derive(Debug)]
struct Room {
    /// Connection holding state authority
    host: ConnectionId,
    capacity: u32,
    /// Connected players in join order
    players: BTreeMap<ConnectionId, PlayerRef>,
    next_player: u32,
    tick: Tick,
    /// Live objects and the request they were spawned with
    objects: BTreeMap<NetworkId, SpawnRequest>,
    /// Inputs submitted for the current tick
    inputs: HashMap<PlayerRef, InputSnapshot>,
    /// Latest encoded state snapshot
    snapshot: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Hub {
    tick_rate: u32,
    rooms: HashMap<String, Room>,
    memberships: HashMap<ConnectionId, String>,
    subscribers: HashMap<ConnectionId, Vec<mpsc::UnboundedSender<SessionEvent>>>,
    object_queues: HashMap<ConnectionId, Vec<ObjectEvent>>,
    rpc_inboxes: HashMap<ConnectionId, Vec<Vec<u8>>>,
    next_connection: ConnectionId,
    next_object: u32,
    start_calls: usize,
}

impl Hub {
    fn emit(&mut self, connection: ConnectionId, event: SessionEvent) {
        if let Some(subscribers) = self.subscribers.get_mut(&connection) {
            // Receivers dropped by their owner are forgotten
            subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
        }
    }

    fn room_of(&self, connection: ConnectionId) -> Result<(&String, &Room), TransportError> {
        let name = self
            .memberships
            .get(&connection)
            .ok_or(TransportError::NotRunning)?;
        let room = self.rooms.get(name).ok_or(TransportError::NotRunning)?;
        Ok((name, room))
    }

    fn room_of_mut(&mut self, connection: ConnectionId) -> Result<&mut Room, TransportError> {
        let name = self
            .memberships
            .get(&connection)
            .ok_or(TransportError::NotRunning)?;
        self.rooms.get_mut(name).ok_or(TransportError::NotRunning)
    }

    /// Like [`Hub::room_of_mut`] but only for the room's state authority
    fn hosted_room_mut(&mut self, connection: ConnectionId) -> Result<&mut Room, TransportError> {
        let room = self.room_of_mut(connection)?;
        if room.host != connection {
            return Err(TransportError::NotServer);
        }
        Ok(room)
    }

    fn connections(&self, connection: ConnectionId) -> Vec<ConnectionId> {
        self.room_of(connection)
            .map(|(_, room)| room.players.keys().copied().collect())
            .unwrap_or_default()
    }

    fn open(
        &mut self,
        connection: ConnectionId,
        args: &StartGameArgs,
    ) -> Result<PlayerRef, TransportError> {
        let name = args.session_name.clone();
        let player = match args.game_mode {
            GameMode::Host => {
                if self.rooms.contains_key(&name) {
                    return Err(TransportError::SessionExists(name));
                }
                let mut room = Room {
                    host: connection,
                    capacity: args.player_count.max(1),
                    players: BTreeMap::new(),
                    next_player: 1,
                    tick: 0,
                    objects: BTreeMap::new(),
                    inputs: HashMap::new(),
                    snapshot: None,
                };
                let player = PlayerRef(0);
                room.players.insert(connection, player);
                self.rooms.insert(name.clone(), room);
                info!("Session '{}' created by {}", name, player);
                player
            }
            GameMode::Client => {
                let room = self
                    .rooms
                    .get_mut(&name)
                    .ok_or_else(|| TransportError::SessionNotFound(name.clone()))?;
                if room.players.len() >= room.capacity as usize {
                    return Err(TransportError::SessionFull(name));
                }
                let player = PlayerRef(room.next_player);
                room.next_player += 1;
                room.players.insert(connection, player);

                // Late joiners see every object that already exists
                let replay = room
                    .objects
                    .iter()
                    .map(|(id, request)| ObjectEvent::Spawned {
                        id: *id,
                        request: request.clone(),
                    })
                    .collect::<Vec<_>>();
                self.object_queues
                    .entry(connection)
                    .or_default()
                    .extend(replay);

                info!("{} joined session '{}'", player, name);
                self.emit(connection, SessionEvent::ConnectedToServer);
                player
            }
        };

        self.memberships.insert(connection, name);
        self.emit(connection, SessionEvent::SceneLoadStart);
        Ok(player)
    }

    fn finish_join(&mut self, connection: ConnectionId, player: PlayerRef) {
        self.emit(connection, SessionEvent::SceneLoadDone);
        for peer in self.connections(connection) {
            self.emit(peer, SessionEvent::PlayerJoined(player));
        }
    }

    fn push_object_event(&mut self, connection: ConnectionId, event: ObjectEvent) {
        for peer in self.connections(connection) {
            self.object_queues
                .entry(peer)
                .or_default()
                .push(event.clone());
        }
    }

    fn forget(&mut self, connection: ConnectionId) {
        self.memberships.remove(&connection);
        self.object_queues.remove(&connection);
        self.rpc_inboxes.remove(&connection);
    }

    fn leave(&mut self, connection: ConnectionId) {
        let Some(name) = self.memberships.get(&connection).cloned() else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&name) else {
            self.forget(connection);
            return;
        };

        if room.host == connection {
            let peers = room
                .players
                .keys()
                .copied()
                .filter(|peer| *peer != connection)
                .collect::<Vec<_>>();
            self.rooms.remove(&name);
            info!("Session '{}' closed by host", name);

            for peer in peers {
                self.emit(peer, SessionEvent::DisconnectedFromServer("host shut down".to_string()));
                self.emit(peer, SessionEvent::Shutdown(ShutdownReason::HostShutdown));
                self.forget(peer);
            }
        } else if let Some(player) = room.players.remove(&connection) {
            room.inputs.remove(&player);
            let peers = room.players.keys().copied().collect::<Vec<_>>();
            info!("{} left session '{}'", player, name);

            for peer in peers {
                self.emit(peer, SessionEvent::PlayerLeft(player));
            }
        }

        self.emit(connection, SessionEvent::Shutdown(ShutdownReason::Ok));
        self.forget(connection);
    }
}

/// Shared handle to the loopback hub
#[derive(Debug, Clone)]
pub struct LoopbackHub(Arc<Mutex<Hub>>);

impl LoopbackHub {
    pub fn new(tick_rate: u32) -> Self {
        Self(Arc::new(Mutex::new(Hub {
            tick_rate: tick_rate.max(1),
            ..Hub::default()
        })))
    }

    fn with<T>(&self, f: impl FnOnce(&mut Hub) -> T) -> T {
        let mut hub = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut hub)
    }

    /// Creates a runner with a fresh connection to this hub
    pub fn runner(&self) -> LoopbackRunner {
        let connection = self.with(|hub| {
            let connection = hub.next_connection;
            hub.next_connection += 1;
            connection
        });
        LoopbackRunner {
            hub: self.clone(),
            connection,
            player: None,
            is_server: false,
            provide_input: false,
        }
    }

    /// Number of transport start requests received, successful or not
    pub fn start_calls(&self) -> usize {
        self.with(|hub| hub.start_calls)
    }

    pub fn player_count(&self, session: &str) -> usize {
        self.with(|hub| hub.rooms.get(session).map_or(0, |room| room.players.len()))
    }

    pub fn object_count(&self, session: &str) -> usize {
        self.with(|hub| hub.rooms.get(session).map_or(0, |room| room.objects.len()))
    }
}

/// One peer's connection to the loopback hub
#[derive(Debug)]
pub struct LoopbackRunner {
    hub: LoopbackHub,
    connection: ConnectionId,
    player: Option<PlayerRef>,
    is_server: bool,
    provide_input: bool,
}

impl LoopbackRunner {
    fn ensure_running(&self) -> Result<(), TransportError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(TransportError::NotRunning)
        }
    }

    /// Current simulation clock of the joined session
    pub fn clock(&self) -> Option<SimClock> {
        self.hub.with(|hub| {
            hub.room_of(self.connection)
                .ok()
                .map(|(_, room)| SimClock::new(room.tick, hub.tick_rate))
        })
    }

    /// Advances the session clock; state authority only
    pub fn advance_tick(&self) -> Result<Tick, TransportError> {
        self.hub.with(|hub| {
            let room = hub.hosted_room_mut(self.connection)?;
            room.tick += 1;
            Ok(room.tick)
        })
    }

    /// Submits this peer's input for the current tick
    ///
    /// Ignored while input provision is disabled. A second submission in the
    /// same tick replaces the direction but keeps buttons the state authority
    /// has not consumed yet.
    pub fn submit_input(&self, input: InputSnapshot) -> Result<(), TransportError> {
        self.ensure_running()?;
        if !self.provide_input {
            return Ok(());
        }
        let Some(player) = self.player else {
            return Ok(());
        };
        self.hub.with(|hub| {
            hub.room_of_mut(self.connection)?
                .inputs
                .entry(player)
                .and_modify(|pending| {
                    pending.direction = input.direction;
                    pending.buttons.merge(input.buttons);
                })
                .or_insert(input);
            Ok(())
        })
    }

    /// Player holding state authority in the joined session
    pub fn state_authority(&self) -> Option<PlayerRef> {
        self.hub.with(|hub| {
            hub.room_of(self.connection)
                .ok()
                .and_then(|(_, room)| room.players.get(&room.host).copied())
        })
    }

    /// Collects the inputs submitted for the current tick; state authority only
    ///
    /// Players that submitted nothing are reported with
    /// [`SessionEvent::InputMissing`].
    pub fn inputs_for_tick(&self) -> Result<HashMap<PlayerRef, InputSnapshot>, TransportError> {
        self.hub.with(|hub| {
            let room = hub.hosted_room_mut(self.connection)?;
            let inputs = std::mem::take(&mut room.inputs);
            let missing = room
                .players
                .values()
                .copied()
                .filter(|player| !inputs.contains_key(player))
                .collect::<Vec<_>>();

            for player in missing {
                hub.emit(self.connection, SessionEvent::InputMissing(player));
            }
            Ok(inputs)
        })
    }

    pub fn publish_snapshot(&self, packet: &Packet) -> Result<(), TransportError> {
        let bytes = packet.encode()?;
        self.hub.with(|hub| {
            hub.hosted_room_mut(self.connection)?.snapshot = Some(bytes);
            Ok(())
        })
    }

    pub fn latest_snapshot(&self) -> Result<Option<Packet>, TransportError> {
        let bytes = self.hub.with(|hub| {
            hub.room_of(self.connection)
                .map(|(_, room)| room.snapshot.clone())
        })?;
        Ok(bytes.map(|bytes| Packet::decode(&bytes)).transpose()?)
    }

    /// Routes a remote call to its target peers
    ///
    /// The packet is stamped with this peer's player as the caller.
    pub fn send_rpc(&self, call: &RpcCall) -> Result<(), TransportError> {
        let source = self.player.ok_or(TransportError::NotRunning)?;
        let bytes = Packet::Rpc {
            object: call.object,
            source,
            rpc: call.rpc.clone(),
        }
        .encode()?;

        self.hub.with(|hub| {
            let (_, room) = hub.room_of(self.connection)?;
            let targets = match call.target {
                RpcTarget::StateAuthority => vec![room.host],
                RpcTarget::All => room.players.keys().copied().collect(),
            };
            for target in targets {
                hub.rpc_inboxes
                    .entry(target)
                    .or_default()
                    .push(bytes.clone());
            }
            Ok(())
        })
    }

    pub fn drain_rpcs(&self) -> Result<Vec<Packet>, TransportError> {
        let pending = self.hub.with(|hub| {
            hub.rpc_inboxes
                .remove(&self.connection)
                .unwrap_or_default()
        });
        pending
            .iter()
            .map(|bytes| Packet::decode(bytes).map_err(TransportError::from))
            .collect()
    }

    pub fn drain_object_events(&self) -> Vec<ObjectEvent> {
        self.hub.with(|hub| {
            hub.object_queues
                .remove(&self.connection)
                .unwrap_or_default()
        })
    }
}

#[async_trait]
impl SessionTransport for LoopbackRunner {
    async fn start_game(&mut self, args: StartGameArgs) -> Result<(), TransportError> {
        self.hub.with(|hub| hub.start_calls += 1);
        // Joining completes on a later poll, like a real connection handshake
        tokio::task::yield_now().await;

        let player = self.hub.with(|hub| hub.open(self.connection, &args))?;
        args.scene_manager.load_scene(args.scene);
        self.player = Some(player);
        self.is_server = args.game_mode == GameMode::Host;
        self.hub.with(|hub| hub.finish_join(self.connection, player));

        debug!(
            "Runner {} started as {} ({:?})",
            self.connection, player, args.game_mode
        );
        Ok(())
    }

    fn add_callbacks(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub.with(|hub| {
            hub.subscribers.entry(self.connection).or_default().push(tx);
        });
        rx
    }

    fn set_provide_input(&mut self, provide: bool) {
        self.provide_input = provide;
    }

    fn provides_input(&self) -> bool {
        self.provide_input
    }

    fn is_running(&self) -> bool {
        self.hub
            .with(|hub| hub.memberships.contains_key(&self.connection))
    }

    fn is_server(&self) -> bool {
        self.is_server && self.is_running()
    }

    fn local_player(&self) -> Option<PlayerRef> {
        self.player.filter(|_| self.is_running())
    }

    fn spawn(&mut self, request: SpawnRequest) -> Result<NetworkId, TransportError> {
        self.hub.with(|hub| {
            hub.hosted_room_mut(self.connection)?;
            hub.next_object += 1;
            let id = NetworkId(hub.next_object);

            hub.room_of_mut(self.connection)?
                .objects
                .insert(id, request.clone());
            hub.push_object_event(self.connection, ObjectEvent::Spawned { id, request });
            Ok(id)
        })
    }

    fn despawn(&mut self, id: NetworkId) -> Result<(), TransportError> {
        self.hub.with(|hub| {
            let room = hub.hosted_room_mut(self.connection)?;
            if room.objects.remove(&id).is_none() {
                return Err(TransportError::UnknownObject(id));
            }
            hub.push_object_event(self.connection, ObjectEvent::Despawned(id));
            Ok(())
        })
    }

    fn shutdown(&mut self) {
        if !self.is_running() {
            warn!("Runner {} shut down while not running", self.connection);
            return;
        }
        self.hub.with(|hub| hub.leave(self.connection));
        self.player = None;
        self.is_server = false;
    }
}

/// Hands out loopback runners that all join the same hub
#[derive(Debug, Clone)]
pub struct LoopbackFactory {
    hub: LoopbackHub,
}

impl LoopbackFactory {
    pub fn new(hub: LoopbackHub) -> Self {
        Self { hub }
    }
}

impl RunnerFactory for LoopbackFactory {
    type Runner = LoopbackRunner;

    fn create_runner(&self) -> LoopbackRunner {
        self.hub.runner()
    }
}
