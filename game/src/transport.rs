//! The seam between gameplay code and the networking middleware
//!
//! Everything the session coordinator needs from the transport is expressed
//! by [`SessionTransport`]. Lifecycle notifications are delivered as
//! [`SessionEvent`] values through a channel handed out by
//! [`SessionTransport::add_callbacks`], so consumers only match the events
//! they care about.

use crate::error::TransportError;
use async_trait::async_trait;
use glam::{Quat, Vec3};
use log::info;
use shared::{NetworkId, PlayerRef};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameMode {
    Host,
    Client,
}

/// Index into the configured build list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneRef(i32);

impl SceneRef {
    pub const NONE: SceneRef = SceneRef(-1);

    pub fn from_index(index: usize) -> Self {
        i32::try_from(index).map(SceneRef).unwrap_or(SceneRef::NONE)
    }

    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }

    pub fn index(&self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

/// Loads the session scene on behalf of the transport
#[derive(Debug, Default)]
pub struct SceneManager {
    loaded: Mutex<Option<SceneRef>>,
}

impl SceneManager {
    pub fn load_scene(&self, scene: SceneRef) {
        info!("Loading scene {:?}", scene);
        *self.loaded.lock().unwrap_or_else(PoisonError::into_inner) = Some(scene);
    }

    pub fn current_scene(&self) -> Option<SceneRef> {
        *self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone)]
pub struct StartGameArgs {
    pub game_mode: GameMode,
    pub session_name: String,
    pub scene: SceneRef,
    pub scene_manager: Arc<SceneManager>,
    pub player_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Ok,
    HostShutdown,
}

/// Session lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    PlayerJoined(PlayerRef),
    PlayerLeft(PlayerRef),
    ConnectedToServer,
    DisconnectedFromServer(String),
    ConnectFailed(String),
    SceneLoadStart,
    SceneLoadDone,
    InputMissing(PlayerRef),
    Shutdown(ShutdownReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prefab {
    Player,
    Ball,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    pub prefab: Prefab,
    pub position: Vec3,
    pub rotation: Quat,
    pub input_authority: Option<PlayerRef>,
}

impl SpawnRequest {
    pub fn player(position: Vec3, owner: PlayerRef) -> Self {
        Self {
            prefab: Prefab::Player,
            position,
            rotation: Quat::IDENTITY,
            input_authority: Some(owner),
        }
    }
}

/// Session-level operations of the networking middleware
#[async_trait]
pub trait SessionTransport: Send {
    /// Creates (host) or joins (client) a session
    async fn start_game(&mut self, args: StartGameArgs) -> Result<(), TransportError>;

    /// Registers a new sink for lifecycle events.
    ///
    /// Every call adds another subscriber, so callers must register once.
    fn add_callbacks(&mut self) -> mpsc::UnboundedReceiver<SessionEvent>;

    fn set_provide_input(&mut self, provide: bool);

    fn provides_input(&self) -> bool;

    fn is_running(&self) -> bool;

    /// True when this peer holds session and state authority
    fn is_server(&self) -> bool;

    fn local_player(&self) -> Option<PlayerRef>;

    fn spawn(&mut self, request: SpawnRequest) -> Result<NetworkId, TransportError>;

    fn despawn(&mut self, id: NetworkId) -> Result<(), TransportError>;

    fn shutdown(&mut self);
}

/// Creates the transport and scene manager for a coordinator
pub trait RunnerFactory {
    type Runner: SessionTransport;

    fn create_runner(&self) -> Self::Runner;

    fn create_scene_manager(&self) -> Arc<SceneManager> {
        Arc::new(SceneManager::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_ref_validity() {
        let scene = SceneRef::from_index(2);
        assert!(scene.is_valid());
        assert_eq!(scene.index(), Some(2));

        assert!(!SceneRef::NONE.is_valid());
        assert_eq!(SceneRef::NONE.index(), None);
        assert!(!SceneRef::from_index(usize::MAX).is_valid());
    }

    #[test]
    fn test_scene_manager_records_loaded_scene() {
        let manager = SceneManager::default();
        assert_eq!(manager.current_scene(), None);
        manager.load_scene(SceneRef::from_index(1));
        assert_eq!(manager.current_scene(), Some(SceneRef::from_index(1)));
    }

    #[test]
    fn test_player_spawn_request() {
        let request = SpawnRequest::player(Vec3::new(3.0, 10.0, 0.0), PlayerRef(1));
        assert_eq!(request.prefab, Prefab::Player);
        assert_eq!(request.rotation, Quat::IDENTITY);
        assert_eq!(request.input_authority, Some(PlayerRef(1)));
    }
}
