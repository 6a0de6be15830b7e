//! Error types for session start-up, the transport seam and remote calls

use crate::transport::SceneRef;
use shared::{NetworkId, PlayerRef};
use thiserror::Error;

/// Reasons a session start request is refused or fails
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a session start is already in progress")]
    AlreadyStarting,
    #[error("the runner is already running")]
    AlreadyRunning,
    #[error("scene '{0}' not found in the build list")]
    SceneNotFound(String),
    #[error("scene reference {0:?} is invalid")]
    InvalidScene(SceneRef),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Guard rejections leave all session state untouched
    pub fn is_guard_rejection(&self) -> bool {
        matches!(self, SessionError::AlreadyStarting | SessionError::AlreadyRunning)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("session '{0}' already exists")]
    SessionExists(String),
    #[error("session '{0}' not found")]
    SessionNotFound(String),
    #[error("session '{0}' is full")]
    SessionFull(String),
    #[error("runner is not running")]
    NotRunning,
    #[error("operation requires state authority")]
    NotServer,
    #[error("unknown object {0}")]
    UnknownObject(NetworkId),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("{player} has no input authority over {object}")]
    NoInputAuthority { object: NetworkId, player: PlayerRef },
    #[error("{0} is not owned by this peer's state authority")]
    NoStateAuthority(NetworkId),
    #[error("{player} is not the state authority of {object}")]
    NotFromStateAuthority { object: NetworkId, player: PlayerRef },
}
