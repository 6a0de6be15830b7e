//! Chat relay through the state authority of an avatar
//!
//! A message travels in two hops:
//! 1. The peer controlling an avatar sends [`Rpc::SendMessage`] to the
//!    avatar's state authority
//! 2. The state authority broadcasts [`Rpc::RelayMessage`] to every peer,
//!    itself included, tagged with the original sender
//!
//! Each receiver formats the line relative to its own player and appends it
//! to its chat display.

use crate::avatar::Avatar;
use crate::chat::ChatDisplay;
use crate::error::RpcError;
use chrono::{Local, NaiveTime};
use log::{debug, info};
use shared::{NetworkId, Packet, PlayerRef, Rpc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcTarget {
    StateAuthority,
    All,
}

/// An outgoing remote call
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub object: NetworkId,
    pub source: PlayerRef,
    pub rpc: Rpc,
    pub target: RpcTarget,
}

impl RpcCall {
    pub fn to_packet(&self) -> Packet {
        Packet::Rpc {
            object: self.object,
            source: self.source,
            rpc: self.rpc.clone(),
        }
    }
}

/// Builds the first hop; only the peer with input authority may send it
pub fn rpc_send_message(
    avatar: &Avatar,
    local_player: PlayerRef,
    message: String,
) -> Result<RpcCall, RpcError> {
    if !avatar.role().has_input_authority() {
        return Err(RpcError::NoInputAuthority {
            object: avatar.id(),
            player: local_player,
        });
    }

    Ok(RpcCall {
        object: avatar.id(),
        source: local_player,
        rpc: Rpc::SendMessage { message },
        target: RpcTarget::StateAuthority,
    })
}

/// Executes an incoming call against the local replica of its avatar
///
/// `source` is the player the transport stamped on the call. A first hop is
/// only accepted from the avatar's input authority and a relay only from the
/// session's state authority. Returns the follow-up broadcast when the call
/// is a first hop accepted by this peer.
pub fn handle_rpc(
    avatar: &Avatar,
    source: PlayerRef,
    rpc: &Rpc,
    local_player: Option<PlayerRef>,
    state_authority: Option<PlayerRef>,
    chat: Option<&mut dyn ChatDisplay>,
) -> Result<Option<RpcCall>, RpcError> {
    match rpc {
        Rpc::SendMessage { message } => {
            if !avatar.role().has_state_authority() {
                return Err(RpcError::NoStateAuthority(avatar.id()));
            }
            if avatar.input_authority() != Some(source) {
                return Err(RpcError::NoInputAuthority {
                    object: avatar.id(),
                    player: source,
                });
            }

            info!("Relaying message from {} via {}", source, avatar.id());
            Ok(Some(RpcCall {
                object: avatar.id(),
                source,
                rpc: Rpc::RelayMessage {
                    message: message.clone(),
                    source,
                },
                target: RpcTarget::All,
            }))
        }
        Rpc::RelayMessage { message, source: sender } => {
            if state_authority != Some(source) {
                return Err(RpcError::NotFromStateAuthority {
                    object: avatar.id(),
                    player: source,
                });
            }

            match chat {
                Some(chat) => chat.append_display_message(format_chat_line(
                    Local::now().time(),
                    message,
                    *sender,
                    local_player,
                )),
                None => debug!("No chat display for message from {}", sender),
            }
            Ok(None)
        }
    }
}

pub fn format_chat_line(
    time: NaiveTime,
    message: &str,
    source: PlayerRef,
    local_player: Option<PlayerRef>,
) -> String {
    let stamp = time.format("%H:%M:%S");
    if local_player == Some(source) {
        format!("[{}] You: {}", stamp, message)
    } else {
        format!("[{}] Player {}: {}", stamp, source.player_id(), message)
    }
}
