//! # Arena Game Library
//!
//! Gameplay code for a small tick-synchronized arena game running on top of
//! a client-server session middleware. The middleware supplies sessions,
//! tick scheduling, replication and remote calls; this crate decides what
//! happens inside each tick.
//!
//! ## Core Responsibilities
//!
//! ### Session Lifecycle
//! [`session::LobbyManager`] creates or joins a session exactly once per
//! process, subscribes to lifecycle events and spawns an avatar for every
//! player that joins while it holds state authority.
//!
//! ### Authoritative Simulation
//! Every tick each avatar consumes one input snapshot. Movement runs on
//! every peer that simulates the avatar, while the fire action is gated by a
//! cooldown measured in ticks and only evaluated by the state authority.
//!
//! ### Render Sync
//! Avatars diff their replicated fields once per render pass and flash
//! exactly once for every observed toggle of the fire flag.
//!
//! ### Message Relay
//! Chat messages are sent to the state authority of the sender's avatar,
//! which broadcasts them to every peer.
//!
//! ## Module Organization
//!
//! - `transport`: the middleware seam ([`transport::SessionTransport`]) and session events
//! - `session` / `spawn_registry`: session start-up and join/leave handling
//! - `input` / `camera`: frame-rate input sampling and the view collaborator
//! - `world` / `avatar` / `projectile` / `change_detector`: per-tick simulation
//! - `relay` / `chat`: two-hop chat relay and the bounded chat panel
//! - `loopback` / `peer`: in-process middleware and a multi-peer cluster on top of it
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use game::config::GameConfig;
//! use game::peer::LocalCluster;
//! use game::transport::GameMode;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cluster = LocalCluster::new(GameConfig::default());
//!     cluster.join("host", GameMode::Host).await?;
//!     cluster.join("client", GameMode::Client).await?;
//!
//!     for _ in 0..60 {
//!         cluster.run_tick(1.0 / 60.0)?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod avatar;
pub mod camera;
pub mod change_detector;
pub mod chat;
pub mod config;
pub mod error;
pub mod input;
pub mod loopback;
pub mod peer;
pub mod projectile;
pub mod relay;
pub mod session;
pub mod spawn_registry;
pub mod transport;
pub mod world;
