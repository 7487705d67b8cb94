//! # Game Server Library
//!
//! Authoritative server for the tile-world action game. It owns the shared world state
//! (connected players, AI-controlled enemies and the active level), ticks the enemy
//! simulation at a fixed rate and streams one snapshot per tick to every connected endpoint.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Enemies
//! Players simulate their own movement and report it; the server stores those reports
//! as-is. Enemies, on the other hand, live only here: their movement, targeting and
//! lifetime are decided by the server and mirrored by clients.
//!
//! ### Session Management
//! Maps transport endpoints to stable player ids. Connecting twice from the same endpoint
//! yields the same id; reports from unknown endpoints never create a session.
//!
//! ### Level Orchestration
//! Exactly one level is active. Switching levels replaces the tile grid, repopulates the
//! enemies from the new spawners and moves every player to the new start, all between two
//! ticks so the AI never sees a half-loaded level.
//!
//! ## Architecture Design
//!
//! ### Single Owner Event Loop
//! One task owns the [`game::World`]. Inbound datagrams are decoded by a receiver task and
//! forwarded over a channel; outbound datagrams are handed to a sender task. Message handling
//! and ticking share the one loop, so they can never race.
//!
//! ### UDP-Based Communication
//! Fire-and-forget datagrams with a compact binary layout (see `shared::protocol`). Lost
//! snapshots are simply superseded by the next one.
//!
//! ## Module Organization
//!
//! - `tilemap`: sparse tile grid, solidity queries and axis-separated movement
//! - `level`: level files, spawner markers and level sources
//! - `raycast`: line of sight and wall-avoidance rays
//! - `enemy`: per-enemy wander/chase state machine
//! - `ai`: the enemy table, ticked in id order
//! - `session_manager`: endpoint to player bindings and reported state
//! - `game`: transport-free world rules
//! - `network`: sockets, channels and the main loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:5006".to_string(),
//!         ..ServerConfig::default()
//!     };
//!
//!     // Loads data/maps/0.json, then ticks at 30Hz until shut down
//!     let mut server = Server::new(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Trust Boundary
//!
//! Enemy removal requests are taken at face value: the server does not check that the
//! requesting player could actually have hit the enemy. This is acceptable for cooperative
//! play only.

pub mod ai;
pub mod enemy;
pub mod game;
pub mod level;
pub mod network;
pub mod raycast;
pub mod session_manager;
pub mod tilemap;
