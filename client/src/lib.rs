//! # Game Client Library
//!
//! Client-side half of the synchronization layer. It keeps a connection to the authoritative
//! server alive, publishes the world state the server streams back and turns that lossy,
//! jittery stream into smooth positions for whatever draws the game.
//!
//! ## Architecture Overview
//!
//! ### Background Networking
//! The [`network::NetworkAgent`] runs its own receive and ping tasks. The frame loop never
//! waits on the socket: it polls the newest snapshot, the newest level change and the
//! latency figures, and sends its own state report once per frame.
//!
//! ### Whole-Snapshot Publishing
//! Every decoded snapshot is wrapped in an `Arc` and swapped into a `watch` channel, so a
//! reader sees either the previous snapshot or the next one, never a mix.
//!
//! ### Reconciliation
//! Remote players and enemies are dead-reckoned along their last known velocity and pulled
//! toward the authoritative position at a fixed exponential rate. Level changes teleport
//! everything. Each snapshot carries the number of level changes seen before it, and the first
//! snapshot of a new level discards all views instead of smoothing across the jump.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! - Connect handshake with retries
//! - Receive task publishing snapshots and level changes
//! - Periodic ping task
//! - Non-blocking outbound reports and requests
//!
//! ### Latency Module (`latency`)
//! Rolling round-trip statistics from ping/pong pairs.
//!
//! ### Reconciliation Module (`reconciliation`)
//! Per-entity display state for remote players and enemies.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{AgentConfig, NetworkAgent};
//! use client::reconciliation::Reconciler;
//! use shared::PlayerReport;
//!
//! # async fn frame_loop() -> Result<(), client::network::ClientError> {
//! let mut agent = NetworkAgent::connect(AgentConfig::default()).await?;
//! let mut reconciler = Reconciler::default();
//! reconciler.set_local_id(agent.player_id());
//!
//! loop {
//!     if let Some(state) = agent.take_snapshot() {
//!         reconciler.apply_snapshot(&state);
//!     }
//!     reconciler.advance(1.0 / 60.0);
//!
//!     agent.send_report(&PlayerReport::default())?;
//!     # break;
//! }
//! # agent.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod latency;
pub mod network;
pub mod reconciliation;
