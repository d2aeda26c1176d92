//! # Airplane Battle Server Library
//!
//! This library provides the authoritative server for the two-player hidden
//! airplane game. Clients send whole-board snapshots over WebSocket; the server
//! pairs them into sessions, decides every shot outcome, and tells each player
//! only what it is entitled to know.
//!
//! ## Core Responsibilities
//!
//! ### Matchmaking
//! Every new connection is seated in the oldest session that still has a free
//! slot, or in a fresh session when none does. The first participant of a
//! session becomes player `"1"`, the second player `"2"`.
//!
//! ### Authoritative Resolution
//! Clients never classify shots. The server compares each new shot against the
//! opponent's stored grid and head positions and records `miss`, `hit` or
//! `head`. A player wins on the third distinct head hit.
//!
//! ### Session Teardown
//! A session is removed from the registry the moment it finishes or loses a
//! participant. Its id is never reused.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! The per-session state machine: placement bookkeeping, turn order, shot
//! resolution and the per-player views sent back to clients.
//!
//! ### Session Manager Module (`session_manager`)
//! The process-wide registry of live sessions and the outbound queues used to
//! reach each participant.
//!
//! ### Matchmaker Module (`matchmaker`)
//! Seats new connections and queues their `init` message.
//!
//! ### Network Module (`network`)
//! WebSocket accept loop, per-connection reader and writer tasks, and the
//! disconnect path.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "0.0.0.0:8000".parse()?,
//!     };
//!
//!     // Accepts connections until the task is dropped.
//!     Server::bind(&config).await?.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! Updates within one session are applied one at a time under that session's
//! mutex. Different sessions proceed in parallel. The registry lock is always
//! taken before a session lock, never while holding one.

pub mod error;
pub mod game;
pub mod matchmaker;
pub mod network;
pub mod session_manager;

pub use error::ServerError;
pub use network::{Server, ServerConfig};
