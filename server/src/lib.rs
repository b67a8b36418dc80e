//! # Room Server Library
//!
//! This library provides the relay server for shared tabletop sessions. Players
//! gather in password-protected rooms run by a game master (GM), move between
//! maps inside a room, chat, and exchange application events. The server keeps
//! the authoritative room membership and fans every relayed message out to the
//! right subset of connections.
//!
//! ## Core Responsibilities
//!
//! ### Room Management
//! Handles the lifecycle of rooms and their members:
//! - Room creation by a GM and password-checked joining
//! - GM disconnect grace period and reconnection under the same name
//! - Room closure once the grace period runs out
//! - Per-room chat history
//!
//! ### Broadcast Fan-out
//! Every relayed message targets one of two audiences: the whole room, or only
//! the room members currently on a given map. The sender never receives its own
//! relayed message.
//!
//! ## Architecture Design
//!
//! ### Single-Owner Event Loop
//! Room state and the player collection are owned by the main loop task. Network
//! tasks only talk to it through channels, so fan-out always reads a consistent
//! snapshot of who is where.
//!
//! ### UDP-Based Communication
//! Packets are bincode-encoded and carried over a single UDP socket. Heartbeats
//! keep connections alive and silent clients are timed out.
//!
//! ## Module Organization
//!
//! - `broadcast`: room and map fan-out over the player collection
//! - `client_manager`: connection tracking, id assignment and timeouts
//! - `config`: server configuration
//! - `lobby`: rooms, members and chat history
//! - `network`: UDP tasks and the main event loop
//! - `throttle`: rate limiting for high-frequency movement relays
//! - `utils`: timestamps, ids and color defaults
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> server::ServerResult<()> {
//!     let config = ServerConfig {
//!         port: 3001,
//!         ..ServerConfig::default()
//!     };
//!
//!     let mut server = Server::new(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! The server uses an event-driven architecture with internal async tasks that handle:
//! - **Network Receiver**: Continuously listens for incoming packets
//! - **Network Sender**: Processes the outgoing packet queue
//! - **Timeout Checker**: Monitors client health and removes inactive connections
//! - **Main Loop**: Applies room changes, fans out messages and sweeps expired rooms

pub mod broadcast;
pub mod client_manager;
pub mod config;
pub mod lobby;
pub mod network;
pub mod throttle;
pub mod utils;

pub type ServerResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
