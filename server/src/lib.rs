//! # Race Server Library
//!
//! Authoritative multiplayer backbone for the racing game. The server admits
//! players into a lobby, negotiates unique nicknames, counts down to the race
//! and then relays every racer's vehicle state to every other racer at a fixed
//! tick rate.
//!
//! ## Transports
//!
//! ### Control Plane (TCP)
//! Lobby membership, nicknames, countdowns, race start, lap reports. Packets
//! are small, framed by a 2-byte header and must arrive in order.
//!
//! ### Data Plane (UDP)
//! Vehicle snapshots. Each datagram carries a sequence id and a CRC32; stale
//! or corrupted datagrams are dropped, never repaired.
//!
//! ## Match Lifecycle
//!
//! `Lobby -> Running -> Finished -> Lobby`. The lobby countdown starts when the
//! first player joins. When it expires the lobby moves onto the grid and the
//! match loop starts relaying states. The match finishes once every racer has
//! completed the configured laps or nobody is left racing; the registry is then
//! cleared and the lobby reopens. The process itself never exits on match end.
//!
//! ## Module Organization
//!
//! - `client_manager`: registry of sessions indexed by id, TCP peer and UDP address
//! - `control`: TCP accept/dispatch loop and the per-session join flow
//! - `data`: UDP receive loop, handshake and state intake
//! - `match_loop`: 32 Hz fan-out of the newest states
//! - `lifecycle`: match phase and lobby countdown
//! - `context`: state shared between the tasks above
//! - `network`: socket binding and the match supervisor
//! - `config`: server settings
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     server.run().await
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod context;
pub mod control;
pub mod data;
pub mod lifecycle;
pub mod match_loop;
pub mod network;
