//! # GhostNet Server Library
//!
//! The hub every client connects to. It does not simulate anything itself;
//! it keeps the canonical status of each player and routes frames between
//! them so every client can draw the others as ghosts.
//!
//! ## Module Organization
//!
//! ### Players Module (`players`)
//! Slot allocation for connections, per-player records and the OP list.
//!
//! ### Network Module (`network`)
//! The [`Server`](network::Server): TCP acceptor, shared UDP socket and the
//! event loop that applies the routing rules.
//!
//! ### Requests Module (`requests`)
//! Server-to-client requests answered by the first frame carrying the asked
//! chunk type.
//!
//! ### Commands Module (`commands`)
//! Chat commands typed with the command prefix, plus the same commands from
//! the console.
//!
//! ### Race Module (`race`)
//! Races over a list of areas, driven by status changes and a ticker.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerSettings;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerSettings::default()).await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod network;
pub mod players;
pub mod race;
pub mod requests;

pub use config::ServerSettings;
pub use error::ServerError;
pub use network::Server;
