//! # GhostNet Client Library
//!
//! The client side of GhostNet: it connects to a server (over the network or
//! in-process), reports the local player's status and position, and mirrors
//! every other player in the same room as a ghost.
//!
//! Drawing ghosts, playing emotes and actually moving the player between
//! areas belong to the embedding game. The client only tells it what
//! happened through [`ClientEvent`](network::ClientEvent)s.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! [`GhostClient`](network::GhostClient): connection setup, frame handling,
//! answers to server requests and the send side of the protocol.
//!
//! ### Ghosts Module (`ghosts`)
//! Which remote players are visible, and what changed when someone moves.
//!
//! ### Chat Module (`chat`)
//! Chat history with local echo and server confirmation.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{ClientEvent, GhostClient};
//! use shared::ConnectionTarget;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let target = ConnectionTarget::parse("example.org:2782")?;
//!     let mut client = GhostClient::connect(&target, "Madeline").await?;
//!     while let Some(event) = client.next_event().await {
//!         if let ClientEvent::Chat(chat) = event {
//!             println!("{}: {}", chat.name, chat.text);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod ghosts;
pub mod network;

pub use network::{ClientError, ClientEvent, GhostClient};
