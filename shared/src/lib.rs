//! Protocol and transport shared by the GhostNet server and client
//!
//! - [`chunk`]: the chunk trait and the tag registry
//! - [`chunks`]: every built-in chunk type
//! - [`frame`]: the frame container and its wire codec
//! - [`connection`]: local and remote dual-channel connections
//! - [`target`]: parsing of `host[:port]` server addresses

pub mod chunk;
pub mod chunks;
pub mod connection;
pub mod error;
pub mod frame;
pub mod target;

pub use chunk::{AnyChunk, Chunk, ChunkRegistry};
pub use connection::{
    Connection, ConnectionEvent, ConnectionId, EventReceiver, EventSender, LocalConnection,
    RemoteConnection, UpdateFilter,
};
pub use error::ProtocolError;
pub use frame::Frame;
pub use target::ConnectionTarget;

/// Port used for both TCP and UDP when none is given.
pub const DEFAULT_PORT: u16 = 2782;

/// Bumped whenever the wire format of a built-in chunk changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Milliseconds since the Unix epoch, saturating to zero if the clock is
/// before it.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}
