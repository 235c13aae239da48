//! Dual-channel connections
//!
//! Every connection carries two logical channels:
//! - **management**: reliable and ordered, for status, chat and commands
//! - **update**: best-effort, for frequent position updates
//!
//! Two variants implement [`Connection`]:
//! - [`LocalConnection`]: an in-process pair used when the client hosts the
//!   server itself. Sending hands the frame straight to the other end.
//! - [`RemoteConnection`]: TCP for management frames, UDP for update frames.
//!   Outbound frames are queued on unbounded channels and written by
//!   dedicated tasks, so sending never blocks the caller.
//!
//! Incoming frames and disconnects are reported as [`ConnectionEvent`]s on
//! the channel handed to the connection by its owner.

mod filter;
mod local;
mod remote;

pub use filter::UpdateFilter;
pub use local::LocalConnection;
pub use remote::{RemoteConnection, MAX_DATAGRAM_SIZE};

use crate::frame::Frame;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Slot index plus generation. The server allocates these; the index is the
/// player id seen on the wire, the generation keeps events from a previous
/// occupant of the same slot from touching the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ConnectionId {
    pub index: u32,
    pub generation: u32,
}

impl ConnectionId {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn player_id(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
pub enum ConnectionEvent {
    Management {
        from: ConnectionId,
        frame: Frame,
    },
    Update {
        from: ConnectionId,
        frame: Frame,
        /// Datagram source, when the frame arrived over UDP.
        addr: Option<SocketAddr>,
    },
    Disconnected {
        from: ConnectionId,
    },
}

impl ConnectionEvent {
    pub fn from(&self) -> ConnectionId {
        match self {
            ConnectionEvent::Management { from, .. }
            | ConnectionEvent::Update { from, .. }
            | ConnectionEvent::Disconnected { from } => *from,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<ConnectionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;

pub trait Connection: Send + Sync + fmt::Debug {
    fn id(&self) -> ConnectionId;

    /// Remote TCP peer; `None` for local connections.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Where update frames go when no explicit target is given.
    fn update_endpoint(&self) -> Option<SocketAddr>;

    fn set_update_endpoint(&self, addr: SocketAddr);

    /// Queues a frame on the reliable channel.
    fn send_management(&self, frame: Frame);

    /// Queues a frame on the unreliable channel, to `target` or the
    /// remembered update endpoint. The bundled server and client always pass
    /// `None`; an explicit target is for owners that track peer addresses
    /// themselves. Local connections ignore it.
    fn send_update(&self, frame: Frame, target: Option<SocketAddr>);

    fn is_alive(&self) -> bool;

    /// Closes both channels. Safe to call any number of times; only the
    /// first call reports `Disconnected`. Queued frames are dropped.
    fn dispose(&self);
}

/// One-shot disposal latch.
#[derive(Debug, Default)]
pub(crate) struct DisposeLatch(AtomicBool);

impl DisposeLatch {
    /// True exactly once, for the caller that flips the latch.
    pub(crate) fn trip(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
