//! In-process connection pair

use super::{Connection, ConnectionEvent, ConnectionId, DisposeLatch, EventSender};
use crate::frame::Frame;
use log::debug;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

struct End {
    id: ConnectionId,
    events: EventSender,
}

struct Link {
    ends: [End; 2],
    latch: DisposeLatch,
}

/// One end of an in-process link. Frames sent on either channel are handed
/// to the other end's owner immediately; since `send_*` takes the frame by
/// value the receiver always owns an independent copy.
pub struct LocalConnection {
    link: Arc<Link>,
    side: usize,
}

impl LocalConnection {
    /// Builds both ends. `a_events` receives what `b` sends and vice versa.
    pub fn pair(
        a_id: ConnectionId,
        a_events: EventSender,
        b_id: ConnectionId,
        b_events: EventSender,
    ) -> (Arc<LocalConnection>, Arc<LocalConnection>) {
        let link = Arc::new(Link {
            ends: [
                End {
                    id: a_id,
                    events: a_events,
                },
                End {
                    id: b_id,
                    events: b_events,
                },
            ],
            latch: DisposeLatch::default(),
        });
        (
            Arc::new(LocalConnection {
                link: Arc::clone(&link),
                side: 0,
            }),
            Arc::new(LocalConnection { link, side: 1 }),
        )
    }

    fn other(&self) -> &End {
        &self.link.ends[1 - self.side]
    }

    fn deliver(&self, event: ConnectionEvent) {
        if self.link.latch.is_tripped() {
            return;
        }
        if self.other().events.send(event).is_err() {
            debug!("Local peer of {} is gone, disposing", self.id());
            self.dispose();
        }
    }
}

impl Connection for LocalConnection {
    fn id(&self) -> ConnectionId {
        self.link.ends[self.side].id
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn update_endpoint(&self) -> Option<SocketAddr> {
        None
    }

    fn set_update_endpoint(&self, _addr: SocketAddr) {}

    fn send_management(&self, frame: Frame) {
        let from = self.other().id;
        self.deliver(ConnectionEvent::Management { from, frame });
    }

    fn send_update(&self, frame: Frame, _target: Option<SocketAddr>) {
        let from = self.other().id;
        self.deliver(ConnectionEvent::Update {
            from,
            frame,
            addr: None,
        });
    }

    fn is_alive(&self) -> bool {
        !self.link.latch.is_tripped()
    }

    fn dispose(&self) {
        if !self.link.latch.trip() {
            return;
        }
        for end in &self.link.ends {
            let _ = end.events.send(ConnectionEvent::Disconnected { from: end.id });
        }
    }
}

impl fmt::Debug for LocalConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalConnection")
            .field("id", &self.id())
            .field("alive", &self.is_alive())
            .finish()
    }
}
