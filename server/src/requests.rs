//! Request/response correlation
//!
//! The server asks one connection for a chunk type and waits until that
//! connection sends any frame containing it. Waiters are keyed by connection
//! and tag; a disconnect drops every waiter for that connection, which the
//! awaiting side sees as a closed channel.

use shared::{ConnectionId, Frame};
use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex};

#[derive(Debug, Default)]
pub struct PendingRequests {
    waiting: Mutex<HashMap<(ConnectionId, &'static str), Vec<oneshot::Sender<Frame>>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, from: ConnectionId, tag: &'static str) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        let mut waiting = self.waiting.lock().await;
        let waiters = waiting.entry((from, tag)).or_default();
        // waiters that timed out leave closed senders behind
        waiters.retain(|waiter| !waiter.is_closed());
        waiters.push(tx);
        rx
    }

    /// Hands `frame` to everyone waiting on `from` for a tag it contains.
    /// Returns how many waiters were woken.
    pub async fn resolve(&self, from: ConnectionId, frame: &Frame) -> usize {
        let mut waiting = self.waiting.lock().await;
        if waiting.is_empty() {
            return 0;
        }
        let mut woken = 0;
        for tag in frame.tags() {
            if let Some(waiters) = waiting.remove(&(from, tag)) {
                for waiter in waiters {
                    if waiter.send(frame.clone()).is_ok() {
                        woken += 1;
                    }
                }
            }
        }
        woken
    }

    /// Fails every pending request for a connection.
    pub async fn cancel(&self, from: ConnectionId) {
        self.waiting.lock().await.retain(|(id, _), _| *id != from);
    }

    pub async fn len(&self) -> usize {
        self.waiting.lock().await.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::chunks::{ChunkMPlayer, ChunkMSession};
    use shared::Chunk;

    #[tokio::test]
    async fn test_resolve_matching_tag() {
        let requests = PendingRequests::new();
        let id = ConnectionId::new(1, 0);
        let rx = requests.register(id, ChunkMSession::TAG).await;

        // frames without the tag leave the waiter alone
        let other = Frame::with(ChunkMPlayer::new("x"));
        assert_eq!(requests.resolve(id, &other).await, 0);

        let mut session = ChunkMSession::none();
        session.in_session = true;
        let answer = Frame::with(session);
        assert_eq!(requests.resolve(id, &answer).await, 1);

        let frame = rx.await.unwrap();
        assert!(frame.get::<ChunkMSession>().unwrap().in_session);
        assert_eq!(requests.len().await, 0);
    }

    #[tokio::test]
    async fn test_other_connection_does_not_resolve() {
        let requests = PendingRequests::new();
        let _rx = requests
            .register(ConnectionId::new(1, 0), ChunkMSession::TAG)
            .await;
        let answer = Frame::with(ChunkMSession::none());
        assert_eq!(requests.resolve(ConnectionId::new(2, 0), &answer).await, 0);
        assert_eq!(requests.len().await, 1);
    }

    #[test]
    fn test_cancel_fails_waiters() {
        tokio_test::block_on(async {
            let requests = PendingRequests::new();
            let id = ConnectionId::new(3, 1);
            let rx = requests.register(id, ChunkMSession::TAG).await;
            requests.cancel(id).await;
            assert!(rx.await.is_err());
        });
    }
}
