//! TCP + UDP connection to a remote peer
//!
//! Each remote connection runs its own tasks:
//! - management receive: reads frames off the TCP stream
//! - management transfer: drains the outbound queue onto the TCP stream
//! - update transfer: drains the outbound queue onto the UDP socket
//! - update receive (client side only): reads datagrams from the server
//!
//! On the server the UDP socket is shared by every connection, so datagrams
//! are read by a single server-wide loop that routes them by head instead.

use super::{Connection, ConnectionEvent, ConnectionId, DisposeLatch, EventSender, UpdateFilter};
use crate::chunk::{Chunk, ChunkRegistry};
use crate::chunks::{ChunkMPlayer, ChunkUUpdate};
use crate::error::ProtocolError;
use crate::frame::{read_frame_bytes, Frame};
use log::{debug, info, warn};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

type UpdateItem = (Frame, Option<SocketAddr>);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared between the handle and its tasks.
struct Shared {
    id: ConnectionId,
    events: EventSender,
    latch: DisposeLatch,
    update_endpoint: Mutex<Option<SocketAddr>>,
    /// Newest update index per remote player, reset when a player leaves.
    filter: Mutex<UpdateFilter>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn emit(&self, event: ConnectionEvent) -> bool {
        !self.latch.is_tripped() && self.events.send(event).is_ok()
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = lock(&self.tasks);
        if self.latch.is_tripped() {
            task.abort();
        } else {
            tasks.push(task);
        }
    }

    fn dispose(&self) {
        if !self.latch.trip() {
            return;
        }
        debug!("Disposing connection {}", self.id);
        let _ = self.events.send(ConnectionEvent::Disconnected { from: self.id });
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            task.abort();
        }
    }

    fn endpoint(&self) -> Option<SocketAddr> {
        *lock(&self.update_endpoint)
    }
}

pub struct RemoteConnection {
    shared: Arc<Shared>,
    peer: SocketAddr,
    management_tx: mpsc::UnboundedSender<Frame>,
    update_tx: mpsc::UnboundedSender<UpdateItem>,
}

impl RemoteConnection {
    /// Wraps a freshly accepted TCP stream. Updates go out through the
    /// server's shared UDP socket once the client's endpoint is known.
    pub fn accept(
        id: ConnectionId,
        stream: TcpStream,
        udp: Arc<UdpSocket>,
        registry: Arc<ChunkRegistry>,
        events: EventSender,
    ) -> Result<Arc<Self>, ProtocolError> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        Ok(Self::start(id, peer, stream, udp, registry, events))
    }

    /// Connects to a server. Management goes over TCP, updates over a fresh
    /// UDP socket aimed at the same address.
    pub async fn connect(
        addr: SocketAddr,
        registry: Arc<ChunkRegistry>,
        events: EventSender,
    ) -> Result<Arc<Self>, ProtocolError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        let bind: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let udp = Arc::new(UdpSocket::bind(bind).await?);
        info!(
            "Connected to {} (update socket {})",
            addr,
            udp.local_addr()?
        );

        let connection = Self::start(
            ConnectionId::default(),
            addr,
            stream,
            Arc::clone(&udp),
            Arc::clone(&registry),
            events,
        );
        connection.set_update_endpoint(addr);

        let shared = Arc::clone(&connection.shared);
        let task = tokio::spawn(receive_updates(Arc::clone(&shared), udp, registry, addr));
        shared.track(task);

        Ok(connection)
    }

    fn start(
        id: ConnectionId,
        peer: SocketAddr,
        stream: TcpStream,
        udp: Arc<UdpSocket>,
        registry: Arc<ChunkRegistry>,
        events: EventSender,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            id,
            events,
            latch: DisposeLatch::default(),
            update_endpoint: Mutex::new(None),
            filter: Mutex::new(UpdateFilter::new()),
            tasks: Mutex::new(Vec::new()),
        });
        let (management_tx, management_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let (read, write) = stream.into_split();

        let tasks = [
            tokio::spawn(receive_management(
                Arc::clone(&shared),
                read,
                Arc::clone(&registry),
            )),
            tokio::spawn(transfer_management(
                Arc::clone(&shared),
                write,
                management_rx,
                Arc::clone(&registry),
            )),
            tokio::spawn(transfer_updates(
                Arc::clone(&shared),
                udp,
                update_rx,
                registry,
            )),
        ];
        for task in tasks {
            shared.track(task);
        }

        Arc::new(Self {
            shared,
            peer,
            management_tx,
            update_tx,
        })
    }
}

impl Connection for RemoteConnection {
    fn id(&self) -> ConnectionId {
        self.shared.id
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }

    fn update_endpoint(&self) -> Option<SocketAddr> {
        self.shared.endpoint()
    }

    fn set_update_endpoint(&self, addr: SocketAddr) {
        let mut endpoint = lock(&self.shared.update_endpoint);
        if *endpoint != Some(addr) {
            debug!("Connection {} update endpoint is now {}", self.shared.id, addr);
            *endpoint = Some(addr);
        }
    }

    fn send_management(&self, frame: Frame) {
        if self.is_alive() {
            let _ = self.management_tx.send(frame);
        }
    }

    fn send_update(&self, frame: Frame, target: Option<SocketAddr>) {
        if self.is_alive() {
            let _ = self.update_tx.send((frame, target));
        }
    }

    fn is_alive(&self) -> bool {
        !self.shared.latch.is_tripped()
    }

    fn dispose(&self) {
        self.shared.dispose();
    }
}

impl Drop for RemoteConnection {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

impl fmt::Debug for RemoteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConnection")
            .field("id", &self.shared.id)
            .field("peer", &self.peer)
            .field("update_endpoint", &self.shared.endpoint())
            .field("alive", &self.is_alive())
            .finish()
    }
}

async fn receive_management(shared: Arc<Shared>, read: OwnedReadHalf, registry: Arc<ChunkRegistry>) {
    let mut reader = BufReader::new(read);
    loop {
        let bytes = match read_frame_bytes(&mut reader).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_closed() => {
                info!("Connection {} closed by peer", shared.id);
                break;
            }
            Err(e) => {
                warn!("Connection {} sent an unreadable stream: {}", shared.id, e);
                break;
            }
        };

        // The frame boundary is known, so a bad payload only costs this frame.
        let frame = match Frame::read(&registry, &bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping malformed frame from {}: {}", shared.id, e);
                continue;
            }
        };

        // the slot may be handed to someone new who counts from zero
        if let (Some(player), Some(status)) = (frame.head(), frame.get::<ChunkMPlayer>()) {
            if !status.is_valid() {
                lock(&shared.filter).forget(player);
            }
        }

        if !shared.emit(ConnectionEvent::Management {
            from: shared.id,
            frame,
        }) {
            break;
        }
    }
    shared.dispose();
}

async fn transfer_management(
    shared: Arc<Shared>,
    mut write: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Frame>,
    registry: Arc<ChunkRegistry>,
) {
    while let Some(frame) = queue.recv().await {
        let bytes = match frame.write(&registry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode frame for {}: {}", shared.id, e);
                continue;
            }
        };
        if let Err(e) = write.write_all(&bytes).await {
            if !shared.latch.is_tripped() {
                warn!("Failed to send to {}: {}", shared.id, e);
            }
            break;
        }
    }
    shared.dispose();
}

async fn transfer_updates(
    shared: Arc<Shared>,
    udp: Arc<UdpSocket>,
    mut queue: mpsc::UnboundedReceiver<UpdateItem>,
    registry: Arc<ChunkRegistry>,
) {
    while let Some((frame, target)) = queue.recv().await {
        let Some(addr) = target.or_else(|| shared.endpoint()) else {
            debug!("No update endpoint for {} yet, dropping update", shared.id);
            continue;
        };
        let bytes = match frame.write(&registry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode update for {}: {}", shared.id, e);
                continue;
            }
        };
        if bytes.len() > MAX_DATAGRAM_SIZE {
            warn!(
                "Update for {} is {} bytes, too large for a datagram",
                shared.id,
                bytes.len()
            );
            continue;
        }
        if let Err(e) = udp.send_to(&bytes, addr).await {
            if !shared.latch.is_tripped() {
                warn!("Failed to send update to {} at {}: {}", shared.id, addr, e);
            }
            break;
        }
    }
    shared.dispose();
}

/// Client-side datagram loop. Only datagrams from the server address are
/// accepted, and updates older than the newest seen per player are dropped.
async fn receive_updates(
    shared: Arc<Shared>,
    udp: Arc<UdpSocket>,
    registry: Arc<ChunkRegistry>,
    server: SocketAddr,
) {
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, addr) = match udp.recv_from(&mut buffer).await {
            Ok(received) => received,
            Err(e) => {
                if !shared.latch.is_tripped() {
                    warn!("Update socket for {} failed: {}", shared.id, e);
                }
                break;
            }
        };
        if addr.ip() != server.ip() {
            debug!("Ignoring datagram from unexpected sender {}", addr);
            continue;
        }

        let frame = match Frame::read(&registry, &buffer[..len]) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping malformed datagram from {}: {}", addr, e);
                continue;
            }
        };

        if let (Some(player), Some(update)) = (frame.head(), frame.get::<ChunkUUpdate>()) {
            if !lock(&shared.filter).accept(player, update.update_index) {
                debug!(
                    "Dropping stale update {} for player {}",
                    update.update_index, player
                );
                continue;
            }
        }

        if !shared.emit(ConnectionEvent::Update {
            from: shared.id,
            frame,
            addr: Some(addr),
        }) {
            break;
        }
    }
    shared.dispose();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::ChunkMPlayer;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    async fn recv(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_management_roundtrip_over_tcp() {
        let registry = Arc::new(ChunkRegistry::with_builtin());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_udp = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());

        let (server_tx, mut server_rx) = mpsc::unbounded_channel();
        let (client_tx, mut client_rx) = mpsc::unbounded_channel();

        let client = RemoteConnection::connect(addr, Arc::clone(&registry), client_tx)
            .await
            .unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let server_side = RemoteConnection::accept(
            ConnectionId::new(1, 0),
            stream,
            server_udp,
            Arc::clone(&registry),
            server_tx,
        )
        .unwrap();

        client.send_management(Frame::with(ChunkMPlayer::new("Madeline")));
        match recv(&mut server_rx).await {
            ConnectionEvent::Management { from, frame } => {
                assert_eq!(from, ConnectionId::new(1, 0));
                assert_eq!(frame.get::<ChunkMPlayer>().unwrap().name, "Madeline");
            }
            other => panic!("unexpected event {:?}", other),
        }

        server_side.send_management(Frame::with_head(1));
        match recv(&mut client_rx).await {
            ConnectionEvent::Management { frame, .. } => assert_eq!(frame.head(), Some(1)),
            other => panic!("unexpected event {:?}", other),
        }

        client.dispose();
        assert!(matches!(
            recv(&mut client_rx).await,
            ConnectionEvent::Disconnected { .. }
        ));
        assert!(matches!(
            recv(&mut server_rx).await,
            ConnectionEvent::Disconnected { .. }
        ));
        assert!(!server_side.is_alive());
    }

    #[tokio::test]
    async fn test_update_without_endpoint_is_dropped() {
        let registry = Arc::new(ChunkRegistry::with_builtin());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_udp = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let (server_tx, mut server_rx) = mpsc::unbounded_channel();
        let (client_tx, _client_rx) = mpsc::unbounded_channel();

        let _client = RemoteConnection::connect(addr, Arc::clone(&registry), client_tx)
            .await
            .unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let server_side = RemoteConnection::accept(
            ConnectionId::new(2, 0),
            stream,
            server_udp,
            registry,
            server_tx,
        )
        .unwrap();

        assert_eq!(server_side.update_endpoint(), None);
        server_side.send_update(Frame::with_head(2), None);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(server_side.is_alive());
        assert!(server_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_update_to_explicit_target() {
        let registry = Arc::new(ChunkRegistry::with_builtin());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_udp = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let (server_tx, _server_rx) = mpsc::unbounded_channel();
        let (client_tx, _client_rx) = mpsc::unbounded_channel();

        let _client = RemoteConnection::connect(addr, Arc::clone(&registry), client_tx)
            .await
            .unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let server_side = RemoteConnection::accept(
            ConnectionId::new(3, 0),
            stream,
            server_udp,
            Arc::clone(&registry),
            server_tx,
        )
        .unwrap();

        // no remembered endpoint, but an explicit one still gets the datagram
        let target = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        server_side.send_update(Frame::with_head(3), Some(target.local_addr().unwrap()));

        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, _) = timeout(Duration::from_secs(2), target.recv_from(&mut buffer))
            .await
            .expect("timed out waiting for datagram")
            .unwrap();
        let frame = Frame::read(&registry, &buffer[..len]).unwrap();
        assert_eq!(frame.head(), Some(3));
        assert_eq!(server_side.update_endpoint(), None);
    }
}
