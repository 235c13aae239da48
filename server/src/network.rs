//! Server network layer: accepting connections and routing frames
//!
//! All connection events funnel into one channel drained by the event loop in
//! [`Server::run`]. Background tasks feed it:
//! - **Acceptor**: wraps each TCP connection as a [`RemoteConnection`]
//! - **Update receiver**: the single reader of the shared UDP socket, which
//!   routes datagrams to players by their head
//! - **Race ticker**: advances race start sequences on an interval
//!
//! Routing rules:
//! - status changes go to every player and are echoed to the sender
//! - position updates go to players in the same room only
//! - emotes go to players in the same room, on the reliable channel
//! - chunks the server does not know are forwarded to everyone else

use crate::commands::{self, CommandRegistry, Invoker};
use crate::config::ServerSettings;
use crate::error::ServerError;
use crate::players::{OpList, PlayerRecord, PlayerSlots};
use crate::race::{RaceEffect, RaceManager};
use crate::requests::PendingRequests;
use log::{debug, error, info, warn};
use shared::chunks::{
    ChunkMChat, ChunkMEmote, ChunkMMoveTo, ChunkMPlayer, ChunkMRequest, ChunkMServerInfo,
    ChunkUUpdate, Color,
};
use shared::connection::MAX_DATAGRAM_SIZE;
use shared::{
    now_millis, Chunk, ChunkRegistry, Connection, ConnectionEvent, ConnectionId, EventReceiver,
    EventSender, Frame, LocalConnection, RemoteConnection, UpdateFilter, PROTOCOL_VERSION,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Central server routing frames between connected players
pub struct Server {
    settings: ServerSettings,
    registry: Arc<ChunkRegistry>,
    commands: CommandRegistry,
    players: RwLock<PlayerSlots>,
    ops: RwLock<OpList>,
    races: Mutex<RaceManager>,
    requests: PendingRequests,
    next_chat_id: AtomicU32,

    local_addr: SocketAddr,
    udp: Arc<UdpSocket>,
    // Taken by `run`.
    listener: Mutex<Option<TcpListener>>,

    events_tx: EventSender,
    events_rx: Mutex<Option<EventReceiver>>,
}

impl Server {
    /// Binds the TCP listener and the UDP socket on the same port.
    pub async fn bind(settings: ServerSettings) -> Result<Arc<Self>, ServerError> {
        Self::bind_with(settings, ChunkRegistry::with_builtin(), CommandRegistry::with_builtin())
            .await
    }

    /// Like [`bind`](Self::bind) with caller-supplied chunk types and commands.
    pub async fn bind_with(
        settings: ServerSettings,
        registry: ChunkRegistry,
        commands: CommandRegistry,
    ) -> Result<Arc<Self>, ServerError> {
        let addr = settings.bind_addr();
        let bind_error = |source| ServerError::Bind {
            addr: addr.clone(),
            source,
        };

        let listener = TcpListener::bind(&addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        // port 0 resolves on the TCP side, so UDP follows whatever TCP got
        let udp = UdpSocket::bind(local_addr).await.map_err(bind_error)?;
        info!("{} listening on {} (TCP + UDP)", settings.name, local_addr);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let races = RaceManager::new(settings.race.clone());

        Ok(Arc::new(Server {
            settings,
            registry: Arc::new(registry),
            commands,
            players: RwLock::new(PlayerSlots::new()),
            ops: RwLock::new(OpList::new()),
            races: Mutex::new(races),
            requests: PendingRequests::new(),
            next_chat_id: AtomicU32::new(0),
            local_addr,
            udp: Arc::new(udp),
            listener: Mutex::new(Some(listener)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<ChunkRegistry> {
        &self.registry
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn races(&self) -> &Mutex<RaceManager> {
        &self.races
    }

    /// Main server loop. Returns immediately if the server is already running.
    pub async fn run(self: Arc<Self>) {
        let listener = self.listener.lock().await.take();
        let events = self.events_rx.lock().await.take();
        let (Some(listener), Some(mut events)) = (listener, events) else {
            warn!("Server is already running");
            return;
        };

        self.spawn_acceptor(listener);
        self.spawn_update_receiver();
        self.spawn_race_ticker();
        info!("Server started successfully");

        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
    }

    /// Spawns [`run`](Self::run) on the runtime.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    /// Spawns task that accepts incoming TCP connections
    fn spawn_acceptor(self: &Arc<Self>, listener: TcpListener) {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("Accepted connection from {}", addr);
                        server.accept_remote(stream).await;
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that reads every datagram arriving on the shared UDP
    /// socket and hands it to the event loop as an update from its player
    fn spawn_update_receiver(self: &Arc<Self>) {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
            let mut filter = UpdateFilter::new();
            let mut generations: HashMap<u32, u32> = HashMap::new();

            loop {
                let (len, addr) = match server.udp.recv_from(&mut buffer).await {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                };

                let frame = match Frame::read(&server.registry, &buffer[..len]) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Dropping malformed datagram from {}: {}", addr, e);
                        continue;
                    }
                };
                let Some(player_id) = frame.head() else {
                    debug!("Dropping datagram without head from {}", addr);
                    continue;
                };
                let Some(id) = server.claim_update_endpoint(player_id, addr).await else {
                    continue;
                };

                // a reused slot starts counting again
                if generations.insert(player_id, id.generation) != Some(id.generation) {
                    filter.forget(player_id);
                }
                if let Some(update) = frame.get::<ChunkUUpdate>() {
                    if !filter.accept(player_id, update.update_index) {
                        continue;
                    }
                }

                let event = ConnectionEvent::Update {
                    from: id,
                    frame,
                    addr: Some(addr),
                };
                if server.events_tx.send(event).is_err() {
                    break;
                }
            }
        });
    }

    /// Spawns task that advances race start sequences
    fn spawn_race_ticker(self: &Arc<Self>) {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(server.settings.race_tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let effects = server.races.lock().await.tick(Instant::now());
                if !effects.is_empty() {
                    server.apply_race_effects(effects).await;
                }
            }
        });
    }

    /// Checks that a datagram claiming to come from `player_id` was sent from
    /// that player's TCP peer address and remembers where it came from.
    async fn claim_update_endpoint(&self, player_id: u32, addr: SocketAddr) -> Option<ConnectionId> {
        let players = self.players.read().await;
        let record = players.by_player_id(player_id)?;
        let peer = record.connection.peer_addr()?;
        if peer.ip() != addr.ip() {
            warn!(
                "Datagram for player {} came from {}, expected {}",
                player_id,
                addr,
                peer.ip()
            );
            return None;
        }
        record.connection.set_update_endpoint(addr);
        Some(record.id)
    }

    async fn accept_remote(&self, stream: TcpStream) {
        // Hold the slot map until the player is fully registered so the event
        // loop cannot see frames from a half-added connection.
        let mut players = self.players.write().await;
        let id = players.allocate();
        match RemoteConnection::accept(
            id,
            stream,
            Arc::clone(&self.udp),
            Arc::clone(&self.registry),
            self.events_tx.clone(),
        ) {
            Ok(connection) => self.welcome(&mut players, connection, false),
            Err(e) => {
                warn!("Failed to set up connection {}: {}", id, e);
                players.remove(id);
            }
        }
    }

    /// Connects an in-process client. The returned end delivers to
    /// `client_events`; the player behind it is an OP from the start.
    pub async fn accept_local(&self, client_events: EventSender) -> Arc<dyn Connection> {
        let (server_end, client_end) = {
            let mut players = self.players.write().await;
            let id = players.allocate();
            let (server_end, client_end) = LocalConnection::pair(
                id,
                self.events_tx.clone(),
                ConnectionId::default(),
                client_events,
            );
            self.welcome(&mut players, server_end.clone(), true);
            (server_end, client_end)
        };
        if self.ops.write().await.grant(server_end.id()) {
            info!("Local player {} is an OP", server_end.id());
        }
        client_end
    }

    /// Registers a new connection and sends it the welcome frame followed by
    /// the status of everyone already here.
    fn welcome(&self, players: &mut PlayerSlots, connection: Arc<dyn Connection>, is_local: bool) {
        let id = connection.id();
        if !players.insert(PlayerRecord::new(Arc::clone(&connection), is_local)) {
            connection.dispose();
            return;
        }

        let mut welcome = Frame::with_head(id.index);
        welcome.set(ChunkMServerInfo {
            name: self.settings.name.clone(),
            protocol_version: PROTOCOL_VERSION,
            command_prefix: self.settings.command_prefix.clone(),
        });
        connection.send_management(welcome);

        for other in players.iter().filter(|other| other.id != id) {
            if let Some(status) = &other.status {
                let mut frame = Frame::with_head(other.id.index);
                frame.set(status.clone());
                connection.send_management(frame);
            }
        }
    }

    async fn handle_event(self: &Arc<Self>, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Management { from, frame } => self.handle_management(from, frame).await,
            ConnectionEvent::Update { from, frame, .. } => self.handle_update(from, frame).await,
            ConnectionEvent::Disconnected { from } => self.remove_player(from).await,
        }
    }

    /// Processes a frame that arrived on a player's management channel
    async fn handle_management(self: &Arc<Self>, from: ConnectionId, mut frame: Frame) {
        if self.players.read().await.get(from).is_none() {
            debug!("Ignoring frame from stale connection {}", from);
            return;
        }
        if let Err(e) = frame.assign_head(from.index) {
            warn!("Dropping frame from {}: {}", from, e);
            return;
        }

        self.requests.resolve(from, &frame).await;

        if let Some(status) = frame.get::<ChunkMPlayer>() {
            self.handle_status(from, status.clone()).await;
        }
        if let Some(chat) = frame.get::<ChunkMChat>() {
            self.handle_chat(from, chat.clone()).await;
        }
        if let Some(emote) = frame.get::<ChunkMEmote>() {
            self.relay_emote(from, emote.clone(), false).await;
        }
        // local clients may bundle an update into a management frame
        frame.propagate_u = frame.has::<ChunkUUpdate>();
        frame.propagate_m = frame.has_extra();

        if frame.propagate_u {
            self.handle_update(from, frame.clone()).await;
        }
        if frame.propagate_m {
            self.broadcast(frame.passthrough(), Some(from)).await;
        }
    }

    async fn handle_status(&self, from: ConnectionId, mut status: ChunkMPlayer) {
        status.is_echo = false;
        if !status.is_valid() {
            debug!("Ignoring nameless status from {}", from);
            return;
        }

        {
            let mut players = self.players.write().await;
            let Some(record) = players.get_mut(from) else {
                return;
            };
            if record.status.is_none() {
                info!("Player {} is {}", from, status.name);
            }
            record.status = Some(status.clone());
        }

        let mut frame = Frame::with_head(from.index);
        frame.set(status.clone());
        self.broadcast(frame.clone(), Some(from)).await;

        let mut echo = status.clone();
        echo.is_echo = true;
        frame.set(echo);
        self.send_frame(from, frame).await;

        let effects = self
            .races
            .lock()
            .await
            .on_status(from, &status, Instant::now());
        self.apply_race_effects(effects).await;
    }

    async fn handle_chat(self: &Arc<Self>, from: ConnectionId, chat: ChunkMChat) {
        let text = chat.text.trim();
        if text.is_empty() {
            return;
        }
        let message = ChunkMChat {
            id: self.next_chat_id(),
            name: self.player_name(from).await,
            text: text.to_string(),
            color: chat.color,
            date_ms: now_millis(),
            created_by_server: false,
        };
        let mut frame = Frame::with_head(from.index);
        frame.set(message.clone());

        if let Some(command) = text.strip_prefix(self.settings.command_prefix.as_str()) {
            // only the sender sees their command line
            self.send_frame(from, frame).await;
            info!("{} ran command: {}", message.name, command);
            commands::spawn(Arc::clone(self), Invoker::Player(from), command.to_string());
            return;
        }

        info!("[chat] {}: {}", message.name, message.text);
        self.broadcast(frame, None).await;
    }

    /// Relays the update-channel part of a frame to the sender's room peers
    async fn handle_update(&self, from: ConnectionId, frame: Frame) {
        let mut frame = frame.update_part();
        if let Err(e) = frame.assign_head(from.index) {
            warn!("Dropping update from {}: {}", from, e);
            return;
        }

        let peers: Vec<Arc<dyn Connection>> = {
            let mut players = self.players.write().await;
            let Some(record) = players.get_mut(from) else {
                return;
            };
            if let Some(update) = frame.get::<ChunkUUpdate>() {
                record.last_update = Some(update.clone());
            }
            players
                .room_peers(from)
                .into_iter()
                .map(|peer| Arc::clone(&peer.connection))
                .collect()
        };

        // head-only frames just register the sender's endpoint
        frame.propagate_u = frame.len() > 0 || frame.has_extra();
        if !frame.propagate_u {
            return;
        }
        for peer in peers {
            peer.send_update(frame.clone(), None);
        }
    }

    /// Frees a player's slot and tells everyone else they are gone
    async fn remove_player(&self, id: ConnectionId) {
        let Some(record) = self.players.write().await.remove(id) else {
            return;
        };
        record.connection.dispose();
        self.ops.write().await.revoke(id);
        self.requests.cancel(id).await;

        let effects = self.races.lock().await.remove_player(id, "disconnected");
        self.apply_race_effects(effects).await;

        let mut notice = Frame::with_head(id.index);
        notice.set(ChunkMPlayer::removed());
        self.broadcast(notice, None).await;
    }

    /// Sends a frame on one player's management channel. Returns false if
    /// the player is gone.
    pub async fn send_frame(&self, to: ConnectionId, frame: Frame) -> bool {
        let players = self.players.read().await;
        match players.get(to) {
            Some(record) => {
                record.connection.send_management(frame);
                true
            }
            None => false,
        }
    }

    /// Sends a frame to every player except `except`
    pub async fn broadcast(&self, frame: Frame, except: Option<ConnectionId>) {
        let players = self.players.read().await;
        for record in players.iter().filter(|record| Some(record.id) != except) {
            record.connection.send_management(frame.clone());
        }
    }

    pub fn next_chat_id(&self) -> u32 {
        self.next_chat_id.fetch_add(1, Ordering::Relaxed)
    }

    fn server_chat(&self, text: String, color: Color) -> Frame {
        Frame::with(ChunkMChat {
            id: self.next_chat_id(),
            name: self.settings.name.clone(),
            text,
            color,
            date_ms: now_millis(),
            created_by_server: true,
        })
    }

    pub async fn broadcast_chat(&self, text: impl Into<String>, color: Color) {
        let text = text.into();
        info!("[broadcast] {}", text);
        self.broadcast(self.server_chat(text, color), None).await;
    }

    pub async fn send_chat(&self, to: ConnectionId, text: impl Into<String>, color: Color) {
        self.send_frame(to, self.server_chat(text.into(), color)).await;
    }

    /// One message, one id, several recipients.
    pub async fn send_chat_to(&self, to: &[ConnectionId], text: impl Into<String>, color: Color) {
        let frame = self.server_chat(text.into(), color);
        let players = self.players.read().await;
        for id in to {
            if let Some(record) = players.get(*id) {
                record.connection.send_management(frame.clone());
            }
        }
    }

    /// Shows an emote to the sender's room peers, and to the sender too when
    /// the server produced it on their behalf.
    pub async fn relay_emote(&self, from: ConnectionId, emote: ChunkMEmote, include_sender: bool) {
        if !emote.is_valid() {
            return;
        }
        let mut frame = Frame::with_head(from.index);
        frame.set(emote);

        let players = self.players.read().await;
        for peer in players.room_peers(from) {
            peer.connection.send_management(frame.clone());
        }
        if include_sender {
            if let Some(record) = players.get(from) {
                record.connection.send_management(frame);
            }
        }
    }

    /// Asks a player for a chunk of type `T` and waits for the first frame
    /// from them that carries one.
    pub async fn request<T: Chunk>(
        &self,
        player: ConnectionId,
        timeout: Duration,
    ) -> Result<T, ServerError> {
        let waiter = self.requests.register(player, T::TAG).await;
        if !self
            .send_frame(player, Frame::with(ChunkMRequest::of::<T>()))
            .await
        {
            return Err(ServerError::PlayerNotFound(player.index));
        }

        match tokio::time::timeout(timeout, waiter).await {
            Ok(Ok(frame)) => frame
                .get::<T>()
                .cloned()
                .ok_or(ServerError::Disconnected(player.index)),
            Ok(Err(_)) => Err(ServerError::Disconnected(player.index)),
            Err(_) => Err(ServerError::RequestTimeout {
                player: player.index,
                tag: T::TAG,
            }),
        }
    }

    pub async fn apply_race_effects(&self, effects: Vec<RaceEffect>) {
        for effect in effects {
            match effect {
                RaceEffect::Chat { to, text } => self.send_chat_to(&to, text, Color::GOLD).await,
                RaceEffect::Move { player, to } => {
                    let move_to = match to {
                        Some(waypoint) => ChunkMMoveTo::area(waypoint.sid, waypoint.mode),
                        None => ChunkMMoveTo::menu(),
                    };
                    self.send_frame(player, Frame::with(move_to)).await;
                }
            }
        }
    }

    /// Display name of a player, or `#id` before their first status.
    pub async fn player_name(&self, id: ConnectionId) -> String {
        match self.players.read().await.get(id) {
            Some(record) => record.display_name(),
            None => format!("#{}", id.index),
        }
    }

    /// Finds a player by name (case-insensitive) or by `#id`.
    pub async fn find_player(&self, query: &str) -> Option<ConnectionId> {
        let players = self.players.read().await;
        if let Some(record) = players.by_name(query) {
            return Some(record.id);
        }
        let index = query.strip_prefix('#').unwrap_or(query).parse::<u32>().ok()?;
        players.by_player_id(index).map(|record| record.id)
    }

    pub async fn status_of(&self, id: ConnectionId) -> Option<ChunkMPlayer> {
        self.players.read().await.get(id).and_then(|r| r.status.clone())
    }

    pub async fn last_update_of(&self, id: ConnectionId) -> Option<ChunkUUpdate> {
        self.players
            .read()
            .await
            .get(id)
            .and_then(|r| r.last_update.clone())
    }

    pub async fn player_count(&self) -> usize {
        self.players.read().await.len()
    }

    pub async fn is_op(&self, invoker: Invoker) -> bool {
        match invoker {
            Invoker::Console => true,
            Invoker::Player(id) => self.ops.read().await.is_op(id),
        }
    }

    /// Returns false if the player already was an OP or is gone.
    pub async fn grant_op(&self, id: ConnectionId) -> bool {
        if self.players.read().await.get(id).is_none() {
            return false;
        }
        self.ops.write().await.grant(id)
    }

    pub async fn can_kick(&self, invoker: Invoker, target: ConnectionId) -> bool {
        match invoker {
            Invoker::Console => true,
            Invoker::Player(actor) => self.ops.read().await.can_kick(actor, target),
        }
    }

    pub async fn kick(&self, id: ConnectionId) {
        let connection = self
            .players
            .read()
            .await
            .get(id)
            .map(|record| Arc::clone(&record.connection));
        if let Some(connection) = connection {
            info!("Kicking {}", id);
            connection.dispose();
            self.remove_player(id).await;
        }
    }

    /// Healthy while no two connected players share a name.
    pub async fn is_healthy(&self) -> bool {
        !self.players.read().await.has_duplicate_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RaceTiming;
    use shared::chunks::AreaMode;
    use shared::EventReceiver;
    use tokio::time::timeout;

    fn settings() -> ServerSettings {
        ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
            request_timeout: Duration::from_millis(200),
            race_tick: Duration::from_millis(10),
            race: RaceTiming {
                warning: Duration::from_millis(20),
                countdown_step: Duration::from_millis(10),
                menu_timeout: Duration::from_millis(500),
            },
            ..ServerSettings::default()
        }
    }

    async fn next_frame(rx: &mut EventReceiver) -> Frame {
        loop {
            let event = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for frame")
                .expect("channel closed");
            match event {
                ConnectionEvent::Management { frame, .. } | ConnectionEvent::Update { frame, .. } => {
                    return frame
                }
                ConnectionEvent::Disconnected { .. } => panic!("disconnected"),
            }
        }
    }

    /// Waits for the next frame carrying `T`, skipping others.
    async fn next_with<T: Chunk>(rx: &mut EventReceiver) -> (Option<u32>, T) {
        loop {
            let frame = next_frame(rx).await;
            if let Some(chunk) = frame.get::<T>() {
                return (frame.head(), chunk.clone());
            }
        }
    }

    async fn join(
        server: &Arc<Server>,
        name: &str,
        sid: &str,
        level: &str,
    ) -> (Arc<dyn Connection>, EventReceiver, u32) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = server.accept_local(tx).await;
        let (head, _) = next_with::<ChunkMServerInfo>(&mut rx).await;
        let id = head.expect("welcome carries the player id");

        let mut status = ChunkMPlayer::new(name);
        status.sid = sid.into();
        status.mode = AreaMode::Normal;
        status.level = level.into();
        connection.send_management(Frame::with(status));
        // statuses of players already here arrive first
        loop {
            let (head, status) = next_with::<ChunkMPlayer>(&mut rx).await;
            if status.is_echo {
                assert_eq!(head, Some(id));
                break;
            }
        }
        (connection, rx, id)
    }

    #[tokio::test]
    async fn test_welcome_and_status_echo() {
        let server = Server::bind(settings()).await.unwrap();
        server.start();

        let (_a, mut a_rx, a_id) = join(&server, "Madeline", "A", "1").await;
        let (_b, _b_rx, b_id) = join(&server, "Theo", "B", "1").await;
        assert_ne!(a_id, b_id);

        // status broadcasts reach everyone, not just the room
        let (head, status) = next_with::<ChunkMPlayer>(&mut a_rx).await;
        assert_eq!(head, Some(b_id));
        assert_eq!(status.name, "Theo");
        assert!(!status.is_echo);
        assert!(server.is_healthy().await);
    }

    #[tokio::test]
    async fn test_chat_gets_increasing_ids() {
        let server = Server::bind(settings()).await.unwrap();
        server.start();
        let (a, mut a_rx, _) = join(&server, "Madeline", "", "").await;

        a.send_management(Frame::with(ChunkMChat::outgoing("hello", 0)));
        a.send_management(Frame::with(ChunkMChat::outgoing("again", 0)));

        let (_, first) = next_with::<ChunkMChat>(&mut a_rx).await;
        let (_, second) = next_with::<ChunkMChat>(&mut a_rx).await;
        assert_eq!(first.name, "Madeline");
        assert_eq!(first.text, "hello");
        assert!(first.is_confirmed());
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn test_mismatched_head_dropped() {
        let server = Server::bind(settings()).await.unwrap();
        server.start();
        let (a, _a_rx, a_id) = join(&server, "Madeline", "", "").await;
        let (_b, mut b_rx, _) = join(&server, "Theo", "", "").await;

        let mut spoof = Frame::with_head(a_id + 100);
        spoof.set(ChunkMChat::outgoing("not me", 0));
        a.send_management(spoof);
        a.send_management(Frame::with(ChunkMChat::outgoing("me", 0)));

        let (_, chat) = next_with::<ChunkMChat>(&mut b_rx).await;
        assert_eq!(chat.text, "me");
    }

    #[tokio::test]
    async fn test_request_times_out_and_disconnect_notice() {
        let server = Server::bind(settings()).await.unwrap();
        server.start();
        let (a, _a_rx, _) = join(&server, "Madeline", "", "").await;
        let (_b, mut b_rx, _) = join(&server, "Theo", "", "").await;

        let a_id = server.find_player("madeline").await.unwrap();
        let result = server
            .request::<shared::chunks::ChunkMSession>(a_id, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(ServerError::RequestTimeout { .. })));

        a.dispose();
        let (head, notice) = next_with::<ChunkMPlayer>(&mut b_rx).await;
        assert_eq!(head, Some(a_id.index));
        assert!(!notice.is_valid());
        assert_eq!(server.player_count().await, 1);
    }

    #[tokio::test]
    async fn test_local_player_is_op() {
        let server = Server::bind(settings()).await.unwrap();
        server.start();
        let (_a, _a_rx, _) = join(&server, "Host", "", "").await;
        let host = server.find_player("Host").await.unwrap();
        assert!(server.is_op(Invoker::Player(host)).await);
        assert!(server.is_op(Invoker::Console).await);
    }

    #[tokio::test]
    async fn test_update_relay_strips_management_chunks() {
        let server = Server::bind(settings()).await.unwrap();
        server.start();
        let (a, _a_rx, a_id) = join(&server, "Madeline", "A", "1").await;
        let (_b, mut b_rx, _) = join(&server, "Theo", "A", "1").await;

        let mut frame = Frame::with_head(a_id);
        frame.set(ChunkUUpdate {
            update_index: 1,
            ..ChunkUUpdate::default()
        });
        frame.set(ChunkMMoveTo::area("Celeste/9-Core", AreaMode::CSide));
        frame.set(ChunkMChat::outgoing("forged", 0));
        a.send_update(frame, None);

        let frame = loop {
            let frame = next_frame(&mut b_rx).await;
            if frame.has::<ChunkUUpdate>() {
                break frame;
            }
        };
        assert_eq!(frame.head(), Some(a_id));
        assert!(!frame.has::<ChunkMMoveTo>());
        assert!(!frame.has::<ChunkMChat>());
    }
}
