use crate::chat::ChatLog;
use crate::ghosts::{GhostChange, GhostRegistry};
use log::{debug, info, warn};
use server::Server;
use shared::chunks::{
    ChunkMChat, ChunkMEmote, ChunkMMoveTo, ChunkMPlayer, ChunkMRequest, ChunkMServerInfo,
    ChunkMSession, ChunkRListAreas, ChunkRListMods, ChunkUUpdate, ModInfo,
};
use shared::{
    now_millis, Chunk, ChunkRegistry, Connection, ConnectionEvent, ConnectionTarget,
    EventReceiver, Frame, ProtocolError, RemoteConnection,
};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("not connected yet")]
    NotConnected,
}

/// What the embedding game needs to react to.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Welcome {
        player_id: u32,
        info: ChunkMServerInfo,
    },
    GhostSpawned(u32),
    GhostUpdated(u32),
    GhostRemoved(u32),
    MoveTo(ChunkMMoveTo),
    Chat(ChunkMChat),
    Emote {
        player_id: u32,
        emote: ChunkMEmote,
    },
    Disconnected,
}

impl From<GhostChange> for ClientEvent {
    fn from(change: GhostChange) -> Self {
        match change {
            GhostChange::Spawned(id) => ClientEvent::GhostSpawned(id),
            GhostChange::Updated(id) => ClientEvent::GhostUpdated(id),
            GhostChange::Removed(id) => ClientEvent::GhostRemoved(id),
        }
    }
}

pub struct GhostClient {
    connection: Arc<dyn Connection>,
    events: EventReceiver,
    pending: VecDeque<ClientEvent>,

    player_id: Option<u32>,
    server_info: Option<ChunkMServerInfo>,
    update_index: u32,

    status: ChunkMPlayer,
    session: ChunkMSession,
    areas: ChunkRListAreas,
    mods: ChunkRListMods,

    ghosts: GhostRegistry,
    chat: ChatLog,
}

impl GhostClient {
    /// Connects to a server over TCP + UDP.
    pub async fn connect(target: &ConnectionTarget, name: &str) -> Result<Self, ClientError> {
        let host = target.to_string();
        let addr = tokio::net::lookup_host(host.as_str())
            .await
            .map_err(|_| ClientError::Resolve(host.clone()))?
            .next()
            .ok_or_else(|| ClientError::Resolve(target.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(ChunkRegistry::with_builtin());
        let connection = RemoteConnection::connect(addr, registry, tx).await?;
        Ok(Self::new(connection, rx, name))
    }

    /// Joins a server running in this process.
    pub async fn local(server: &Server, name: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = server.accept_local(tx).await;
        info!("Joined local server {}", server.settings().name);
        Self::new(connection, rx, name)
    }

    fn new(connection: Arc<dyn Connection>, events: EventReceiver, name: &str) -> Self {
        GhostClient {
            connection,
            events,
            pending: VecDeque::new(),
            player_id: None,
            server_info: None,
            update_index: 0,
            status: ChunkMPlayer::new(name),
            session: ChunkMSession::none(),
            areas: ChunkRListAreas::default(),
            mods: ChunkRListMods {
                mods: vec![ModInfo {
                    name: env!("CARGO_PKG_NAME").to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                }],
            },
            ghosts: GhostRegistry::new(),
            chat: ChatLog::new(),
        }
    }

    pub fn player_id(&self) -> Option<u32> {
        self.player_id
    }

    pub fn server_info(&self) -> Option<&ChunkMServerInfo> {
        self.server_info.as_ref()
    }

    pub fn status(&self) -> &ChunkMPlayer {
        &self.status
    }

    pub fn ghosts(&self) -> &GhostRegistry {
        &self.ghosts
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_alive()
    }

    /// Waits for the next event. `None` once the connection is gone and
    /// everything has been handed out.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let event = self.events.recv().await?;
            self.handle_connection_event(event);
        }
    }

    /// Returns whatever is already queued without waiting.
    pub fn poll_events(&mut self) -> Vec<ClientEvent> {
        while let Ok(event) = self.events.try_recv() {
            self.handle_connection_event(event);
        }
        self.pending.drain(..).collect()
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Management { frame, .. } => self.handle_frame(frame),
            ConnectionEvent::Update { frame, .. } => self.handle_update_frame(frame),
            ConnectionEvent::Disconnected { .. } => {
                info!("Disconnected from server");
                let removed = self.ghosts.clear();
                self.pending.extend(removed.into_iter().map(ClientEvent::from));
                self.pending.push_back(ClientEvent::Disconnected);
                // nothing else arrives after this
                self.events.close();
            }
        }
    }

    /// Handles a frame from the management channel.
    fn handle_frame(&mut self, frame: Frame) {
        if let Some(info) = frame.get::<ChunkMServerInfo>() {
            self.handle_welcome(frame.head(), info.clone());
        }
        // only the server itself may ask questions or move us around
        if frame.head().is_none() {
            if let Some(request) = frame.get::<ChunkMRequest>() {
                self.answer(request);
            }
            if let Some(move_to) = frame.get::<ChunkMMoveTo>() {
                info!("Server moves us to {}", describe_move(move_to));
                self.pending.push_back(ClientEvent::MoveTo(move_to.clone()));
            }
        }
        if let Some(chat) = frame.get::<ChunkMChat>() {
            if self.chat.receive(chat.clone()) {
                self.pending.push_back(ClientEvent::Chat(chat.clone()));
            }
        }

        let Some(head) = frame.head() else {
            return;
        };
        // our own emotes come back too
        if let Some(emote) = frame.get::<ChunkMEmote>() {
            self.pending.push_back(ClientEvent::Emote {
                player_id: head,
                emote: emote.clone(),
            });
        }
        if Some(head) == self.player_id {
            return;
        }
        if let Some(status) = frame.get::<ChunkMPlayer>() {
            if let Some(change) = self.ghosts.on_status(head, status.clone()) {
                self.pending.push_back(change.into());
            }
        }
    }

    /// Handles a frame from the update channel. Only position updates count.
    fn handle_update_frame(&mut self, frame: Frame) {
        let (Some(head), Some(update)) = (frame.head(), frame.get::<ChunkUUpdate>()) else {
            return;
        };
        if Some(head) == self.player_id {
            return;
        }
        if let Some(change) = self.ghosts.on_update(head, update.clone()) {
            self.pending.push_back(change.into());
        }
    }

    fn handle_welcome(&mut self, head: Option<u32>, info: ChunkMServerInfo) {
        let Some(player_id) = head else {
            warn!("Welcome frame without player id");
            return;
        };
        if info.protocol_version != shared::PROTOCOL_VERSION {
            warn!(
                "Server speaks protocol {}, we speak {}",
                info.protocol_version,
                shared::PROTOCOL_VERSION
            );
        }
        info!("Connected to {} as player {}", info.name, player_id);
        self.player_id = Some(player_id);
        self.server_info = Some(info.clone());

        // tells the server where our update socket is
        self.connection
            .send_update(Frame::with_head(player_id), None);
        self.connection
            .send_management(Frame::with(self.status.clone()));

        self.pending
            .push_back(ClientEvent::Welcome { player_id, info });
    }

    fn answer(&mut self, request: &ChunkMRequest) {
        let frame = match request.tag.as_str() {
            tag if tag == ChunkMSession::TAG => Frame::with(self.session.clone()),
            tag if tag == ChunkMPlayer::TAG => Frame::with(self.status.clone()),
            tag if tag == ChunkRListAreas::TAG => Frame::with(self.areas.clone()),
            tag if tag == ChunkRListMods::TAG => Frame::with(self.mods.clone()),
            tag => {
                debug!("Ignoring request for {}", tag);
                return;
            }
        };
        self.connection.send_management(frame);
    }

    /// Reports a status change. Ghosts are re-evaluated against the new room.
    pub fn send_status(&mut self, status: ChunkMPlayer) {
        let changes = self.ghosts.set_own_status(status.clone());
        self.pending.extend(changes.into_iter().map(ClientEvent::from));
        self.status = status;
        self.connection
            .send_management(Frame::with(self.status.clone()));
    }

    /// Sends a position update, numbering it.
    pub fn send_update(&mut self, mut update: ChunkUUpdate) -> Result<(), ClientError> {
        let player_id = self.player_id.ok_or(ClientError::NotConnected)?;
        self.update_index = self.update_index.wrapping_add(1);
        update.update_index = self.update_index;

        let mut frame = Frame::with_head(player_id);
        frame.set(update);
        self.connection.send_update(frame, None);
        Ok(())
    }

    /// Sends a chat line. It shows up in the log immediately, unconfirmed.
    pub fn send_chat(&mut self, text: &str) -> ChunkMChat {
        let mut message = ChunkMChat::outgoing(text.trim(), now_millis());
        message.name = self.status.name.clone();
        self.chat.push_local(message.clone());
        self.connection
            .send_management(Frame::with(message.clone()));
        message
    }

    pub fn send_emote(&mut self, value: &str) {
        let emote = ChunkMEmote {
            value: value.to_string(),
        };
        if emote.is_valid() {
            self.connection.send_management(Frame::with(emote));
        }
    }

    /// Sends an arbitrary frame on the management channel.
    pub fn send_frame(&self, frame: Frame) {
        self.connection.send_management(frame);
    }

    pub fn set_session(&mut self, session: ChunkMSession) {
        self.session = session;
    }

    pub fn set_areas(&mut self, areas: Vec<String>) {
        self.areas = ChunkRListAreas { areas };
    }

    pub fn set_mods(&mut self, mods: Vec<ModInfo>) {
        self.mods = ChunkRListMods { mods };
    }

    pub fn disconnect(&self) {
        self.connection.dispose();
    }
}

fn describe_move(move_to: &ChunkMMoveTo) -> String {
    if move_to.is_menu() {
        "the menu".to_string()
    } else {
        format!("{} ({})", move_to.sid, move_to.mode)
    }
}
