//! Integration tests for GhostNet components
//!
//! These tests run a real server on a loopback port and talk to it through
//! both connection kinds.

use client::{ClientEvent, GhostClient};
use server::config::RaceTiming;
use server::{Server, ServerSettings};
use shared::chunks::{AreaMode, ChunkMPlayer, ChunkMServerInfo, ChunkUUpdate, Vec2};
use shared::{
    Chunk, ChunkRegistry, Connection, ConnectionEvent, ConnectionTarget, EventReceiver, Frame,
    RemoteConnection,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

fn settings() -> ServerSettings {
    ServerSettings {
        host: "127.0.0.1".into(),
        port: 0,
        request_timeout: Duration::from_millis(500),
        race_tick: Duration::from_millis(10),
        race: RaceTiming {
            warning: Duration::from_millis(50),
            countdown_step: Duration::from_millis(20),
            menu_timeout: Duration::from_secs(2),
        },
        ..ServerSettings::default()
    }
}

async fn start_server() -> Arc<Server> {
    let server = Server::bind(settings()).await.expect("bind failed");
    server.start();
    server
}

fn status(name: &str, sid: &str, level: &str) -> ChunkMPlayer {
    let mut status = ChunkMPlayer::new(name);
    status.sid = sid.into();
    status.mode = AreaMode::Normal;
    status.level = level.into();
    status
}

/// A remote connection driven frame by frame.
struct RawPeer {
    connection: Arc<RemoteConnection>,
    events: EventReceiver,
    id: u32,
}

impl RawPeer {
    async fn join(server: &Server, status: ChunkMPlayer) -> Self {
        let (tx, mut events) = mpsc::unbounded_channel();
        let registry = Arc::new(ChunkRegistry::with_builtin());
        let connection = RemoteConnection::connect(server.local_addr(), registry, tx)
            .await
            .expect("connect failed");

        let (head, _) = next_with::<ChunkMServerInfo>(&mut events).await;
        let id = head.expect("welcome without id");
        connection.send_update(Frame::with_head(id), None);
        connection.send_management(Frame::with(status));
        loop {
            let (_, status) = next_with::<ChunkMPlayer>(&mut events).await;
            if status.is_echo {
                break;
            }
        }
        RawPeer {
            connection,
            events,
            id,
        }
    }

    /// Update frames received so far, as (head, update index).
    fn drain_updates(&mut self) -> Vec<(Option<u32>, u32)> {
        let mut updates = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let ConnectionEvent::Update { frame, .. } = event {
                if let Some(update) = frame.get::<ChunkUUpdate>() {
                    updates.push((frame.head(), update.update_index));
                }
            }
        }
        updates
    }
}

async fn next_frame(events: &mut EventReceiver) -> Frame {
    let event = timeout(Duration::from_secs(3), events.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("channel closed");
    match event {
        ConnectionEvent::Management { frame, .. } | ConnectionEvent::Update { frame, .. } => frame,
        ConnectionEvent::Disconnected { .. } => panic!("unexpected disconnect"),
    }
}

async fn next_with<T: Chunk>(events: &mut EventReceiver) -> (Option<u32>, T) {
    loop {
        let frame = next_frame(events).await;
        if let Some(chunk) = frame.get::<T>() {
            return (frame.head(), chunk.clone());
        }
    }
}

/// Pumps a client until an event matches.
async fn wait_for<F>(client: &mut GhostClient, matches: F) -> ClientEvent
where
    F: Fn(&ClientEvent) -> bool,
{
    loop {
        let event = timeout(Duration::from_secs(3), client.next_event())
            .await
            .expect("timed out waiting for client event")
            .expect("client closed");
        if matches(&event) {
            return event;
        }
    }
}

async fn wait_for_chat(client: &mut GhostClient, needle: &str) -> String {
    let event = wait_for(client, |e| {
        matches!(e, ClientEvent::Chat(chat) if chat.text.contains(needle))
    })
    .await;
    match event {
        ClientEvent::Chat(chat) => chat.text,
        _ => unreachable!(),
    }
}

async fn welcomed(client: &mut GhostClient) {
    wait_for(client, |e| matches!(e, ClientEvent::Welcome { .. })).await;
}

/// ROUTING TESTS
mod routing_tests {
    use super::*;

    /// Updates only reach players in the same (area, mode, level)
    #[tokio::test]
    async fn test_updates_scoped_to_room() {
        let server = start_server().await;
        let mut a = RawPeer::join(&server, status("A", "A", "1")).await;
        let mut b = RawPeer::join(&server, status("B", "A", "2")).await;
        let c = RawPeer::join(&server, status("C", "A", "1")).await;
        // let the endpoint registrations land
        sleep(Duration::from_millis(100)).await;

        for index in 1..=5 {
            let mut frame = Frame::with_head(c.id);
            frame.set(ChunkUUpdate {
                update_index: index,
                position: Vec2::new(index as f32, 0.0),
                ..ChunkUUpdate::default()
            });
            c.connection.send_update(frame, None);
            sleep(Duration::from_millis(20)).await;
        }
        sleep(Duration::from_millis(200)).await;

        let received = a.drain_updates();
        assert!(!received.is_empty());
        assert!(received.iter().all(|(head, _)| *head == Some(c.id)));
        let indices: Vec<u32> = received.iter().map(|(_, index)| *index).collect();
        assert!(indices.windows(2).all(|pair| pair[0] < pair[1]));

        assert!(b.drain_updates().is_empty());
    }

    /// Chunks the server has no decoder for still reach everyone else
    #[tokio::test]
    async fn test_unknown_chunk_propagates() {
        let server = start_server().await;
        let a = RawPeer::join(&server, status("A", "A", "1")).await;
        let mut b = RawPeer::join(&server, status("B", "B", "3")).await;

        let mut bytes = b"zzzz\0".to_vec();
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 4]);
        bytes.extend_from_slice(b"\r\n\0");
        let frame = Frame::read(&ChunkRegistry::new(), &bytes).unwrap();
        assert!(frame.has_extra());
        a.connection.send_management(frame);

        loop {
            let frame = next_frame(&mut b.events).await;
            if frame.has_extra() {
                assert_eq!(frame.head(), Some(a.id));
                assert!(frame.extra().starts_with(b"zzzz\0"));
                break;
            }
        }
    }

    /// A newcomer in a reused slot is not filtered against the previous
    /// occupant's update indices
    #[tokio::test]
    async fn test_reused_slot_updates_not_filtered() {
        let server = start_server().await;
        let mut a = RawPeer::join(&server, status("A", "A", "1")).await;
        sleep(Duration::from_millis(100)).await;

        let mut b = GhostClient::local(&server, "B").await;
        welcomed(&mut b).await;
        b.send_status(status("B", "A", "1"));
        wait_for(&mut b, |e| matches!(e, ClientEvent::GhostSpawned(id) if *id == a.id)).await;
        for x in 0..5 {
            b.send_update(ChunkUUpdate {
                position: Vec2::new(x as f32, 0.0),
                ..ChunkUUpdate::default()
            })
            .unwrap();
        }
        sleep(Duration::from_millis(200)).await;
        let b_id = b.player_id().unwrap();
        assert!(a.drain_updates().iter().any(|(head, index)| *head == Some(b_id) && *index == 5));

        b.disconnect();
        sleep(Duration::from_millis(200)).await;

        let mut c = GhostClient::local(&server, "C").await;
        welcomed(&mut c).await;
        assert_eq!(c.player_id(), Some(b_id));
        c.send_status(status("C", "A", "1"));
        wait_for(&mut c, |e| matches!(e, ClientEvent::GhostSpawned(id) if *id == a.id)).await;
        for _ in 0..3 {
            c.send_update(ChunkUUpdate::default()).unwrap();
        }
        sleep(Duration::from_millis(200)).await;

        let indices: Vec<u32> = a
            .drain_updates()
            .into_iter()
            .filter(|(head, _)| *head == Some(b_id))
            .map(|(_, index)| index)
            .collect();
        assert!(!indices.is_empty());
        assert!(indices.iter().all(|index| *index <= 3));
    }

    /// The hosting player's updates reach remote players and back
    #[tokio::test]
    async fn test_local_and_remote_share_room() {
        let server = start_server().await;
        let mut host = GhostClient::local(&server, "Host").await;
        welcomed(&mut host).await;

        let port = server.local_addr().port();
        let mut remote = GhostClient::connect(&ConnectionTarget::new("127.0.0.1", port), "Theo")
            .await
            .unwrap();
        welcomed(&mut remote).await;

        host.send_status(status("Host", "A", "1"));
        remote.send_status(status("Theo", "A", "1"));
        let host_id = host.player_id().unwrap();
        wait_for(&mut remote, |e| matches!(e, ClientEvent::GhostSpawned(id) if *id == host_id)).await;
        sleep(Duration::from_millis(100)).await;

        host.send_update(ChunkUUpdate {
            position: Vec2::new(40.0, 8.0),
            ..ChunkUUpdate::default()
        })
        .unwrap();
        wait_for(&mut remote, |e| matches!(e, ClientEvent::GhostUpdated(id) if *id == host_id)).await;
        let ghost = remote.ghosts().get(host_id).unwrap();
        assert_eq!(ghost.update.as_ref().unwrap().position, Vec2::new(40.0, 8.0));
    }
}

/// COMMAND TESTS
mod command_tests {
    use super::*;

    #[tokio::test]
    async fn test_kick_requires_op() {
        let server = start_server().await;
        let mut host = GhostClient::local(&server, "Host").await;
        welcomed(&mut host).await;
        let port = server.local_addr().port();
        let mut theo = GhostClient::connect(&ConnectionTarget::new("127.0.0.1", port), "Theo")
            .await
            .unwrap();
        welcomed(&mut theo).await;

        theo.send_chat("/kick Host");
        wait_for_chat(&mut theo, "OP").await;

        host.send_chat("/kick Theo");
        wait_for(&mut theo, |e| matches!(e, ClientEvent::Disconnected)).await;
        assert_eq!(server.player_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_command_reported() {
        let server = start_server().await;
        let mut host = GhostClient::local(&server, "Host").await;
        welcomed(&mut host).await;

        host.send_chat("/nope");
        let text = wait_for_chat(&mut host, "unknown command").await;
        assert!(text.contains("nope"));
    }
}

/// RACE TESTS
mod race_tests {
    use super::*;

    /// Reacts to a move request the way a game would, then reports the new
    /// status.
    async fn follow_move(client: &mut GhostClient, name: &str) -> ChunkMPlayer {
        let event = wait_for(client, |e| matches!(e, ClientEvent::MoveTo(_))).await;
        let ClientEvent::MoveTo(move_to) = event else {
            unreachable!()
        };
        let next = if move_to.is_menu() {
            ChunkMPlayer::new(name)
        } else {
            status(name, &move_to.sid, "start")
        };
        client.send_status(next.clone());
        next
    }

    async fn complete(client: &mut GhostClient, mut current: ChunkMPlayer) {
        current.level_completed = true;
        client.send_status(current);
    }

    #[tokio::test]
    async fn test_two_player_race() {
        let server = start_server().await;
        let mut a = GhostClient::local(&server, "Madeline").await;
        let mut b = GhostClient::local(&server, "Theo").await;
        welcomed(&mut a).await;
        welcomed(&mut b).await;

        a.send_chat("/race + W0");
        wait_for_chat(&mut a, "area 1 is W0").await;
        a.send_chat("/race + W1");
        wait_for_chat(&mut a, "area 2 is W1").await;

        b.send_chat("/race join 1");
        wait_for_chat(&mut b, "Theo joined race #1").await;

        a.send_chat("/race start");
        wait_for_chat(&mut a, "starts in").await;

        // everyone to the menu, then the countdown sends them to W0
        follow_move(&mut a, "Madeline").await;
        follow_move(&mut b, "Theo").await;
        let a_at = follow_move(&mut a, "Madeline").await;
        let b_at = follow_move(&mut b, "Theo").await;
        assert_eq!(a_at.sid, "W0");

        complete(&mut a, a_at).await;
        let a_at = follow_move(&mut a, "Madeline").await;
        assert_eq!(a_at.sid, "W1");
        complete(&mut a, a_at).await;
        wait_for_chat(&mut a, "Madeline finished #1").await;

        complete(&mut b, b_at).await;
        let b_at = follow_move(&mut b, "Theo").await;
        complete(&mut b, b_at).await;

        let results = wait_for_chat(&mut b, "results").await;
        let madeline = results.find("Madeline").unwrap();
        let theo = results.find("Theo").unwrap();
        assert!(madeline < theo);
    }
}
