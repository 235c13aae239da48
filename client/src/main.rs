use clap::Parser;
use client::{ClientEvent, GhostClient};
use log::{info, warn};
use server::{Server, ServerSettings};
use shared::chunks::{AreaMode, ChunkMPlayer};
use shared::ConnectionTarget;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server to connect to, as host[:port]. A local address hosts the
    /// server in this process unless one is already running there.
    #[arg(short = 's', long, default_value = "localhost")]
    server: String,

    /// Player name
    #[arg(short = 'n', long, default_value = "Madeline")]
    name: String,

    /// Area to report as the current one
    #[arg(long)]
    area: Option<String>,

    /// Level (room) inside the area
    #[arg(long, default_value = "1")]
    level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let target = ConnectionTarget::parse(&args.server)?;

    let mut client = match host_locally(&target).await {
        Some(server) => GhostClient::local(&server, &args.name).await,
        None => {
            info!("Connecting to: {}", target);
            GhostClient::connect(&target, &args.name).await?
        }
    };

    if let Some(area) = args.area {
        let mut status = ChunkMPlayer::new(args.name.clone());
        status.sid = area;
        status.mode = AreaMode::Normal;
        status.level = args.level;
        client.send_status(status);
    }

    info!("Type to chat; lines starting with the server's command prefix run commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    client.send_chat(&line);
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            },
            event = client.next_event() => match event {
                Some(ClientEvent::Disconnected) | None => break,
                Some(event) => log_event(&client, event),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.disconnect();
    Ok(())
}

/// Starts an in-process server when the target is this machine. Returns
/// `None` when something else already owns the port.
async fn host_locally(target: &ConnectionTarget) -> Option<std::sync::Arc<Server>> {
    if !target.is_local() {
        return None;
    }
    let settings = ServerSettings {
        port: target.port,
        ..ServerSettings::default()
    };
    match Server::bind(settings).await {
        Ok(server) => {
            server.start();
            info!("Hosting on {}", server.local_addr());
            Some(server)
        }
        Err(e) => {
            warn!("Not hosting locally ({}), connecting instead", e);
            None
        }
    }
}

fn log_event(client: &GhostClient, event: ClientEvent) {
    match event {
        ClientEvent::Welcome { player_id, info } => {
            info!("Welcome to {} (player {})", info.name, player_id)
        }
        ClientEvent::Chat(chat) => println!("{}: {}", chat.name, chat.text),
        ClientEvent::GhostSpawned(id) => {
            let name = client
                .ghosts()
                .get(id)
                .map(|ghost| ghost.status.name.clone())
                .unwrap_or_default();
            info!("{} appeared", name)
        }
        ClientEvent::GhostRemoved(id) => info!("Ghost {} left", id),
        ClientEvent::GhostUpdated(_) => {}
        ClientEvent::MoveTo(move_to) => info!("Asked to move to {:?}", move_to.sid),
        ClientEvent::Emote { player_id, emote } => info!("{} emotes {}", player_id, emote.value),
        ClientEvent::Disconnected => info!("Disconnected"),
    }
}
