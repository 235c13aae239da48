use clap::Parser;
use log::{error, info, warn};
use server::commands::{self, Invoker};
use server::{Server, ServerSettings};
use shared::chunks::Color;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// Port shared by TCP and UDP
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
    /// Name shown to clients and used for server chat
    #[arg(short, long, default_value = "GhostNet")]
    name: String,
    /// Prefix that turns a chat line into a command
    #[arg(long, default_value = "/")]
    command_prefix: String,
    /// Run as a console server: stdin lines are commands or broadcasts
    #[arg(long)]
    headless: bool,
    /// File touched every few seconds while the server is healthy
    #[arg(long)]
    health_file: Option<PathBuf>,
}

/// Parses command-line arguments, then runs the server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let settings = ServerSettings {
        host: args.host,
        port: args.port,
        name: args.name,
        command_prefix: args.command_prefix,
        ..ServerSettings::default()
    };
    let server = Server::bind(settings).await?;
    let server_handle = server.start();

    if args.headless {
        spawn_console(Arc::clone(&server));
    }
    if let Some(path) = args.health_file {
        spawn_health_file(Arc::clone(&server), path);
    }

    tokio::select! {
        result = server_handle => {
            if let Err(e) = result {
                error!("Server task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    Ok(())
}

/// Reads stdin line by line. Lines with the command prefix run as console
/// commands; anything else is broadcast as server chat.
fn spawn_console(server: Arc<Server>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read console input: {}", e);
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let prefix = &server.settings().command_prefix;
            match line.strip_prefix(prefix.as_str()) {
                Some(command) => {
                    commands::spawn(Arc::clone(&server), Invoker::Console, command.to_string());
                }
                None => server.broadcast_chat(line, Color::GOLD).await,
            }
        }
    });
}

fn spawn_health_file(server: Arc<Server>, path: PathBuf) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            if !server.is_healthy().await {
                warn!("Server is unhealthy, not touching {}", path.display());
                continue;
            }
            let stamp = shared::now_millis().to_string();
            if let Err(e) = tokio::fs::write(&path, stamp).await {
                warn!("Failed to write health file {}: {}", path.display(), e);
            }
        }
    });
}
