//! Server settings
//!
//! Plain structs with defaults. The binary fills them from command-line flags;
//! tests build them directly and shorten the race timings.

use shared::DEFAULT_PORT;
use std::time::Duration;

/// Delays used by the race start sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceTiming {
    /// Time between the start announcement and sending everyone to the menu.
    pub warning: Duration,
    /// Gap between countdown numbers.
    pub countdown_step: Duration,
    /// How long members get to reach the menu before they are dropped.
    pub menu_timeout: Duration,
}

impl Default for RaceTiming {
    fn default() -> Self {
        Self {
            warning: Duration::from_secs(3),
            countdown_step: Duration::from_secs(1),
            menu_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    /// Shared by the TCP listener and the UDP socket. Zero picks a free port.
    pub port: u16,
    /// Shown to clients in the welcome frame and used as the sender name of
    /// server chat.
    pub name: String,
    pub command_prefix: String,
    /// Upper bound for [`crate::network::Server::request`].
    pub request_timeout: Duration,
    /// How often the race state machine is ticked.
    pub race_tick: Duration,
    pub race: RaceTiming,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            name: "GhostNet".to_string(),
            command_prefix: "/".to_string(),
            request_timeout: Duration::from_secs(5),
            race_tick: Duration::from_millis(100),
            race: RaceTiming::default(),
        }
    }
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
