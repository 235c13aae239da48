use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("player {0} is not connected")]
    PlayerNotFound(u32),

    #[error("player {player} did not answer a request for {tag} in time")]
    RequestTimeout { player: u32, tag: &'static str },

    #[error("player {0} disconnected before answering")]
    Disconnected(u32),
}
