//! Error type shared by the chunk codec, frame codec and transport layers

use std::io;
use thiserror::Error;

/// Everything that can go wrong while encoding, decoding or moving frames
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("input ended while reading {0}")]
    Truncated(&'static str),

    #[error("invalid chunk tag {0:?}")]
    InvalidTag(String),

    #[error("chunk {tag} is {len} bytes (max {max})")]
    ChunkTooLarge { tag: String, len: usize, max: usize },

    #[error("failed to decode chunk {tag}: {source}")]
    Decode {
        tag: &'static str,
        #[source]
        source: bincode::Error,
    },

    #[error("failed to encode chunk {tag}: {source}")]
    Encode {
        tag: &'static str,
        #[source]
        source: bincode::Error,
    },

    #[error("frame already belongs to player {assigned}, refusing {requested}")]
    HeadMismatch { assigned: u32, requested: u32 },

    #[error("chunk type registered twice under tag {0}")]
    DuplicateTag(&'static str),
}

impl ProtocolError {
    /// True when the underlying socket is simply gone rather than misbehaving.
    pub fn is_closed(&self) -> bool {
        match self {
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            ProtocolError::Truncated(_) => true,
            _ => false,
        }
    }
}
