use super::Color;
use crate::chunk::Chunk;
use serde::{Deserialize, Serialize};

/// Chat id carried by messages the server has not confirmed yet.
pub const UNCONFIRMED_ID: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMChat {
    pub id: u32,
    /// Display name, filled in by the server.
    pub name: String,
    pub text: String,
    pub color: Color,
    /// Unix time in milliseconds.
    pub date_ms: u64,
    #[serde(skip)]
    pub created_by_server: bool,
}

impl Chunk for ChunkMChat {
    const TAG: &'static str = "nMC";

    fn is_valid(&self) -> bool {
        !self.text.is_empty()
    }
}

impl ChunkMChat {
    /// A message typed locally, not yet seen by the server.
    pub fn outgoing(text: impl Into<String>, date_ms: u64) -> Self {
        Self {
            id: UNCONFIRMED_ID,
            name: String::new(),
            text: text.into(),
            color: Color::WHITE,
            date_ms,
            created_by_server: false,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.id != UNCONFIRMED_ID
    }
}
