use crate::chunk::Chunk;
use serde::{Deserialize, Serialize};

/// Text or icon shown above a player's ghost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMEmote {
    pub value: String,
}

impl Chunk for ChunkMEmote {
    const TAG: &'static str = "nME";

    fn is_valid(&self) -> bool {
        !self.value.trim().is_empty()
    }

    fn is_sendable(&self) -> bool {
        Chunk::is_valid(self)
    }
}
