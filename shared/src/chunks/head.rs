use crate::chunk::Chunk;
use serde::{Deserialize, Serialize};

/// Identity head: which player a frame belongs to.
///
/// Frames built by the server on its own behalf (welcome, broadcasts,
/// command replies) have no head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkHHead {
    pub player_id: u32,
}

impl Chunk for ChunkHHead {
    const TAG: &'static str = "nH";
}
