use crate::chunk::Chunk;
use serde::{Deserialize, Serialize};

/// The sender bumped into player `with`; `head` when it landed on their head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkUActionCollision {
    pub with: u32,
    pub head: bool,
}

impl Chunk for ChunkUActionCollision {
    const TAG: &'static str = "nUaC";
}
