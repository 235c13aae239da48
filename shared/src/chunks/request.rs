use crate::chunk::{validate_tag, Chunk};
use serde::{Deserialize, Serialize};

/// Asks the receiver to answer with a frame containing a chunk of `tag`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMRequest {
    pub tag: String,
}

impl Chunk for ChunkMRequest {
    const TAG: &'static str = "nM?";

    fn is_valid(&self) -> bool {
        validate_tag(&self.tag).is_ok()
    }
}

impl ChunkMRequest {
    pub fn of<T: Chunk>() -> Self {
        Self {
            tag: T::TAG.to_string(),
        }
    }
}
