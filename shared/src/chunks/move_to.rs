use super::{AreaMode, ChunkMSession, Vec2};
use crate::chunk::Chunk;
use serde::{Deserialize, Serialize};

/// Server instruction to relocate a player. An empty `sid` means the menu.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMMoveTo {
    pub sid: String,
    pub mode: AreaMode,
    pub level: Option<String>,
    pub session: Option<ChunkMSession>,
    pub position: Option<Vec2>,
    pub force: bool,
}

impl Chunk for ChunkMMoveTo {
    const TAG: &'static str = "nMMT";
}

impl ChunkMMoveTo {
    pub fn menu() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn area(sid: impl Into<String>, mode: AreaMode) -> Self {
        Self {
            sid: sid.into(),
            mode,
            force: true,
            ..Self::default()
        }
    }

    pub fn is_menu(&self) -> bool {
        self.sid.is_empty()
    }
}
