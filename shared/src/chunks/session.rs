use super::Vec2;
use crate::chunk::Chunk;
use serde::{Deserialize, Serialize};

/// Entity reference inside a level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId {
    pub level: String,
    pub id: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerInventory {
    pub dashes: u8,
    pub dream_dash: bool,
    pub backpack: bool,
    pub no_refills: bool,
}

/// Snapshot of a player's in-level session, requested by the server when
/// another player teleports to them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMSession {
    pub in_session: bool,
    pub respawn_point: Option<Vec2>,
    pub inventory: PlayerInventory,
    pub flags: Vec<String>,
    pub level_flags: Vec<String>,
    pub strawberries: Vec<EntityId>,
    pub do_not_load: Vec<EntityId>,
    pub keys: Vec<EntityId>,
    pub furthest_seen_level: Option<String>,
    pub start_checkpoint: Option<String>,
    pub color_grade: Option<String>,
    pub time: i64,
    pub deaths: u32,
    pub dashes: u32,
    pub heart_gem: bool,
}

impl Chunk for ChunkMSession {
    const TAG: &'static str = "nMSe";

    fn is_valid(&self) -> bool {
        self.in_session
    }
}

impl ChunkMSession {
    /// The answer a player gives when asked for a session outside a level.
    pub fn none() -> Self {
        Self::default()
    }
}
