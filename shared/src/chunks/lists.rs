use crate::chunk::Chunk;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModInfo {
    pub name: String,
    pub version: String,
}

/// Mods a client has loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkRListMods {
    pub mods: Vec<ModInfo>,
}

impl Chunk for ChunkRListMods {
    const TAG: &'static str = "nRlM";
}

/// Area ids a client can enter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkRListAreas {
    pub areas: Vec<String>,
}

impl Chunk for ChunkRListAreas {
    const TAG: &'static str = "nRlA";
}

impl ChunkRListAreas {
    pub fn contains(&self, sid: &str) -> bool {
        self.areas.iter().any(|area| area == sid)
    }
}
