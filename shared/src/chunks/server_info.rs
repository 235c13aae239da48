use crate::chunk::Chunk;
use serde::{Deserialize, Serialize};

/// Sent once to every new connection together with its head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMServerInfo {
    pub name: String,
    pub protocol_version: u32,
    pub command_prefix: String,
}

impl Chunk for ChunkMServerInfo {
    const TAG: &'static str = "nMSI";
}
