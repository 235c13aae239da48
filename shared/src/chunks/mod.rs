//! Built-in chunk types
//!
//! Tag naming follows the channel a chunk normally travels on: `nH` is the
//! identity head, `nM*` are management chunks, `nU*` update chunks and
//! `nR*` request answers.

mod audio;
mod chat;
mod collision;
mod emote;
mod head;
mod lists;
mod move_to;
mod particles;
mod player;
mod request;
mod server_info;
mod session;
mod update;

pub use audio::{AudioParam, ChunkUAudioPlay, ChunkUAudioTrackState};
pub use chat::{ChunkMChat, UNCONFIRMED_ID};
pub use collision::ChunkUActionCollision;
pub use emote::ChunkMEmote;
pub use head::ChunkHHead;
pub use lists::{ChunkRListAreas, ChunkRListMods, ModInfo};
pub use move_to::ChunkMMoveTo;
pub use particles::{ChunkUParticles, ParticleSystem};
pub use player::{AreaMode, ChunkMPlayer, LevelExit, Room};
pub use request::ChunkMRequest;
pub use server_info::ChunkMServerInfo;
pub use session::{ChunkMSession, EntityId, PlayerInventory};
pub use update::{ChunkUUpdate, Facing};

use crate::chunk::ChunkRegistry;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const RED: Color = Color::rgb(238, 34, 34);
    pub const GOLD: Color = Color::rgb(255, 215, 0);
    pub const ORANGE: Color = Color::rgb(255, 165, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

/// Registers every built-in chunk type.
pub fn register_builtin(registry: &mut ChunkRegistry) {
    // Built-in tags are distinct and valid, so registration cannot fail.
    let results = [
        registry.register::<ChunkHHead>(),
        registry.register::<ChunkMPlayer>(),
        registry.register::<ChunkMSession>(),
        registry.register::<ChunkMMoveTo>(),
        registry.register::<ChunkMChat>(),
        registry.register::<ChunkMEmote>(),
        registry.register::<ChunkMRequest>(),
        registry.register::<ChunkMServerInfo>(),
        registry.register::<ChunkRListMods>(),
        registry.register::<ChunkRListAreas>(),
        registry.register::<ChunkUUpdate>(),
        registry.register::<ChunkUAudioPlay>(),
        registry.register::<ChunkUAudioTrackState>(),
        registry.register::<ChunkUParticles>(),
        registry.register::<ChunkUActionCollision>(),
    ];
    for result in results {
        if let Err(e) = result {
            log::error!("Built-in chunk registration failed: {}", e);
        }
    }
}
