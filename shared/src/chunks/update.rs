use super::{Color, Vec2};
use crate::chunk::Chunk;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Facing {
    Left,
    #[default]
    Right,
}

/// Position and sprite state, sent many times per second on the update
/// channel. `update_index` increases with every update a player sends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkUUpdate {
    pub update_index: u32,
    pub position: Vec2,
    pub speed: Vec2,
    pub scale: Vec2,
    pub color: Color,
    pub facing: Facing,
    pub sprite_mode: u8,
    pub sprite_rate: f32,
    pub animation_id: String,
    pub animation_frame: i32,
    pub hair_color: Color,
    pub hair_count: u8,
    pub hair_simulate_motion: bool,
    pub dead: bool,
    pub dream_dashing: bool,
}

impl Chunk for ChunkUUpdate {
    const TAG: &'static str = "nU";
}
