use super::{Color, Vec2};
use crate::chunk::Chunk;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParticleSystem {
    #[default]
    Particles,
    Foreground,
    Background,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkUParticles {
    pub system: ParticleSystem,
    pub particle_type: String,
    pub amount: u32,
    pub position: Vec2,
    pub position_range: Vec2,
    pub color: Option<Color>,
    pub direction: Option<f32>,
}

impl Chunk for ChunkUParticles {
    const TAG: &'static str = "nUP";

    fn is_valid(&self) -> bool {
        self.amount > 0 && !self.particle_type.is_empty()
    }
}
