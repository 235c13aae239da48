use super::Vec2;
use crate::chunk::Chunk;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioParam {
    pub name: String,
    pub value: f32,
}

/// One-shot sound played by a player.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkUAudioPlay {
    pub sound: String,
    pub param: Option<AudioParam>,
    pub position: Option<Vec2>,
}

impl Chunk for ChunkUAudioPlay {
    const TAG: &'static str = "nUaP";

    fn is_valid(&self) -> bool {
        !self.sound.is_empty()
    }

    fn is_sendable(&self) -> bool {
        !self.sound.is_empty()
    }
}

/// State of a looping track, e.g. the current music event and its parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkUAudioTrackState {
    pub track: String,
    pub event: String,
    pub progress: Option<i32>,
    pub params: Vec<AudioParam>,
    pub playing: bool,
}

impl Chunk for ChunkUAudioTrackState {
    const TAG: &'static str = "nUaT";
}
