//! Player status: who a player is and where they are

use crate::chunk::Chunk;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of an area a player is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AreaMode {
    #[default]
    Normal,
    BSide,
    CSide,
}

impl AreaMode {
    /// Parses `a`/`b`/`c` (case-insensitive) or `0`/`1`/`2`.
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "a" | "0" | "normal" => Some(AreaMode::Normal),
            "b" | "1" | "bside" => Some(AreaMode::BSide),
            "c" | "2" | "cside" => Some(AreaMode::CSide),
            _ => None,
        }
    }
}

impl fmt::Display for AreaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            AreaMode::Normal => "A",
            AreaMode::BSide => "B",
            AreaMode::CSide => "C",
        };
        f.write_str(letter)
    }
}

/// How a player left the level they were in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelExit {
    Restart,
    GoldenBerryRestart,
    SaveAndQuit,
    GiveUp,
    Completed,
    CompletedInterlude,
}

impl LevelExit {
    /// Exits that mean the player walked away from the run.
    pub fn is_abandon(self) -> bool {
        matches!(self, LevelExit::SaveAndQuit | LevelExit::GiveUp)
    }
}

/// The updates scope: players only exchange position updates when their
/// rooms are identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Room {
    pub sid: String,
    pub mode: AreaMode,
    pub level: String,
}

/// Canonical status of one player.
///
/// An empty name marks the chunk invalid; the server sends such a chunk to
/// announce that a player left.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMPlayer {
    /// Set by the server when it sends a player's own status back to them.
    pub is_echo: bool,
    pub name: String,
    /// Area id; empty while in the menu.
    pub sid: String,
    pub mode: AreaMode,
    pub level: String,
    pub level_completed: bool,
    pub level_exit: Option<LevelExit>,
    pub idle: bool,
}

impl Chunk for ChunkMPlayer {
    const TAG: &'static str = "nM";

    fn is_valid(&self) -> bool {
        !self.name.is_empty()
    }
}

impl ChunkMPlayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The removal notice the server broadcasts when a player disconnects.
    pub fn removed() -> Self {
        Self::default()
    }

    pub fn in_menu(&self) -> bool {
        self.sid.is_empty()
    }

    /// `None` while in the menu; menu players never share a room.
    pub fn room(&self) -> Option<Room> {
        if self.in_menu() {
            return None;
        }
        Some(Room {
            sid: self.sid.clone(),
            mode: self.mode,
            level: self.level.clone(),
        })
    }

    pub fn same_room(&self, other: &ChunkMPlayer) -> bool {
        match (self.room(), other.room()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    pub fn is_in_area(&self, sid: &str, mode: AreaMode) -> bool {
        self.sid == sid && self.mode == mode
    }
}
