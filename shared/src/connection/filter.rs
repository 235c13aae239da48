//! Out-of-order defense for the update channel

use std::collections::HashMap;

/// Remembers the highest update index accepted per player and rejects
/// anything older. This is a filter, not a reorder buffer: late updates are
/// simply lost.
#[derive(Debug, Default, Clone)]
pub struct UpdateFilter {
    latest: HashMap<u32, u32>,
}

impl UpdateFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true and records `index` if it is newer than anything seen
    /// from `player_id`. Duplicates of the latest index are rejected.
    pub fn accept(&mut self, player_id: u32, index: u32) -> bool {
        match self.latest.get(&player_id) {
            Some(&latest) if index <= latest => false,
            _ => {
                self.latest.insert(player_id, index);
                true
            }
        }
    }

    /// Forgets a player so a reconnect can start counting from zero again.
    pub fn forget(&mut self, player_id: u32) {
        self.latest.remove(&player_id);
    }

    pub fn latest(&self, player_id: u32) -> Option<u32> {
        self.latest.get(&player_id).copied()
    }
}
