//! Ghost mirroring
//!
//! Tracks the last known status of every other player and decides which of
//! them are visible as ghosts: exactly those in the same room as the local
//! player. Rendering is someone else's job; this module only reports which
//! ghosts appeared, changed or went away.

use shared::chunks::{ChunkMPlayer, ChunkUUpdate};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum GhostChange {
    Spawned(u32),
    Updated(u32),
    Removed(u32),
}

/// A visible remote player
#[derive(Debug, Clone)]
pub struct Ghost {
    pub id: u32,
    pub status: ChunkMPlayer,
    /// Latest position update, `None` until the first one arrives.
    pub update: Option<ChunkUUpdate>,
}

#[derive(Debug, Default)]
pub struct GhostRegistry {
    own: Option<ChunkMPlayer>,
    statuses: HashMap<u32, ChunkMPlayer>,
    ghosts: HashMap<u32, Ghost>,
}

impl GhostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u32) -> Option<&Ghost> {
        self.ghosts.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ghost> {
        self.ghosts.values()
    }

    pub fn len(&self) -> usize {
        self.ghosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ghosts.is_empty()
    }

    /// Last known status of any other player, visible or not.
    pub fn status_of(&self, id: u32) -> Option<&ChunkMPlayer> {
        self.statuses.get(&id)
    }

    fn visible(&self, status: &ChunkMPlayer) -> bool {
        self.own
            .as_ref()
            .is_some_and(|own| own.same_room(status))
    }

    /// The local player moved. Every known player is checked again.
    pub fn set_own_status(&mut self, status: ChunkMPlayer) -> Vec<GhostChange> {
        self.own = Some(status);

        let mut ids: Vec<u32> = self.statuses.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| {
                let status = self.statuses.get(&id)?.clone();
                self.reconcile(id, status)
            })
            .collect()
    }

    /// Another player's status arrived. An invalid status is a removal notice.
    pub fn on_status(&mut self, id: u32, status: ChunkMPlayer) -> Option<GhostChange> {
        if status.name.is_empty() {
            self.statuses.remove(&id);
            return self.ghosts.remove(&id).map(|_| GhostChange::Removed(id));
        }
        self.statuses.insert(id, status.clone());
        self.reconcile(id, status)
    }

    fn reconcile(&mut self, id: u32, status: ChunkMPlayer) -> Option<GhostChange> {
        if !self.visible(&status) {
            return self.ghosts.remove(&id).map(|_| GhostChange::Removed(id));
        }
        match self.ghosts.get_mut(&id) {
            Some(ghost) => {
                if ghost.status == status {
                    return None;
                }
                ghost.status = status;
                Some(GhostChange::Updated(id))
            }
            None => {
                self.ghosts.insert(
                    id,
                    Ghost {
                        id,
                        status,
                        update: None,
                    },
                );
                Some(GhostChange::Spawned(id))
            }
        }
    }

    /// Updates for players that are not visible are ignored.
    pub fn on_update(&mut self, id: u32, update: ChunkUUpdate) -> Option<GhostChange> {
        let ghost = self.ghosts.get_mut(&id)?;
        ghost.update = Some(update);
        Some(GhostChange::Updated(id))
    }

    /// Forgets everyone, returning the ghosts that were visible.
    pub fn clear(&mut self) -> Vec<GhostChange> {
        self.statuses.clear();
        let mut ids: Vec<u32> = self.ghosts.drain().map(|(id, _)| id).collect();
        ids.sort_unstable();
        ids.into_iter().map(GhostChange::Removed).collect()
    }
}
