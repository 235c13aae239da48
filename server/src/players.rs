//! Connected players and operator privileges
//!
//! This module keeps the server-side view of every connection:
//! - Slot allocation with generation checks, so a player id can be reused
//!   after a disconnect without late events reaching the newcomer
//! - The canonical status and last position update per player
//! - The ordered OP list that decides who may kick whom
//!
//! Player ids on the wire are slot indices; the generation never leaves the
//! server.

use log::info;
use shared::chunks::{ChunkMPlayer, ChunkUUpdate, Room};
use shared::{Connection, ConnectionId};
use std::collections::HashSet;
use std::sync::Arc;

/// Server-side state for one connection
#[derive(Debug)]
pub struct PlayerRecord {
    pub id: ConnectionId,
    pub connection: Arc<dyn Connection>,
    /// Most recent status chunk. `None` until the client sends its first one.
    pub status: Option<ChunkMPlayer>,
    /// Last update frame payload, used by teleports to find a position.
    pub last_update: Option<ChunkUUpdate>,
    /// True for the in-process client of a hosting player.
    pub is_local: bool,
}

impl PlayerRecord {
    pub fn new(connection: Arc<dyn Connection>, is_local: bool) -> Self {
        Self {
            id: connection.id(),
            connection,
            status: None,
            last_update: None,
            is_local,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|status| status.name.as_str())
            .filter(|name| !name.is_empty())
    }

    /// Name for log and chat output, falling back to the id.
    pub fn display_name(&self) -> String {
        match self.name() {
            Some(name) => name.to_string(),
            None => format!("#{}", self.id.index),
        }
    }

    pub fn room(&self) -> Option<Room> {
        self.status.as_ref().and_then(ChunkMPlayer::room)
    }

    /// Whether position updates from this player should reach `other`.
    pub fn shares_room_with(&self, other: &PlayerRecord) -> bool {
        match (&self.status, &other.status) {
            (Some(a), Some(b)) => a.same_room(b),
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    /// Allocated but possibly not yet filled.
    in_use: bool,
    record: Option<PlayerRecord>,
}

/// Generation-checked slot map of connected players
///
/// Freed indices are reused, lowest first, and every reuse bumps the
/// generation so stale [`ConnectionId`]s no longer resolve.
#[derive(Debug, Default)]
pub struct PlayerSlots {
    slots: Vec<Slot>,
}

impl PlayerSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a slot and returns the id its connection must carry.
    pub fn allocate(&mut self) -> ConnectionId {
        let index = match self.slots.iter().position(|slot| !slot.in_use) {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        slot.in_use = true;
        ConnectionId::new(index as u32, slot.generation)
    }

    /// Fills a slot previously returned by [`allocate`](Self::allocate).
    /// Returns false if the id is stale.
    pub fn insert(&mut self, record: PlayerRecord) -> bool {
        match self.slot_mut(record.id) {
            Some(slot) => {
                info!("Player {} connected", record.id);
                slot.record = Some(record);
                true
            }
            None => false,
        }
    }

    /// Frees a slot. Works for allocated-but-empty slots too, so a failed
    /// setup can give its id back.
    pub fn remove(&mut self, id: ConnectionId) -> Option<PlayerRecord> {
        let slot = self.slot_mut(id)?;
        let record = slot.record.take();
        slot.in_use = false;
        slot.generation = slot.generation.wrapping_add(1);
        if let Some(record) = &record {
            info!("Player {} ({}) disconnected", id, record.display_name());
        }
        record
    }

    fn slot_mut(&mut self, id: ConnectionId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.in_use && slot.generation == id.generation)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&PlayerRecord> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.in_use && slot.generation == id.generation)
            .and_then(|slot| slot.record.as_ref())
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut PlayerRecord> {
        self.slot_mut(id).and_then(|slot| slot.record.as_mut())
    }

    /// Looks a player up by the id seen on the wire.
    pub fn by_player_id(&self, player_id: u32) -> Option<&PlayerRecord> {
        self.slots
            .get(player_id as usize)
            .and_then(|slot| slot.record.as_ref())
    }

    /// Case-insensitive name lookup.
    pub fn by_name(&self, name: &str) -> Option<&PlayerRecord> {
        self.iter().find(|record| {
            record
                .name()
                .map_or(false, |own| own.eq_ignore_ascii_case(name))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.slots.iter().filter_map(|slot| slot.record.as_ref())
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.iter().map(|record| record.id).collect()
    }

    /// Every other player whose status puts them in `id`'s room.
    pub fn room_peers(&self, id: ConnectionId) -> Vec<&PlayerRecord> {
        let Some(sender) = self.get(id) else {
            return Vec::new();
        };
        self.iter()
            .filter(|other| other.id != id && sender.shares_room_with(other))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when two connected players report the same name.
    pub fn has_duplicate_names(&self) -> bool {
        let mut seen = HashSet::new();
        self.iter()
            .filter_map(PlayerRecord::name)
            .any(|name| !seen.insert(name.to_ascii_lowercase()))
    }
}

/// Operators in the order they were granted
///
/// Precedence follows grant order: an OP may only act against OPs granted
/// after them. The server console is not in the list and outranks everyone.
#[derive(Debug, Default, Clone)]
pub struct OpList {
    ops: Vec<ConnectionId>,
}

impl OpList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if `id` already was an OP.
    pub fn grant(&mut self, id: ConnectionId) -> bool {
        if self.is_op(id) {
            return false;
        }
        self.ops.push(id);
        true
    }

    pub fn revoke(&mut self, id: ConnectionId) -> bool {
        let before = self.ops.len();
        self.ops.retain(|op| *op != id);
        self.ops.len() != before
    }

    pub fn is_op(&self, id: ConnectionId) -> bool {
        self.ops.contains(&id)
    }

    /// Position in grant order, 0 being the earliest.
    pub fn rank(&self, id: ConnectionId) -> Option<usize> {
        self.ops.iter().position(|op| *op == id)
    }

    /// Whether `actor` may kick `target`. Non-OP targets can be kicked by any
    /// OP; OP targets only by an OP granted earlier.
    pub fn can_kick(&self, actor: ConnectionId, target: ConnectionId) -> bool {
        match (self.rank(actor), self.rank(target)) {
            (Some(_), None) => true,
            (Some(a), Some(t)) => a < t,
            (None, _) => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.ops.iter().copied()
    }
}
