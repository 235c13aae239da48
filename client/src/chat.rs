//! Chat history with optimistic local echo
//!
//! A message typed locally shows up right away with
//! [`UNCONFIRMED_ID`](shared::chunks::UNCONFIRMED_ID). When the server's copy
//! comes back with a real id it takes the place of the local entry, and any
//! other unconfirmed entries from the same sender are dropped.

use shared::chunks::ChunkMChat;
use std::collections::VecDeque;

/// Entries kept before the oldest are discarded.
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug)]
pub struct ChatLog {
    entries: VecDeque<ChunkMChat>,
    capacity: usize,
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &ChunkMChat> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds a message typed locally.
    pub fn push_local(&mut self, message: ChunkMChat) {
        self.push(message);
    }

    /// Adds a message from the server. Returns false if it was a repeat of
    /// an entry already shown.
    pub fn receive(&mut self, message: ChunkMChat) -> bool {
        if !message.is_confirmed() {
            self.push(message);
            return true;
        }

        if let Some(existing) = self.entries.iter_mut().find(|e| e.id == message.id) {
            let repeat = *existing == message;
            *existing = message;
            return !repeat;
        }

        let pending = self
            .entries
            .iter()
            .position(|e| !e.is_confirmed() && e.name == message.name);
        match pending {
            Some(index) => {
                let name = message.name.clone();
                self.entries[index] = message;
                let mut position = 0;
                self.entries.retain(|e| {
                    let keep = position == index || e.is_confirmed() || e.name != name;
                    position += 1;
                    keep
                });
            }
            None => self.push(message),
        }
        true
    }

    fn push(&mut self, message: ChunkMChat) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(message);
    }
}
