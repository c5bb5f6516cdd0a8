//! Ordered list of items to read, with the index of the one playing.

use serde::{Deserialize, Serialize};

/// One entry of the reading queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub text: String,
    pub title: String,
}

impl QueueItem {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self { text: text.into(), title: title.into() }
    }
}

/// Published view of the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub items: Vec<QueueItem>,
    pub current_index: Option<usize>,
    pub is_playing_from_queue: bool,
    pub loop_enabled: bool,
}

/// Result of removing an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Nothing was removed.
    Missing,
    /// An item other than the playing one was removed.
    Other,
    /// The playing item was removed and another one now sits at its index.
    CurrentReplaced(usize),
    /// The playing item was the last one; queue playback is over.
    CurrentWasLast,
}

/// Queue state. `current_index` is always a valid index while
/// `is_playing_from_queue` is set.
#[derive(Debug, Clone, Default)]
pub struct PlayQueue {
    items: Vec<QueueItem>,
    current_index: Option<usize>,
    is_playing_from_queue: bool,
    loop_enabled: bool,
}

impl PlayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing_from_queue
    }

    pub fn current_item(&self) -> Option<&QueueItem> {
        self.current_index.and_then(|i| self.items.get(i))
    }

    pub fn add(&mut self, item: QueueItem) {
        self.items.push(item);
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
    }

    /// Start queue playback at `index`. Returns the item to play.
    pub fn start_at(&mut self, index: usize) -> Option<&QueueItem> {
        if index >= self.items.len() {
            return None;
        }
        self.current_index = Some(index);
        self.is_playing_from_queue = true;
        self.items.get(index)
    }

    /// Leave queue playback.
    pub fn finish(&mut self) {
        self.current_index = None;
        self.is_playing_from_queue = false;
    }

    /// Move past the current item after it ended naturally.
    ///
    /// Returns the next item, or `None` when the queue is exhausted (queue
    /// playback is then over).
    pub fn advance(&mut self) -> Option<&QueueItem> {
        if !self.is_playing_from_queue {
            return None;
        }
        let next = self.current_index.map_or(0, |i| i + 1);
        if next < self.items.len() {
            self.current_index = Some(next);
        } else if self.loop_enabled && !self.items.is_empty() {
            self.current_index = Some(0);
        } else {
            self.finish();
            return None;
        }
        self.current_item()
    }

    pub fn remove(&mut self, index: usize) -> Removal {
        if index >= self.items.len() {
            return Removal::Missing;
        }
        self.items.remove(index);

        let Some(current) = self.current_index else {
            return Removal::Other;
        };
        if index < current {
            self.current_index = Some(current - 1);
            Removal::Other
        } else if index > current {
            Removal::Other
        } else if index < self.items.len() {
            Removal::CurrentReplaced(index)
        } else {
            self.finish();
            Removal::CurrentWasLast
        }
    }

    /// Move an item, keeping `current_index` on the same item.
    pub fn move_item(&mut self, from: usize, to: usize) -> bool {
        if from >= self.items.len() || to >= self.items.len() {
            return false;
        }
        if from == to {
            return true;
        }
        let item = self.items.remove(from);
        self.items.insert(to, item);

        if let Some(current) = self.current_index {
            self.current_index = Some(if current == from {
                to
            } else if from < current && current <= to {
                current - 1
            } else if to <= current && current < from {
                current + 1
            } else {
                current
            });
        }
        true
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.finish();
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            items: self.items.clone(),
            current_index: self.current_index,
            is_playing_from_queue: self.is_playing_from_queue,
            loop_enabled: self.loop_enabled,
        }
    }
}
