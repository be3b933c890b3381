//! Bounded replay buffer with epoch versioning.
//!
//! A [`RewindableBuffer`] keeps the last `capacity` messages pushed into a
//! stream, numbered with a strictly increasing sequence. Readers that fell
//! behind ask for everything after the [`Handle`] they last saw:
//!
//! - a handle from another epoch (or one already at the head) replays nothing
//! - a handle whose successor was evicted fails with `ReplayRangeExceeded`
//! - anything else replays the retained tail in sequence order
//!
//! The buffer never claims continuity it cannot prove: when a stream starts
//! without persisted state it gets a fresh epoch and old handles go stale.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BackplaneError, Result};
use crate::message::{Epoch, Handle};

/// One retained message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BufferEntry<T> {
    pub sequence: u64,
    pub sent_at: DateTime<Utc>,
    pub payload: T,
}

/// Persisted form of a buffer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BufferSnapshot<T> {
    pub epoch: Epoch,
    pub latest_sequence: u64,
    pub entries: Vec<BufferEntry<T>>,
}

/// Circular message buffer supporting replay from a handle.
#[derive(Debug)]
pub struct RewindableBuffer<T> {
    epoch: Epoch,
    latest_sequence: u64,
    entries: VecDeque<BufferEntry<T>>,
    capacity: usize,
    dirty: bool,
}

impl<T: Clone> RewindableBuffer<T> {
    /// Empty buffer with a freshly generated epoch.
    pub fn new(capacity: usize) -> Self {
        Self {
            epoch: Epoch::generate(),
            latest_sequence: 0,
            entries: VecDeque::with_capacity(capacity),
            capacity,
            dirty: false,
        }
    }

    /// Rebuilds a buffer from a snapshot.
    ///
    /// If the configured capacity shrank since the snapshot was taken, only the
    /// newest entries are kept. A snapshot without an epoch is treated as no
    /// snapshot at all.
    pub fn restore(capacity: usize, snapshot: BufferSnapshot<T>) -> Self {
        if snapshot.epoch.is_nil() {
            return Self::new(capacity);
        }

        let skip = snapshot.entries.len().saturating_sub(capacity);
        let entries: VecDeque<_> = snapshot
            .entries
            .into_iter()
            .skip(skip)
            .filter(|e| e.sequence <= snapshot.latest_sequence)
            .collect();

        Self {
            epoch: snapshot.epoch,
            latest_sequence: snapshot.latest_sequence,
            entries,
            capacity,
            dirty: false,
        }
    }

    /// Appends a message, evicting the oldest one when full.
    pub fn push_back(&mut self, payload: T) -> Handle {
        self.latest_sequence += 1;
        self.dirty = true;

        if self.capacity > 0 {
            if self.entries.len() == self.capacity {
                self.entries.pop_front();
            }
            self.entries.push_back(BufferEntry {
                sequence: self.latest_sequence,
                sent_at: Utc::now(),
                payload,
            });
        }

        Handle::new(self.latest_sequence, self.epoch)
    }

    /// Every retained message after `handle`, oldest first.
    pub fn messages_since(&self, handle: &Handle) -> Result<Vec<(T, Handle)>> {
        if self.capacity == 0 {
            return Ok(Vec::new());
        }
        if handle.epoch != self.epoch || handle.sequence >= self.latest_sequence {
            return Ok(Vec::new());
        }

        // Oldest retained may be exactly one past the requested sequence: the
        // caller has seen everything up to it, so nothing is missing.
        let oldest_retained = self.oldest_sequence().unwrap_or(self.latest_sequence + 1);
        if oldest_retained > handle.sequence + 1 {
            return Err(BackplaneError::ReplayRangeExceeded {
                requested: handle.sequence,
                oldest_retained,
            });
        }

        Ok(self
            .entries
            .iter()
            .skip_while(|e| e.sequence <= handle.sequence)
            .map(|e| (e.payload.clone(), Handle::new(e.sequence, self.epoch)))
            .collect())
    }

    /// Copies the buffer contents for persistence.
    pub fn snapshot(&self) -> BufferSnapshot<T> {
        BufferSnapshot {
            epoch: self.epoch,
            latest_sequence: self.latest_sequence,
            entries: self.entries.iter().cloned().collect(),
        }
    }
}

impl<T> RewindableBuffer<T> {
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn latest_sequence(&self) -> u64 {
        self.latest_sequence
    }

    /// Handle of the most recent push; sequence 0 before the first one.
    pub fn head(&self) -> Handle {
        Handle::new(self.latest_sequence, self.epoch)
    }

    pub fn oldest_sequence(&self) -> Option<u64> {
        self.entries.front().map(|e| e.sequence)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
