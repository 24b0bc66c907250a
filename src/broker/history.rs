//! Bounded replay history.
//!
//! Keeps the most recent records in id order so that a reconnecting client can
//! ask for "everything after watermark X". Lives only in process memory.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::broker::message::Message;

/// Insertion-ordered buffer of the last `capacity` records.
///
/// A capacity of `0` disables history: pushes are discarded and every lookup
/// comes back empty.
#[derive(Debug, Default)]
pub struct History {
    capacity: usize,
    records: VecDeque<Arc<Message>>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Appends a record, evicting the oldest ones once over capacity.
    ///
    /// Callers must push in ascending id order.
    pub fn push(&mut self, message: Arc<Message>) {
        if self.capacity == 0 {
            return;
        }
        debug_assert!(self.newest_id().is_none_or(|newest| newest < message.id));

        self.records.push_back(message);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    /// Every retained record with an id strictly greater than `watermark`,
    /// oldest first.
    pub fn since(&self, watermark: u64) -> Vec<Arc<Message>> {
        let start = self.records.partition_point(|m| m.id <= watermark);
        self.records.range(start..).cloned().collect()
    }

    /// Returns true if the record with this id is still retained.
    ///
    /// Every published id lands here, so retained ids are contiguous.
    pub fn contains(&self, id: u64) -> bool {
        match (self.oldest_id(), self.newest_id()) {
            (Some(oldest), Some(newest)) => (oldest..=newest).contains(&id),
            _ => false,
        }
    }

    pub fn oldest_id(&self) -> Option<u64> {
        self.records.front().map(|m| m.id)
    }

    pub fn newest_id(&self) -> Option<u64> {
        self.records.back().map(|m| m.id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ids currently retained, oldest first.
    pub fn ids(&self) -> Vec<u64> {
        self.records.iter().map(|m| m.id).collect()
    }
}
