//! Receiver-side resequencing of one window's `draw`s.

use std::collections::BTreeMap;

use tracing::warn;

/// Default number of out-of-order items held before skipping a gap.
pub const DEFAULT_MAX_BUFFERED: usize = 64;

/// What happened to a pushed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    /// Queued; it will come out of [`Resequencer::pop_ready`] in order.
    Accepted,
    /// Already buffered under this sequence number; dropped.
    Duplicate,
    /// Older than the next expected sequence; dropped.
    Stale,
}

/// Releases items strictly in sequence order.
#[derive(Debug)]
pub struct Resequencer<T> {
    next: u64,
    buffered: BTreeMap<u64, T>,
    max_buffered: usize,
}

impl<T> Resequencer<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_BUFFERED)
    }

    pub fn with_capacity(max_buffered: usize) -> Self {
        Self {
            next: 0,
            buffered: BTreeMap::new(),
            max_buffered: max_buffered.max(1),
        }
    }

    pub fn push(&mut self, sequence: u64, item: T) -> Push {
        if sequence < self.next {
            return Push::Stale;
        }
        if self.buffered.contains_key(&sequence) {
            return Push::Duplicate;
        }
        self.buffered.insert(sequence, item);
        Push::Accepted
    }

    /// The next item in order, if it has arrived.
    ///
    /// When more than `max_buffered` items wait behind a gap, the gap is
    /// given up on and the oldest buffered item is released instead.
    pub fn pop_ready(&mut self) -> Option<(u64, T)> {
        if let Some(item) = self.buffered.remove(&self.next) {
            let sequence = self.next;
            self.next += 1;
            return Some((sequence, item));
        }
        if self.buffered.len() > self.max_buffered {
            let (sequence, item) = self.buffered.pop_first()?;
            warn!(expected = self.next, skipped_to = sequence, "sequence gap skipped");
            self.next = sequence + 1;
            return Some((sequence, item));
        }
        None
    }

    /// The sequence number expected next.
    pub fn next_expected(&self) -> u64 {
        self.next
    }

    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }
}

impl<T> Default for Resequencer<T> {
    fn default() -> Self {
        Self::new()
    }
}
