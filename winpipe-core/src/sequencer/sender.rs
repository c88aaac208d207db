//! Sender-side sequencing: numbering `draw`s and tracking their acks.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::pixel::Rect;
use crate::sequencer::latency::LatencyTracker;
use crate::wire::{AckPacket, WindowId};

/// Default bound on unacknowledged draws per window.
pub const DEFAULT_MAX_UNACKED: usize = 4;

// ── PendingDraw ──────────────────────────────────────────────────

/// A `draw` that has been sent and not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDraw {
    pub sequence: u64,
    pub region: Rect,
    pub sent_at: Instant,
    pub bytes: usize,
}

impl PendingDraw {
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.sent_at.elapsed() > timeout
    }
}

/// What an ack resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct Acknowledged {
    pub sequence: u64,
    pub region: Rect,
    pub bytes: usize,
    /// Send to ack.
    pub latency: Duration,
    /// Client decode time, `None` when the client failed to decode.
    pub decode_time: Option<Duration>,
}

// ── WindowSequencer ──────────────────────────────────────────────

/// Sequence numbers and in-flight draws of one window.
#[derive(Debug)]
pub struct WindowSequencer {
    wid: WindowId,
    next_sequence: u64,
    pending: BTreeMap<u64, PendingDraw>,
    max_unacked: usize,
    stats: LatencyTracker,
    failures: u64,
}

impl WindowSequencer {
    pub fn new(wid: WindowId, max_unacked: usize) -> Self {
        Self {
            wid,
            next_sequence: 0,
            pending: BTreeMap::new(),
            max_unacked: max_unacked.max(1),
            stats: LatencyTracker::new(),
            failures: 0,
        }
    }

    pub fn wid(&self) -> WindowId {
        self.wid
    }

    /// Whether another draw may go out without exceeding `max_unacked`.
    pub fn can_send(&self) -> bool {
        self.pending.len() < self.max_unacked
    }

    /// The sequence number the next [`record_sent`](Self::record_sent) will use.
    pub fn peek_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Assign the next sequence number to a draw about to be sent.
    pub fn record_sent(&mut self, region: Rect, bytes: usize) -> u64 {
        self.record_sent_at(Instant::now(), region, bytes)
    }

    pub fn record_sent_at(&mut self, sent_at: Instant, region: Rect, bytes: usize) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.pending.insert(
            sequence,
            PendingDraw {
                sequence,
                region,
                sent_at,
                bytes,
            },
        );
        sequence
    }

    /// Resolve an ack. Unknown sequences are ignored and return `None`.
    pub fn acknowledge(&mut self, ack: &AckPacket) -> Option<Acknowledged> {
        let Some(entry) = self.pending.remove(&ack.sequence) else {
            debug!(wid = self.wid, sequence = ack.sequence, "ack for unknown sequence ignored");
            return None;
        };
        let latency = entry.sent_at.elapsed();
        let decode_time = u64::try_from(ack.decode_time).ok().map(Duration::from_millis);
        match decode_time {
            Some(decode) => self.stats.record(latency, decode, entry.bytes as u64),
            None => {
                self.failures += 1;
                warn!(
                    wid = self.wid,
                    sequence = ack.sequence,
                    message = ack.message.as_deref().unwrap_or(""),
                    "client failed to decode draw"
                );
            }
        }
        Some(Acknowledged {
            sequence: entry.sequence,
            region: entry.region,
            bytes: entry.bytes,
            latency,
            decode_time,
        })
    }

    /// Remove draws that have waited longer than `timeout` for an ack.
    pub fn drain_expired(&mut self, timeout: Duration) -> Vec<PendingDraw> {
        let expired: Vec<u64> = self
            .pending
            .values()
            .filter(|p| p.is_expired(timeout))
            .map(|p| p.sequence)
            .collect();
        let drained: Vec<PendingDraw> = expired
            .into_iter()
            .filter_map(|seq| self.pending.remove(&seq))
            .collect();
        if !drained.is_empty() {
            warn!(wid = self.wid, count = drained.len(), "draws expired without ack");
        }
        drained
    }

    /// Forget every in-flight draw, e.g. when the window goes away.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn unacked(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingDraw> {
        self.pending.values()
    }

    pub fn stats(&self) -> &LatencyTracker {
        &self.stats
    }

    /// Acks that reported a decode failure.
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

// ── Tests ────────────────────────────────────────────────────────
