//! Round-trip latency and throughput statistics for one window stream.
//!
//! Fed from `damage-sequence` acks: every ack closes one `draw`, giving
//! its round-trip time, the client's decode time and the bytes that were
//! in flight.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rolling-window statistics over acknowledged draws.
#[derive(Debug)]
pub struct LatencyTracker {
    /// `(acked at, bytes)` inside the window.
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    total_bytes: u64,
    /// Smoothed round trip in microseconds, 0 until the first ack.
    smoothed_rtt_us: u64,
    smoothed_decode_us: u64,
    acks: u64,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(64),
            window,
            total_bytes: 0,
            smoothed_rtt_us: 0,
            smoothed_decode_us: 0,
            acks: 0,
        }
    }

    /// Record one ack observed now.
    pub fn record(&mut self, rtt: Duration, decode: Duration, bytes: u64) {
        self.record_at(Instant::now(), rtt, decode, bytes);
    }

    pub fn record_at(&mut self, when: Instant, rtt: Duration, decode: Duration, bytes: u64) {
        self.smoothed_rtt_us = ewma(self.smoothed_rtt_us, rtt.as_micros() as u64, self.acks);
        self.smoothed_decode_us =
            ewma(self.smoothed_decode_us, decode.as_micros() as u64, self.acks);
        self.acks += 1;

        self.samples.push_back((when, bytes));
        self.total_bytes += bytes;
        while let Some(&(at, b)) = self.samples.front() {
            if when.duration_since(at) <= self.window {
                break;
            }
            self.samples.pop_front();
            self.total_bytes = self.total_bytes.saturating_sub(b);
        }
    }

    /// Smoothed round trip, zero before the first ack.
    pub fn latency(&self) -> Duration {
        Duration::from_micros(self.smoothed_rtt_us)
    }

    pub fn decode_time(&self) -> Duration {
        Duration::from_micros(self.smoothed_decode_us)
    }

    /// Acknowledged bytes per second over the window.
    pub fn throughput_bps(&self) -> u64 {
        let (Some((first, _)), Some((last, _))) = (self.samples.front(), self.samples.back()) else {
            return 0;
        };
        let span = last.duration_since(*first).max(Duration::from_millis(1));
        (self.total_bytes as f64 / span.as_secs_f64()) as u64
    }

    pub fn acks(&self) -> u64 {
        self.acks
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// srtt = 7/8 srtt + 1/8 sample; the first sample seeds the average.
fn ewma(current: u64, sample: u64, seen: u64) -> u64 {
    if seen == 0 {
        sample
    } else {
        current * 7 / 8 + sample / 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_ack_seeds_the_average() {
        let mut t = LatencyTracker::new();
        assert_eq!(t.latency(), Duration::ZERO);
        t.record(Duration::from_millis(20), Duration::from_millis(4), 100);
        assert_eq!(t.latency(), Duration::from_millis(20));
        assert_eq!(t.decode_time(), Duration::from_millis(4));
        t.record(Duration::from_millis(4), Duration::ZERO, 100);
        assert_eq!(t.latency(), Duration::from_millis(18));
        assert_eq!(t.acks(), 2);
    }

    #[test]
    fn throughput_over_window() {
        let mut t = LatencyTracker::with_window(Duration::from_secs(5));
        let t0 = Instant::now();
        t.record_at(t0, Duration::ZERO, Duration::ZERO, 500_000);
        t.record_at(t0 + Duration::from_secs(1), Duration::ZERO, Duration::ZERO, 500_000);
        let bps = t.throughput_bps();
        assert!((990_000..=1_010_000).contains(&bps), "bps = {bps}");

        t.record_at(t0 + Duration::from_secs(10), Duration::ZERO, Duration::ZERO, 10);
        assert!(t.throughput_bps() >= 10);
        assert!(t.throughput_bps() < 20_000);
    }
}
