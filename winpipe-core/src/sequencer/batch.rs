//! Batch delay: how long a window stream waits between two captures.
//!
//! The delay starts at the configured frame interval and is recomputed
//! before each capture from a set of weighted factors. Each factor asks
//! for the current delay to be scaled. The new delay blends those
//! requests with a time-weighted average of recent delays, so a single
//! slow ack does not make the stream stutter.
//!
//! ```text
//! latency   smoothed round trip / target latency
//! backlog   0.5 + unacked / max unacked
//! expired   1 + draws given up on since the last capture
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::sequencer::LatencyTracker;
use crate::wire::WindowId;

/// Delays remembered for the history average.
const HISTORY: usize = 64;
/// Weight of the history average relative to the factors.
const HISTORY_WEIGHT: f64 = 0.75;
/// Hard ceiling on the delay.
pub const MAX_BATCH_DELAY: Duration = Duration::from_secs(1);

/// One scaling request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Factor {
    pub name: &'static str,
    /// Multiplier for the current delay.
    pub factor: f64,
    pub weight: f64,
}

/// What the stream knows when it recomputes the delay.
#[derive(Debug, Clone, Copy)]
pub struct BatchInputs<'a> {
    pub stats: &'a LatencyTracker,
    pub target_latency: Duration,
    pub unacked: usize,
    pub max_unacked: usize,
    pub expired: usize,
}

#[derive(Debug)]
pub struct BatchDelay {
    min: Duration,
    max: Duration,
    delay: Duration,
    history: VecDeque<(Instant, Duration)>,
}

impl BatchDelay {
    /// `min` is both the starting delay and the floor.
    pub fn new(min: Duration) -> Self {
        let max = MAX_BATCH_DELAY.max(min);
        Self {
            min,
            max,
            delay: min,
            history: VecDeque::with_capacity(HISTORY),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn update(&mut self, wid: WindowId, inputs: &BatchInputs<'_>) -> Duration {
        self.update_at(Instant::now(), wid, inputs)
    }

    /// Recompute the delay from `inputs` as observed at `now`.
    pub fn update_at(&mut self, now: Instant, wid: WindowId, inputs: &BatchInputs<'_>) -> Duration {
        let factors = factors(inputs);
        let current = self.delay.as_secs_f64();
        let max = self.max.as_secs_f64();

        // Older delays fade faster when the stream is not batching much.
        let ratio = current / self.min.as_secs_f64().max(1e-6);
        let decay = (ratio.max(1.0).ln() / 5.0).max(1.0);
        let (mut total, mut weights) = (0.0, 0.0);
        for (when, delay) in &self.history {
            let age = now.saturating_duration_since(*when).as_secs_f64();
            let w = HISTORY_WEIGHT / (1.0 + (age / decay).powi(2));
            total += delay.as_secs_f64().min(max) * w;
            weights += w;
        }
        let history_weight = weights;

        let factor_weight: f64 = factors.iter().map(|f| f.weight).sum();
        if factor_weight > 0.0 {
            for f in &factors {
                let wanted = (current * f.factor).clamp(0.0, max);
                let w = history_weight.max(1.0) * f.weight / factor_weight;
                total += wanted * w;
                weights += w;
            }
        }
        if weights > 0.0 {
            let secs = total / weights;
            self.delay = if secs <= self.min.as_secs_f64() {
                self.min
            } else {
                Duration::from_secs_f64(secs.min(max))
            };
        }

        if self.history.len() == HISTORY {
            self.history.pop_front();
        }
        self.history.push_back((now, self.delay));
        trace!(wid, delay_ms = self.delay.as_millis() as u64, ?factors, "batch delay");
        self.delay
    }
}

fn factors(inputs: &BatchInputs<'_>) -> Vec<Factor> {
    let mut factors = Vec::with_capacity(3);
    let target = inputs.target_latency.as_secs_f64();
    if inputs.stats.acks() > 0 && target > 0.0 {
        factors.push(Factor {
            name: "latency",
            factor: (inputs.stats.latency().as_secs_f64() / target).clamp(0.25, 4.0),
            weight: 1.0,
        });
    }
    let max_unacked = inputs.max_unacked.max(1) as f64;
    factors.push(Factor {
        name: "backlog",
        factor: 0.5 + inputs.unacked as f64 / max_unacked,
        weight: if inputs.unacked > 0 { 1.0 } else { 0.5 },
    });
    if inputs.expired > 0 {
        factors.push(Factor {
            name: "expired",
            factor: 1.0 + inputs.expired as f64,
            weight: 1.0,
        });
    }
    factors
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(40);

    fn tracker(rtt_ms: u64, acks: usize) -> LatencyTracker {
        let mut stats = LatencyTracker::new();
        for _ in 0..acks {
            stats.record(Duration::from_millis(rtt_ms), Duration::from_millis(1), 1000);
        }
        stats
    }

    fn inputs(stats: &LatencyTracker, unacked: usize, expired: usize) -> BatchInputs<'_> {
        BatchInputs {
            stats,
            target_latency: Duration::from_millis(50),
            unacked,
            max_unacked: 4,
            expired,
        }
    }

    /// Run `rounds` updates 10 ms apart.
    fn settle(batch: &mut BatchDelay, inputs: &BatchInputs<'_>, rounds: u32) -> Duration {
        let start = Instant::now();
        let mut delay = batch.delay();
        for i in 0..rounds {
            delay = batch.update_at(start + Duration::from_millis(10 * u64::from(i)), 1, inputs);
        }
        delay
    }

    #[test]
    fn fast_client_stays_at_frame_interval() {
        let stats = tracker(5, 10);
        let mut batch = BatchDelay::new(FRAME);
        assert_eq!(settle(&mut batch, &inputs(&stats, 0, 0), 20), FRAME);
    }

    #[test]
    fn slow_acks_and_backlog_stretch_the_delay() {
        let stats = tracker(400, 10);
        let mut batch = BatchDelay::new(FRAME);
        let delay = settle(&mut batch, &inputs(&stats, 4, 0), 30);
        assert!(delay > FRAME * 2, "{delay:?}");
        assert!(delay <= MAX_BATCH_DELAY);
    }

    #[test]
    fn expired_draws_push_harder_than_latency_alone() {
        let stats = tracker(100, 10);
        let mut calm = BatchDelay::new(FRAME);
        let mut expired = BatchDelay::new(FRAME);
        let calm = settle(&mut calm, &inputs(&stats, 1, 0), 10);
        let expired = settle(&mut expired, &inputs(&stats, 1, 3), 10);
        assert!(expired > calm, "{expired:?} vs {calm:?}");
    }

    #[test]
    fn delay_recovers_once_the_client_catches_up() {
        let slow = tracker(400, 10);
        let mut batch = BatchDelay::new(FRAME);
        let peak = settle(&mut batch, &inputs(&slow, 4, 0), 30);

        let fast = tracker(5, 10);
        let start = Instant::now() + Duration::from_secs(5);
        let mut delay = peak;
        for i in 0..60 {
            delay = batch.update_at(start + Duration::from_millis(10 * i), 1, &inputs(&fast, 0, 0));
        }
        assert!(delay < peak, "{delay:?} vs {peak:?}");
    }

    #[test]
    fn no_acks_means_no_latency_factor() {
        let stats = LatencyTracker::new();
        let names: Vec<_> = factors(&inputs(&stats, 0, 0)).iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["backlog"]);
        let stats = tracker(10, 1);
        let names: Vec<_> = factors(&inputs(&stats, 2, 1)).iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["latency", "backlog", "expired"]);
    }
}
