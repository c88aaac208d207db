//! Adaptive quality and speed from ack feedback.

use std::time::Duration;

use tracing::debug;

use crate::wire::WindowId;

/// Receives one call per successfully decoded `draw`.
pub trait AckObserver: Send {
    fn on_ack(&mut self, wid: WindowId, latency: Duration, decode_time: Duration, pixels: u64);
}

/// Acks between two adjustments.
const SETTLE_ACKS: u32 = 4;
const QUALITY_STEP_DOWN: u8 = 10;
const QUALITY_STEP_UP: u8 = 5;
const SPEED_STEP: u8 = 10;
const MIN_QUALITY: u8 = 10;

/// Trades quality for speed while latency is above target and gives it
/// back once latency recovers.
///
/// Latency above 1.5× target lowers quality and raises speed; latency
/// below half the target moves both back towards the configured values.
#[derive(Debug)]
pub struct AdaptiveTuner {
    target: Duration,
    max_quality: u8,
    min_speed: u8,
    quality: u8,
    speed: u8,
    smoothed_us: u64,
    since_change: u32,
    changed: bool,
}

impl AdaptiveTuner {
    /// `quality` and `speed` are the configured values; the tuner never
    /// goes above that quality or below that speed.
    pub fn new(target: Duration, quality: u8, speed: u8) -> Self {
        Self {
            target,
            max_quality: quality.min(100),
            min_speed: speed.min(100),
            quality: quality.min(100),
            speed: speed.min(100),
            smoothed_us: 0,
            since_change: 0,
            changed: false,
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }

    /// The new `(quality, speed)` if they changed since the last call.
    pub fn take_change(&mut self) -> Option<(u8, u8)> {
        std::mem::take(&mut self.changed).then_some((self.quality, self.speed))
    }

    fn adjust(&mut self, wid: WindowId) {
        let target_us = self.target.as_micros() as u64;
        let (quality, speed) = if self.smoothed_us > target_us * 3 / 2 {
            (
                self.quality.saturating_sub(QUALITY_STEP_DOWN).max(MIN_QUALITY.min(self.max_quality)),
                self.speed.saturating_add(SPEED_STEP).min(100),
            )
        } else if self.smoothed_us < target_us / 2 {
            (
                self.quality.saturating_add(QUALITY_STEP_UP).min(self.max_quality),
                self.speed.saturating_sub(SPEED_STEP).max(self.min_speed),
            )
        } else {
            return;
        };
        if (quality, speed) != (self.quality, self.speed) {
            debug!(
                wid,
                latency_ms = self.smoothed_us / 1000,
                quality,
                speed,
                "adaptive settings changed"
            );
            self.quality = quality;
            self.speed = speed;
            self.changed = true;
            self.since_change = 0;
        }
    }
}

impl AckObserver for AdaptiveTuner {
    fn on_ack(&mut self, wid: WindowId, latency: Duration, _decode_time: Duration, _pixels: u64) {
        let sample = latency.as_micros() as u64;
        self.smoothed_us = if self.smoothed_us == 0 {
            sample
        } else {
            self.smoothed_us * 3 / 4 + sample / 4
        };
        self.since_change += 1;
        if self.since_change >= SETTLE_ACKS {
            self.adjust(wid);
        }
    }
}
