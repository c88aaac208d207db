//! Server side of one window stream: capture, damage, encode, `draw`.
//!
//! Each window runs as its own tokio task. Capture and encoding block,
//! so the [`CaptureStage`] holding the source and the encoder moves into
//! `spawn_blocking` for every frame and comes back with the result. The
//! codec context therefore only ever has one user at a time.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::capture::CaptureSource;
use crate::codec::{EncodedPicture, Encoding, EncoderSettings, PictureEncoder, new_encoder};
use crate::damage::{DEFAULT_TILE_SIZE, DamageDetector};
use crate::error::PipelineError;
use crate::network::ConnectionSender;
use crate::pixel::Rect;
use crate::sequencer::{
    AckObserver, AdaptiveTuner, BatchDelay, BatchInputs, DEFAULT_MAX_UNACKED, WindowSequencer,
};
use crate::wire::{AckPacket, DrawPacket, Packet, WindowId};

/// Acks that may queue for one window before the router waits.
const ACK_QUEUE: usize = 64;

// ── StreamConfig ─────────────────────────────────────────────────

/// Runtime settings of one window stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub encoding: Encoding,
    pub settings: EncoderSettings,
    pub fps: u32,
    pub max_unacked: usize,
    /// Unacked draws older than this are given up on.
    pub ack_timeout: Duration,
    pub target_latency: Duration,
    /// Adjust quality, speed and the capture delay from ack latency.
    pub adaptive: bool,
    pub tile_size: u32,
    /// Stop after this many captures.
    pub max_frames: Option<u64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            encoding: Encoding::Yuvz,
            settings: EncoderSettings::default(),
            fps: 25,
            max_unacked: DEFAULT_MAX_UNACKED,
            ack_timeout: Duration::from_secs(5),
            target_latency: Duration::from_millis(50),
            adaptive: true,
            tile_size: DEFAULT_TILE_SIZE,
            max_frames: None,
        }
    }
}

impl StreamConfig {
    fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

/// Counters reported when a window stream ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowStats {
    pub frames: u64,
    pub draws: u64,
    pub bytes: u64,
    pub dropped: u64,
    pub failed_acks: u64,
}

// ── CaptureStage ─────────────────────────────────────────────────

/// One encoded region, still without a sequence number.
struct Region {
    rect: Rect,
    picture: EncodedPicture,
}

/// Everything a frame needs that is not async.
struct FrameOutput {
    resized: Option<(u32, u32)>,
    regions: Vec<Region>,
    dropped: bool,
}

struct CaptureStage {
    source: Box<dyn CaptureSource>,
    damage: DamageDetector,
    encoding: Encoding,
    settings: EncoderSettings,
    encoder: Option<Box<dyn PictureEncoder>>,
    /// Size of the last captured frame.
    size: (u32, u32),
    /// Size the client was last told about.
    announced: (u32, u32),
}

impl CaptureStage {
    /// Capture and encode one frame. Errors that only concern this frame
    /// drop it; the stream ends on fatal errors and when the source runs dry.
    fn produce(&mut self, wid: WindowId) -> Result<FrameOutput, PipelineError> {
        let outcome = self.capture_and_encode(wid);
        let resized = (self.size != self.announced).then(|| {
            self.announced = self.size;
            self.size
        });
        match outcome {
            Ok(regions) => Ok(FrameOutput {
                resized,
                regions,
                dropped: false,
            }),
            Err(e) if e.is_fatal() || matches!(e, PipelineError::SourceEnded) => Err(e),
            Err(e) => {
                warn!(wid, encoding = %self.encoding, error = %e, "frame dropped");
                // Whatever the client has for this area is now stale.
                self.request_refresh();
                Ok(FrameOutput {
                    resized,
                    regions: Vec::new(),
                    dropped: true,
                })
            }
        }
    }

    fn capture_and_encode(&mut self, wid: WindowId) -> Result<Vec<Region>, PipelineError> {
        self.source.refresh()?;
        let frame = self.source.grab_full()?;
        let size = (frame.width(), frame.height());

        if size != self.size {
            info!(wid, width = size.0, height = size.1, "window resized");
            self.size = size;
            self.encoder = None;
            self.damage.reset();
        }

        let damage = self.damage.detect(&frame);
        if damage.is_empty() {
            return Ok(Vec::new());
        }

        let encoder = match self.encoder.take() {
            Some(encoder) => encoder,
            None => new_encoder(self.encoding, &self.settings, size.0, size.1, frame.format())?,
        };
        let encoder = self.encoder.insert(encoder);

        let rects = if self.encoding.is_video() || damage.full_frame {
            vec![Rect::sized(size.0, size.1)]
        } else {
            damage.regions
        };

        let mut regions = Vec::with_capacity(rects.len());
        for rect in rects {
            let picture = if rect == Rect::sized(size.0, size.1) {
                encoder.encode(&frame)?
            } else {
                encoder.encode(&frame.crop(rect)?)?
            };
            regions.push(Region { rect, picture });
        }
        Ok(regions)
    }

    fn request_refresh(&mut self) {
        self.damage.reset();
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.request_keyframe();
        }
    }

    fn apply_settings(&mut self, quality: u8, speed: u8) {
        self.settings.quality = quality;
        self.settings.speed = speed;
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.set_quality(quality);
            encoder.set_speed(speed);
        }
    }
}

// ── WindowSource ─────────────────────────────────────────────────

/// Control handle of a running window stream.
pub struct WindowHandle {
    wid: WindowId,
    acks: mpsc::Sender<AckPacket>,
    cancel: CancellationToken,
    task: JoinHandle<Result<WindowStats, PipelineError>>,
}

impl WindowHandle {
    pub fn wid(&self) -> WindowId {
        self.wid
    }

    /// Hand an ack to the stream. Fails once the stream has ended.
    pub async fn deliver(&self, ack: AckPacket) -> Result<(), PipelineError> {
        Ok(self.acks.send(ack).await?)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the stream and wait for it to release its codec context.
    pub async fn destroy(self) -> Result<WindowStats, PipelineError> {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the stream to end by itself.
    pub async fn join(self) -> Result<WindowStats, PipelineError> {
        self.task.await?
    }
}

/// The per-window worker.
pub struct WindowSource {
    wid: WindowId,
    config: StreamConfig,
    /// `None` only while a frame is being produced.
    stage: Option<CaptureStage>,
    sequencer: WindowSequencer,
    tuner: Option<AdaptiveTuner>,
    batch: Option<BatchDelay>,
    out: ConnectionSender,
    stats: WindowStats,
}

impl WindowSource {
    pub fn new(
        wid: WindowId,
        source: Box<dyn CaptureSource>,
        config: StreamConfig,
        out: ConnectionSender,
    ) -> Self {
        let size = source.size();
        let tuner = config.adaptive.then(|| {
            AdaptiveTuner::new(
                config.target_latency,
                config.settings.quality,
                config.settings.speed,
            )
        });
        let batch = config
            .adaptive
            .then(|| BatchDelay::new(config.frame_interval()));
        Self {
            wid,
            stage: Some(CaptureStage {
                source,
                damage: DamageDetector::new(config.tile_size),
                encoding: config.encoding,
                settings: config.settings.clone(),
                encoder: None,
                size,
                announced: size,
            }),
            sequencer: WindowSequencer::new(wid, config.max_unacked),
            tuner,
            batch,
            out,
            stats: WindowStats::default(),
            config,
        }
    }

    /// Size the window will be announced with.
    pub fn size(&self) -> (u32, u32) {
        self.stage.as_ref().map_or((0, 0), |stage| stage.size)
    }

    /// Start the worker on the current runtime.
    pub fn spawn(self) -> WindowHandle {
        let (ack_tx, ack_rx) = mpsc::channel(ACK_QUEUE);
        let cancel = CancellationToken::new();
        let wid = self.wid;
        let task = tokio::spawn(self.run(ack_rx, cancel.clone()));
        WindowHandle {
            wid,
            acks: ack_tx,
            cancel,
            task,
        }
    }

    async fn run(
        mut self,
        mut acks: mpsc::Receiver<AckPacket>,
        cancel: CancellationToken,
    ) -> Result<WindowStats, PipelineError> {
        let wid = self.wid;
        info!(
            wid,
            encoding = %self.config.encoding,
            source = self.stage.as_ref().map_or("none", |stage| stage.source.name()),
            "window stream started"
        );
        let mut period = self.config.frame_interval();
        let mut ticker = capture_ticker(time::Instant::now(), period);

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                Some(ack) = acks.recv() => self.on_ack(&ack),
                _ = ticker.tick() => {
                    if self.config.max_frames.is_some_and(|max| self.stats.frames >= max) {
                        break Ok(());
                    }
                    match self.on_tick().await {
                        Ok(()) => {
                            let delay = self.batch.as_ref().map_or(period, BatchDelay::delay);
                            if delay.abs_diff(period) >= Duration::from_millis(1) {
                                debug!(wid, delay_ms = delay.as_millis() as u64, "capture delay changed");
                                period = delay;
                                ticker = capture_ticker(time::Instant::now() + period, period);
                            }
                        }
                        Err(PipelineError::SourceEnded) => {
                            info!(wid, "capture source ended");
                            break Ok(());
                        }
                        Err(e) => break Err(e),
                    }
                }
            }
        };

        self.sequencer.clear();
        drop(self.stage.take());
        info!(
            wid,
            frames = self.stats.frames,
            draws = self.stats.draws,
            bytes = self.stats.bytes,
            "window stream stopped"
        );
        result.map(|()| self.stats)
    }

    fn on_ack(&mut self, ack: &AckPacket) {
        let Some(resolved) = self.sequencer.acknowledge(ack) else {
            return;
        };
        let Some(decode_time) = resolved.decode_time else {
            self.stats.failed_acks += 1;
            if let Some(stage) = self.stage.as_mut() {
                stage.request_refresh();
            }
            return;
        };
        trace!(
            wid = self.wid,
            sequence = resolved.sequence,
            latency_ms = resolved.latency.as_millis() as u64,
            "draw acknowledged"
        );
        if let Some(tuner) = self.tuner.as_mut() {
            tuner.on_ack(self.wid, resolved.latency, decode_time, resolved.region.area());
            if let (Some((quality, speed)), Some(stage)) = (tuner.take_change(), self.stage.as_mut()) {
                stage.apply_settings(quality, speed);
            }
        }
    }

    async fn on_tick(&mut self) -> Result<(), PipelineError> {
        let Some(mut stage) = self.stage.take() else {
            return Err(PipelineError::InvalidState {
                operation: "capture",
                state: "capturing",
            });
        };
        let expired = self.sequencer.drain_expired(self.config.ack_timeout).len();
        if expired > 0 {
            stage.request_refresh();
        }
        if let Some(batch) = self.batch.as_mut() {
            batch.update(
                self.wid,
                &BatchInputs {
                    stats: self.sequencer.stats(),
                    target_latency: self.config.target_latency,
                    unacked: self.sequencer.unacked(),
                    max_unacked: self.config.max_unacked,
                    expired,
                },
            );
        }
        if !self.sequencer.can_send() {
            trace!(wid = self.wid, unacked = self.sequencer.unacked(), "waiting for acks");
            self.stage = Some(stage);
            return Ok(());
        }

        let wid = self.wid;
        let (stage, output) = tokio::task::spawn_blocking(move || {
            let output = stage.produce(wid);
            (stage, output)
        })
        .await?;
        self.stage = Some(stage);
        self.stats.frames += 1;
        let output = output?;

        if output.dropped {
            self.stats.dropped += 1;
        }
        if let Some((width, height)) = output.resized {
            self.out
                .send(Packet::WindowResized { wid, width, height })
                .await?;
        }
        for region in output.regions {
            self.send_region(region).await?;
        }
        Ok(())
    }

    async fn send_region(&mut self, region: Region) -> Result<(), PipelineError> {
        let Region { rect, picture } = region;
        let bytes = picture.data.len();
        let sequence = self.sequencer.record_sent(rect, bytes);
        debug!(
            wid = self.wid,
            sequence,
            encoding = %picture.encoding,
            bytes,
            keyframe = picture.is_keyframe,
            "draw"
        );
        self.stats.draws += 1;
        self.stats.bytes += bytes as u64;
        let draw = DrawPacket {
            wid: self.wid,
            x: rect.x,
            y: rect.y,
            width: picture.width,
            height: picture.height,
            encoding: picture.encoding.name().to_owned(),
            data: picture.data,
            sequence,
            rowstride: picture.rowstride,
            options: picture.options,
        };
        self.out.send(Packet::Draw(draw)).await?;
        Ok(())
    }
}

fn capture_ticker(start: time::Instant, period: Duration) -> time::Interval {
    let mut ticker = time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}
