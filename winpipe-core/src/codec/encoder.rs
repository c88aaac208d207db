//! Stateful video encoder.
//!
//! Holds one `yuvz` encoding context per stream. Quality and speed are
//! tuned differently:
//!
//! - a quality change that moves to another chroma sampling (see
//!   [`profile_for_quality`]) destroys the context and builds a new one,
//!   so the next frame is a keyframe;
//! - a quality change within the same sampling only swaps the quantizer;
//! - a speed change only moves along the preset scale.

use std::sync::atomic::Ordering;

use tracing::{debug, info};

use crate::codec::profile::{
    EncodingProfile, Preset, preset_for_speed, profile_for_quality, quantizer_for_quality,
};
use crate::codec::registry::{ContextHandle, ContextKind};
use crate::codec::yuvz::{self, FrameHeader, Planes};
use crate::error::PipelineError;
use crate::pixel::{PixelBuffer, PixelFormat};

/// Default distance between forced keyframes.
pub const DEFAULT_KEYFRAME_INTERVAL: u32 = 250;

/// Per-context state. Replaced wholesale on a sampling change.
struct EncoderContext {
    handle: ContextHandle,
    profile: EncodingProfile,
    quantizer: u8,
    preset: &'static Preset,
    reference: Option<Planes>,
    frame_index: u32,
    since_keyframe: u32,
}

impl EncoderContext {
    fn new(quality: u8, speed: u8) -> Self {
        Self {
            handle: ContextHandle::register(ContextKind::Encoder),
            profile: profile_for_quality(quality),
            quantizer: quantizer_for_quality(quality),
            preset: preset_for_speed(speed),
            reference: None,
            frame_index: 0,
            since_keyframe: 0,
        }
    }
}

/// A video encoder for one window stream.
///
/// Not reentrant: every operation takes `&mut self`.
pub struct VideoEncoder {
    width: u32,
    height: u32,
    quality: u8,
    speed: u8,
    keyframe_interval: u32,
    force_keyframe: bool,
    rebuilds: u32,
    ctx: EncoderContext,
}

impl VideoEncoder {
    /// Create the encoding context.
    ///
    /// `src_format` must be the sampling [`profile_for_quality`] picks for
    /// `quality`; the colorspace stage is expected to produce exactly that.
    pub fn init_context(
        width: u32,
        height: u32,
        src_format: PixelFormat,
        quality: u8,
        speed: u8,
    ) -> Result<Self, PipelineError> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidBuffer(format!(
                "cannot encode {width}x{height}"
            )));
        }
        let quality = quality.min(100);
        let speed = speed.min(100);
        let profile = profile_for_quality(quality);
        if src_format != profile.sampling {
            return Err(PipelineError::UnsupportedFormat(format!(
                "quality {quality} encodes {} input, not {src_format}",
                profile.sampling
            )));
        }

        let ctx = EncoderContext::new(quality, speed);
        info!(
            width, height, quality, speed,
            profile = ctx.profile.profile.name(),
            preset = ctx.preset.name,
            "video encoder context created"
        );
        Ok(Self {
            width,
            height,
            quality,
            speed,
            keyframe_interval: DEFAULT_KEYFRAME_INTERVAL,
            force_keyframe: false,
            rebuilds: 0,
            ctx,
        })
    }

    /// Encode one frame, returning the bitstream and whether it is a keyframe.
    ///
    /// `quality` overrides the current quality first, which may rebuild the
    /// context. The override sticks even when the frame is then rejected.
    pub fn compress(
        &mut self,
        image: &PixelBuffer,
        quality: Option<u8>,
    ) -> Result<(Vec<u8>, bool), PipelineError> {
        if let Some(q) = quality {
            self.set_quality(q);
        }
        let sampling = self.ctx.profile.sampling;
        if image.format() != sampling {
            return Err(PipelineError::InvalidBuffer(format!(
                "encoder expects {sampling}, got {}",
                image.format()
            )));
        }
        if image.width() != self.width || image.height() != self.height {
            return Err(PipelineError::InvalidBuffer(format!(
                "encoder is {}x{}, frame is {}x{}",
                self.width,
                self.height,
                image.width(),
                image.height()
            )));
        }

        let keyframe = self.ctx.reference.is_none()
            || self.force_keyframe
            || self.ctx.since_keyframe >= self.keyframe_interval;
        let reference = if keyframe { None } else { self.ctx.reference.as_ref() };

        let planes = yuvz::tight_planes(image);
        let (symbols, recon) = yuvz::quantize(&planes, reference, self.ctx.quantizer);
        let payload = zstd::encode_all(symbols.as_slice(), self.ctx.preset.zstd_level)
            .map_err(|e| PipelineError::EncodeFailed(format!("zstd: {e}")))?;

        let header = FrameHeader {
            keyframe,
            sampling,
            quantizer: self.ctx.quantizer,
            width: self.width,
            height: self.height,
            frame_index: self.ctx.frame_index,
        };
        let mut out = Vec::with_capacity(yuvz::HEADER_LEN + payload.len());
        header.write(&mut out);
        out.extend_from_slice(&payload);

        self.ctx.reference = Some(recon);
        self.ctx.frame_index = self.ctx.frame_index.wrapping_add(1);
        self.ctx.since_keyframe = if keyframe { 1 } else { self.ctx.since_keyframe + 1 };
        self.ctx.handle.stats().frames.fetch_add(1, Ordering::Relaxed);
        self.force_keyframe = false;

        debug!(
            frame = header.frame_index,
            keyframe,
            bytes = out.len(),
            "frame encoded"
        );
        Ok((out, keyframe))
    }

    /// Change quality. Returns `true` when the context was rebuilt.
    pub fn set_quality(&mut self, quality: u8) -> bool {
        let quality = quality.min(100);
        if quality == self.quality {
            return false;
        }
        self.quality = quality;
        let profile = profile_for_quality(quality);
        if profile.sampling != self.ctx.profile.sampling {
            self.rebuild();
            return true;
        }
        self.ctx.quantizer = quantizer_for_quality(quality);
        false
    }

    /// Change speed in place. Never rebuilds the context.
    pub fn set_speed(&mut self, speed: u8) {
        let speed = speed.min(100);
        if speed != self.speed {
            self.speed = speed;
            self.ctx.preset = preset_for_speed(speed);
            debug!(speed, preset = self.ctx.preset.name, "encoder speed reconfigured");
        }
    }

    /// Apply both settings. Only a sampling change on the quality side
    /// rebuilds; the new speed is carried into the rebuilt context.
    pub fn set_quality_and_speed(&mut self, quality: u8, speed: u8) -> bool {
        self.set_speed(speed);
        self.set_quality(quality)
    }

    /// Make the next frame a keyframe.
    pub fn request_keyframe(&mut self) {
        self.force_keyframe = true;
    }

    pub fn set_keyframe_interval(&mut self, interval: u32) {
        self.keyframe_interval = interval.max(1);
    }

    /// The planar format the next [`compress`](Self::compress) call expects.
    pub fn input_format(&self) -> PixelFormat {
        self.ctx.profile.sampling
    }

    pub fn profile(&self) -> EncodingProfile {
        self.ctx.profile
    }

    pub fn preset_name(&self) -> &'static str {
        self.ctx.preset.name
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// How many times the context was torn down and rebuilt.
    pub fn rebuild_count(&self) -> u32 {
        self.rebuilds
    }

    /// Registry handle of the current context.
    pub fn context_id(&self) -> u64 {
        self.ctx.handle.id()
    }

    fn rebuild(&mut self) {
        let old = self.ctx.profile;
        self.ctx = EncoderContext::new(self.quality, self.speed);
        self.rebuilds += 1;
        info!(
            quality = self.quality,
            from = old.profile.name(),
            to = self.ctx.profile.profile.name(),
            "video encoder context rebuilt"
        );
    }
}

// ── Tests ────────────────────────────────────────────────────────
