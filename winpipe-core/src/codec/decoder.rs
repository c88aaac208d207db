//! Stateful video decoder with a dual-release frame pool.
//!
//! Every decoded frame is shared between the application, which paints
//! it, and the decoder, which keeps the most recent one as the prediction
//! reference for the next delta frame. The plane memory is freed only
//! once both have let go.

use std::fmt;
use std::io::{self, Read};
use std::sync::atomic::Ordering;

use tracing::{debug, info, warn};

use crate::codec::registry::{CONTEXTS, ContextHandle, ContextKind};
use crate::codec::yuvz::{self, FrameHeader};
use crate::error::PipelineError;
use crate::pixel::{PixelBuffer, PixelFormat, Rect, SharedPlanes, dual_release_with};

/// Outstanding frames above which a leak is reported.
pub const MAX_LIVE_FRAMES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Uninitialized,
    Ready,
    Decoding,
    Closed,
}

impl DecoderState {
    pub const fn name(self) -> &'static str {
        match self {
            DecoderState::Uninitialized => "uninitialized",
            DecoderState::Ready => "ready",
            DecoderState::Decoding => "decoding",
            DecoderState::Closed => "closed",
        }
    }
}

impl fmt::Display for DecoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Prediction reference: the decoder's half of the last frame handed out.
struct Reference {
    planes: SharedPlanes,
    sampling: PixelFormat,
    frame_index: u32,
}

pub struct VideoDecoder {
    state: DecoderState,
    width: u32,
    height: u32,
    requested: PixelFormat,
    actual: PixelFormat,
    reference: Option<Reference>,
    ctx: Option<ContextHandle>,
    decoded: u64,
}

impl VideoDecoder {
    /// A decoder with no context yet. Every call except
    /// [`init_context`](Self::init_context) fails until it is initialised.
    pub fn new() -> Self {
        Self {
            state: DecoderState::Uninitialized,
            width: 0,
            height: 0,
            requested: PixelFormat::Yuv420p,
            actual: PixelFormat::Yuv420p,
            reference: None,
            ctx: None,
            decoded: 0,
        }
    }

    /// Set up a context for `width × height` frames.
    ///
    /// `colorspace` is the sampling the caller expects; the bitstream may
    /// say otherwise, see [`actual_colorspace`](Self::actual_colorspace).
    /// Re-initialising an open decoder discards its reference frame.
    pub fn init_context(
        &mut self,
        width: u32,
        height: u32,
        colorspace: PixelFormat,
    ) -> Result<(), PipelineError> {
        match self.state {
            DecoderState::Closed | DecoderState::Decoding => {
                return Err(PipelineError::InvalidState {
                    operation: "init_context",
                    state: self.state.name(),
                });
            }
            DecoderState::Uninitialized | DecoderState::Ready => {}
        }
        if !colorspace.is_planar() {
            return Err(PipelineError::UnsupportedFormat(format!(
                "video decoder outputs planar YUV, not {colorspace}"
            )));
        }
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidBuffer(format!(
                "cannot decode {width}x{height}"
            )));
        }

        self.reference = None;
        self.width = width;
        self.height = height;
        self.requested = colorspace;
        self.actual = colorspace;
        if self.ctx.is_none() {
            self.ctx = Some(ContextHandle::register(ContextKind::Decoder));
        }
        self.state = DecoderState::Ready;
        info!(width, height, %colorspace, "video decoder context created");
        Ok(())
    }

    /// Decode one frame.
    ///
    /// A failure affects this frame only: the decoder stays ready and the
    /// previous reference is kept, so a corrupt delta does not poison the
    /// next keyframe.
    pub fn decompress(&mut self, data: &[u8]) -> Result<PixelBuffer, PipelineError> {
        if self.state != DecoderState::Ready {
            return Err(PipelineError::InvalidState {
                operation: "decompress",
                state: self.state.name(),
            });
        }
        self.state = DecoderState::Decoding;
        let result = self.decode_frame(data);
        self.state = DecoderState::Ready;
        result
    }

    fn decode_frame(&mut self, data: &[u8]) -> Result<PixelBuffer, PipelineError> {
        let (header, payload) = FrameHeader::parse(data)?;
        if header.width != self.width || header.height != self.height {
            return Err(PipelineError::DecodeFailed(format!(
                "frame is {}x{}, context is {}x{}",
                header.width, header.height, self.width, self.height
            )));
        }

        let reference = if header.keyframe {
            None
        } else {
            let reference = self.reference.as_ref().ok_or_else(|| {
                PipelineError::DecodeFailed("delta frame without a reference".into())
            })?;
            if header.frame_index != reference.frame_index.wrapping_add(1) {
                return Err(PipelineError::DecodeFailed(format!(
                    "delta frame {} does not follow reference {}",
                    header.frame_index, reference.frame_index
                )));
            }
            if header.sampling != reference.sampling {
                return Err(PipelineError::DecodeFailed(format!(
                    "delta frame is {}, reference is {}",
                    header.sampling, reference.sampling
                )));
            }
            Some(reference.planes.get())
        };

        let sizes = header.plane_sizes();
        let expected: usize = sizes.iter().sum();
        let symbols = inflate_symbols(payload, expected)?;
        if symbols.len() != expected {
            return Err(PipelineError::DecodeFailed(format!(
                "payload holds {} samples, frame needs {expected}",
                symbols.len()
            )));
        }
        let planes = yuvz::reconstruct(&symbols, sizes, reference, header.quantizer);

        if header.sampling != self.actual {
            debug!(
                requested = %self.requested,
                actual = %header.sampling,
                "bitstream sampling differs from context"
            );
            self.actual = header.sampling;
        }

        let (codec_side, app_side) = self.pool(planes);
        let strides = (0..3)
            .map(|p| header.sampling.min_stride(p, header.width))
            .collect();
        let frame = PixelBuffer::shared(
            Rect::sized(header.width, header.height),
            header.sampling,
            strides,
            app_side,
        )?;

        // The previous reference's codec side is released here.
        self.reference = Some(Reference {
            planes: codec_side,
            sampling: header.sampling,
            frame_index: header.frame_index,
        });
        self.decoded += 1;
        Ok(frame)
    }

    /// Put `planes` into the frame pool, accounting for them against this
    /// context.
    fn pool(&self, planes: yuvz::Planes) -> (SharedPlanes, SharedPlanes) {
        let Some(ctx) = self.ctx.as_ref() else {
            return crate::pixel::dual_release(planes);
        };
        let handle = ctx.id();
        let stats = ctx.stats();
        stats.frames.fetch_add(1, Ordering::Relaxed);
        let live = stats.live_frames.fetch_add(1, Ordering::AcqRel) + 1;
        if live > MAX_LIVE_FRAMES {
            warn!(
                handle,
                live, "decoder has more than {MAX_LIVE_FRAMES} frames outstanding, possible leak"
            );
        }
        dual_release_with(planes, move |_| {
            if let Some(stats) = CONTEXTS.get(handle) {
                stats.live_frames.fetch_sub(1, Ordering::AcqRel);
            }
        })
    }

    /// Close the decoder. Outstanding frames stay valid until the
    /// application releases them.
    pub fn close(&mut self) {
        if self.state == DecoderState::Closed {
            return;
        }
        self.reference = None;
        self.ctx = None;
        self.state = DecoderState::Closed;
        debug!(decoded = self.decoded, "video decoder closed");
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// The sampling of the most recent frame. Re-check after every decode.
    pub fn actual_colorspace(&self) -> PixelFormat {
        self.actual
    }

    pub fn requested_colorspace(&self) -> PixelFormat {
        self.requested
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Frames handed out and not yet released by both sides.
    pub fn live_frames(&self) -> usize {
        self.ctx
            .as_ref()
            .map_or(0, |ctx| ctx.stats().live_frames.load(Ordering::Acquire))
    }

    pub fn frames_decoded(&self) -> u64 {
        self.decoded
    }
}

impl Default for VideoDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        self.close();
    }
}

/// Inflate a zstd payload, reading at most one byte past `expected` so an
/// oversized stream is refused without being expanded.
fn inflate_symbols(payload: &[u8], expected: usize) -> Result<Vec<u8>, PipelineError> {
    let failed = |e: io::Error| PipelineError::DecodeFailed(format!("yuvz payload: {e}"));
    let mut symbols = Vec::with_capacity(expected);
    zstd::stream::read::Decoder::new(payload)
        .map_err(failed)?
        .take(expected as u64 + 1)
        .read_to_end(&mut symbols)
        .map_err(failed)?;
    if symbols.len() > expected {
        return Err(PipelineError::DecodeFailed(format!(
            "yuvz payload inflates beyond the {expected} samples of the frame"
        )));
    }
    Ok(symbols)
}

// ── Tests ────────────────────────────────────────────────────────
