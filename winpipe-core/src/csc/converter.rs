//! Stateful colorspace converter with optional rescaling.

use tracing::debug;

use crate::csc::scale::{PlaneGeometry, ScaleFilter, scale_plane};
use crate::csc::transform::TransformFn;
use crate::error::PipelineError;
use crate::pixel::{PixelBuffer, PixelFormat, Rect};

/// Converts buffers of one fixed size and format into another.
///
/// Dimensions and formats are fixed at [`init`](Self::init); a stream
/// that changes size builds a new converter. When source and destination
/// sizes differ, the pixels are first converted into a scratch buffer at
/// source size, then rescaled into the output. The scratch buffer is
/// allocated once and reused for every frame.
pub struct ColorspaceConverter {
    src_width: u32,
    src_height: u32,
    src_format: PixelFormat,
    dst_width: u32,
    dst_height: u32,
    dst_format: PixelFormat,
    speed: u8,
    filter: ScaleFilter,
    transform: TransformFn,
    scratch: Option<PixelBuffer>,
    frames: u64,
}

impl ColorspaceConverter {
    /// Validate the format pair against the dispatch table and size the
    /// scratch buffer.
    pub fn init(
        src_width: u32,
        src_height: u32,
        src_format: PixelFormat,
        dst_width: u32,
        dst_height: u32,
        dst_format: PixelFormat,
        speed: u8,
    ) -> Result<Self, PipelineError> {
        let transform = super::transform_for(src_format, dst_format).ok_or_else(|| {
            PipelineError::UnsupportedFormat(format!("no conversion {src_format} -> {dst_format}"))
        })?;
        if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
            return Err(PipelineError::InvalidBuffer(format!(
                "converter size {src_width}x{src_height} -> {dst_width}x{dst_height}"
            )));
        }

        let speed = speed.min(100);
        let scaling = src_width != dst_width || src_height != dst_height;
        let scratch =
            scaling.then(|| PixelBuffer::allocate(Rect::sized(src_width, src_height), dst_format));
        let filter = ScaleFilter::for_speed(speed);

        debug!(
            %src_format, %dst_format, src_width, src_height, dst_width, dst_height, ?filter,
            "colorspace converter ready"
        );

        Ok(Self {
            src_width,
            src_height,
            src_format,
            dst_width,
            dst_height,
            dst_format,
            speed,
            filter,
            transform,
            scratch,
            frames: 0,
        })
    }

    /// Convert `image` into a freshly allocated buffer in the destination
    /// format and size. The output keeps the input's window position.
    ///
    /// `image` may be larger than the configured source size; only its
    /// top-left source-sized region is read.
    pub fn convert(&mut self, image: &PixelBuffer) -> Result<PixelBuffer, PipelineError> {
        if image.format() != self.src_format {
            return Err(PipelineError::InvalidBuffer(format!(
                "expected {} input, got {}",
                self.src_format,
                image.format()
            )));
        }
        if image.width() < self.src_width || image.height() < self.src_height {
            return Err(PipelineError::InvalidBuffer(format!(
                "input {}x{} smaller than converter source {}x{}",
                image.width(),
                image.height(),
                self.src_width,
                self.src_height
            )));
        }

        let (from, to) = (self.src_format, self.dst_format);
        let transform = self.transform;
        let dst_rect = Rect::new(image.x(), image.y(), self.dst_width, self.dst_height);
        let mut out = PixelBuffer::allocate(dst_rect, to);

        match self.scratch.as_mut() {
            None => transform(image, &mut out).map_err(|e| failure(from, to, e))?,
            Some(scratch) => {
                transform(image, scratch).map_err(|e| failure(from, to, e))?;
                rescale(scratch, &mut out, self.filter).map_err(|e| failure(from, to, e))?;
            }
        }

        self.frames += 1;
        Ok(out)
    }

    pub fn src_format(&self) -> PixelFormat {
        self.src_format
    }

    pub fn dst_format(&self) -> PixelFormat {
        self.dst_format
    }

    pub fn src_size(&self) -> (u32, u32) {
        (self.src_width, self.src_height)
    }

    pub fn dst_size(&self) -> (u32, u32) {
        (self.dst_width, self.dst_height)
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }

    pub fn filter(&self) -> ScaleFilter {
        self.filter
    }

    /// Whether a rescale pass runs after the colour transform.
    pub fn is_scaling(&self) -> bool {
        self.scratch.is_some()
    }

    /// Frames converted so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

fn failure(from: PixelFormat, to: PixelFormat, e: PipelineError) -> PipelineError {
    PipelineError::ConversionFailed {
        from,
        to,
        reason: e.to_string(),
    }
}

fn rescale(src: &PixelBuffer, dst: &mut PixelBuffer, filter: ScaleFilter) -> Result<(), PipelineError> {
    let format = dst.format();
    let bpp = format.bytes_per_pixel();
    for p in 0..format.plane_count() {
        let (sw, sh) = format.plane_dimensions(p, src.width(), src.height());
        let (dw, dh) = format.plane_dimensions(p, dst.width(), dst.height());
        let src_geo = PlaneGeometry {
            width: sw as usize,
            height: sh as usize,
            stride: src.stride(p),
        };
        let dst_geo = PlaneGeometry {
            width: dw as usize,
            height: dh as usize,
            stride: dst.stride(p),
        };
        scale_plane(src.plane(p), src_geo, dst.plane_mut(p)?, dst_geo, bpp, filter);
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
