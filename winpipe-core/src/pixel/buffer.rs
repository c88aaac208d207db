//! Pixel buffers: plane memory plus geometry.
//!
//! A [`PixelBuffer`] has exactly one owner and moves by value between
//! pipeline stages. Buffers produced by a video decoder are the only
//! shared ones: their memory is also held by the decoder's frame pool
//! through a [`ReleaseHandle`], and is freed once both sides let go.

use std::fmt;
use std::time::Instant;

use crate::error::PipelineError;
use crate::pixel::format::PixelFormat;
use crate::pixel::release::ReleaseHandle;

// ── Rect ─────────────────────────────────────────────────────────

/// A rectangle in window coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A rectangle at the origin.
    pub const fn sized(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Intersection with `other`, or `None` when they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x as i64 + self.width as i64).min(other.x as i64 + other.width as i64);
        let y2 = (self.y as i64 + self.height as i64).min(other.y as i64 + other.height as i64);
        if x2 <= x1 as i64 || y2 <= y1 as i64 {
            return None;
        }
        Some(Rect::new(x1, y1, (x2 - x1 as i64) as u32, (y2 - y1 as i64) as u32))
    }
}

// ── Storage ──────────────────────────────────────────────────────

/// Plane memory shared with a decoder frame pool.
pub type SharedPlanes = ReleaseHandle<Vec<Vec<u8>>>;

enum Storage {
    Owned(Vec<Vec<u8>>),
    Shared(SharedPlanes),
}

impl Storage {
    fn planes(&self) -> &[Vec<u8>] {
        match self {
            Storage::Owned(planes) => planes,
            Storage::Shared(handle) => handle.get(),
        }
    }
}

// ── PixelBuffer ──────────────────────────────────────────────────

/// Raw or planar pixel memory with geometry metadata.
///
/// Invariants, checked at construction:
/// - the number of planes matches the format;
/// - each stride holds at least one row of that plane;
/// - each plane holds at least `plane_height × stride` bytes.
pub struct PixelBuffer {
    rect: Rect,
    format: PixelFormat,
    strides: Vec<usize>,
    storage: Storage,
    timestamp: Instant,
}

impl PixelBuffer {
    /// Wrap existing plane memory.
    pub fn new(
        rect: Rect,
        format: PixelFormat,
        planes: Vec<Vec<u8>>,
        strides: Vec<usize>,
    ) -> Result<Self, PipelineError> {
        validate(&rect, format, &planes, &strides)?;
        Ok(Self {
            rect,
            format,
            strides,
            storage: Storage::Owned(planes),
            timestamp: Instant::now(),
        })
    }

    /// Wrap a single packed plane.
    pub fn packed(
        rect: Rect,
        format: PixelFormat,
        data: Vec<u8>,
        stride: usize,
    ) -> Result<Self, PipelineError> {
        Self::new(rect, format, vec![data], vec![stride])
    }

    /// Allocate zeroed planes with 4-byte aligned strides.
    pub fn allocate(rect: Rect, format: PixelFormat) -> Self {
        let strides = format.aligned_strides(rect.width);
        let planes = strides
            .iter()
            .enumerate()
            .map(|(p, &stride)| {
                let (_, h) = format.plane_dimensions(p, rect.width, rect.height);
                vec![0u8; stride * h as usize]
            })
            .collect();
        Self {
            rect,
            format,
            strides,
            storage: Storage::Owned(planes),
            timestamp: Instant::now(),
        }
    }

    /// Wrap plane memory that a decoder pool also holds.
    pub(crate) fn shared(
        rect: Rect,
        format: PixelFormat,
        strides: Vec<usize>,
        handle: SharedPlanes,
    ) -> Result<Self, PipelineError> {
        validate(&rect, format, handle.get(), &strides)?;
        Ok(Self {
            rect,
            format,
            strides,
            storage: Storage::Shared(handle),
            timestamp: Instant::now(),
        })
    }

    // ── Geometry ─────────────────────────────────────────────────

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn x(&self) -> i32 {
        self.rect.x
    }

    pub fn y(&self) -> i32 {
        self.rect.y
    }

    pub fn width(&self) -> u32 {
        self.rect.width
    }

    pub fn height(&self) -> u32 {
        self.rect.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// When the pixels were produced.
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Move the buffer to another window position without touching pixels.
    pub fn with_position(mut self, x: i32, y: i32) -> Self {
        self.rect.x = x;
        self.rect.y = y;
        self
    }

    // ── Planes ───────────────────────────────────────────────────

    pub fn plane_count(&self) -> usize {
        self.strides.len()
    }

    pub fn stride(&self, plane: usize) -> usize {
        self.strides[plane]
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn plane(&self, plane: usize) -> &[u8] {
        &self.storage.planes()[plane]
    }

    /// Mutable plane access. Shared decoder output is read-only.
    pub fn plane_mut(&mut self, plane: usize) -> Result<&mut [u8], PipelineError> {
        match &mut self.storage {
            Storage::Owned(planes) => Ok(&mut planes[plane]),
            Storage::Shared(_) => Err(PipelineError::InvalidBuffer(
                "decoder output is read-only".into(),
            )),
        }
    }

    /// All planes at once, for transforms that write Y, U and V together.
    pub fn planes_mut(&mut self) -> Result<&mut [Vec<u8>], PipelineError> {
        match &mut self.storage {
            Storage::Owned(planes) => Ok(planes),
            Storage::Shared(_) => Err(PipelineError::InvalidBuffer(
                "decoder output is read-only".into(),
            )),
        }
    }

    /// One row of `plane`, including any stride padding.
    pub fn row(&self, plane: usize, y: u32) -> &[u8] {
        let stride = self.strides[plane];
        let start = y as usize * stride;
        &self.plane(plane)[start..start + stride]
    }

    /// Whether the memory is also held by a decoder frame pool.
    pub fn is_shared(&self) -> bool {
        matches!(self.storage, Storage::Shared(_))
    }

    /// Single-plane pixels with stride padding removed.
    pub fn tight_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for p in 0..self.plane_count() {
            let (w, h) = self.format.plane_dimensions(p, self.rect.width, self.rect.height);
            let row_len = w as usize * self.format.bytes_per_pixel();
            out.reserve(row_len * h as usize);
            for y in 0..h {
                out.extend_from_slice(&self.row(p, y)[..row_len]);
            }
        }
        out
    }

    /// Copy out a sub-rectangle of a packed buffer. `region` is relative to
    /// this buffer's top-left corner and becomes the result's position.
    pub fn crop(&self, region: Rect) -> Result<PixelBuffer, PipelineError> {
        if self.format.is_planar() {
            return Err(PipelineError::UnsupportedFormat(format!(
                "cannot crop planar {}",
                self.format
            )));
        }
        let inside = Rect::sized(self.rect.width, self.rect.height).intersect(&region);
        if region.is_empty() || inside != Some(region) {
            return Err(PipelineError::InvalidBuffer(format!(
                "crop {region:?} outside {}x{}",
                self.rect.width, self.rect.height
            )));
        }
        let bpp = self.format.bytes_per_pixel();
        let left = region.x as usize * bpp;
        let row_len = region.width as usize * bpp;
        let mut out = PixelBuffer::allocate(region, self.format);
        let out_stride = out.stride(0);
        let dst = out.plane_mut(0)?;
        for row in 0..region.height as usize {
            let src = self.row(0, region.y as u32 + row as u32);
            dst[row * out_stride..row * out_stride + row_len]
                .copy_from_slice(&src[left..left + row_len]);
        }
        Ok(out)
    }

    /// Take the plane memory, copying it out of a shared pool if needed.
    pub fn into_planes(self) -> Vec<Vec<u8>> {
        match self.storage {
            Storage::Owned(planes) => planes,
            Storage::Shared(handle) => handle.get().clone(),
        }
    }

    /// Release the buffer now. Shared memory is returned to the decoder
    /// pool once the decoder has also let go of it.
    pub fn free(self) {
        drop(self);
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("rect", &self.rect)
            .field("format", &self.format)
            .field("strides", &self.strides)
            .field("shared", &self.is_shared())
            .finish()
    }
}

fn validate(
    rect: &Rect,
    format: PixelFormat,
    planes: &[Vec<u8>],
    strides: &[usize],
) -> Result<(), PipelineError> {
    if planes.len() != format.plane_count() || strides.len() != format.plane_count() {
        return Err(PipelineError::InvalidBuffer(format!(
            "{format} needs {} planes, got {} planes and {} strides",
            format.plane_count(),
            planes.len(),
            strides.len()
        )));
    }
    for (p, (plane, &stride)) in planes.iter().zip(strides).enumerate() {
        let min_stride = format.min_stride(p, rect.width);
        if stride < min_stride {
            return Err(PipelineError::InvalidBuffer(format!(
                "plane {p} stride {stride} below minimum {min_stride}"
            )));
        }
        let (_, h) = format.plane_dimensions(p, rect.width, rect.height);
        let needed = stride * h as usize;
        if plane.len() < needed {
            return Err(PipelineError::InvalidBuffer(format!(
                "plane {p} holds {} bytes, needs {needed}",
                plane.len()
            )));
        }
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
