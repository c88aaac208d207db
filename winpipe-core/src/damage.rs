//! Tile-level damage detection between consecutive captures.
//!
//! Divides the window into `tile_size × tile_size` tiles and compares
//! each tile byte-for-byte against the previous capture. Changed tiles
//! that touch along a tile row are merged into one region, so a moving
//! object usually costs one or two `draw`s rather than one per tile.

use std::cmp;

use tracing::trace;

use crate::pixel::{PixelBuffer, PixelFormat, Rect};

/// Default tile edge in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 64;

/// Share of changed tiles above which the whole window is sent instead.
const FULL_FRAME_RATIO: f64 = 0.80;

// ── Damage ───────────────────────────────────────────────────────

/// Result of one detection pass.
///
/// `full_frame` is set on the first capture, after a size or format
/// change, after [`DamageDetector::reset`], and when most tiles changed.
/// In that case `regions` holds the single full-window rectangle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Damage {
    pub width: u32,
    pub height: u32,
    pub regions: Vec<Rect>,
    pub full_frame: bool,
}

impl Damage {
    fn full(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            regions: vec![Rect::sized(width, height)],
            full_frame: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Fraction of the window area that changed (0.0 – 1.0).
    pub fn change_ratio(&self) -> f64 {
        if self.full_frame {
            return 1.0;
        }
        let total = self.width as f64 * self.height as f64;
        if total == 0.0 {
            return 0.0;
        }
        let changed: f64 = self.regions.iter().map(|r| r.area() as f64).sum();
        (changed / total).min(1.0)
    }
}

// ── DamageDetector ───────────────────────────────────────────────

struct Previous {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Vec<u8>,
}

/// Remembers the previous capture of one window.
pub struct DamageDetector {
    previous: Option<Previous>,
    tile_size: u32,
}

impl DamageDetector {
    /// A detector with `tile_size` pixel tiles; zero is treated as one.
    pub fn new(tile_size: u32) -> Self {
        Self {
            previous: None,
            tile_size: tile_size.max(1),
        }
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Forget the previous capture so the next one is a full frame.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Compare a packed capture against the previous one and remember it.
    pub fn detect(&mut self, current: &PixelBuffer) -> Damage {
        let (width, height, format) = (current.width(), current.height(), current.format());
        let damage = match &self.previous {
            Some(prev)
                if prev.width == width && prev.height == height && prev.format == format =>
            {
                self.detect_tiles(current, prev)
            }
            _ => Damage::full(width, height),
        };
        trace!(
            regions = damage.regions.len(),
            full_frame = damage.full_frame,
            "damage detected"
        );
        self.previous = Some(Previous {
            width,
            height,
            format,
            pixels: current.tight_bytes(),
        });
        damage
    }

    // ── Internal ─────────────────────────────────────────────────

    fn detect_tiles(&self, current: &PixelBuffer, previous: &Previous) -> Damage {
        let (w, h) = (current.width(), current.height());
        let ts = self.tile_size;
        let tiles_x = w.div_ceil(ts);
        let tiles_y = h.div_ceil(ts);

        let mut regions = Vec::new();
        let mut changed_tiles = 0u64;
        for ty in 0..tiles_y {
            let y0 = ty * ts;
            let y1 = cmp::min(y0 + ts, h);
            let mut run: Option<Rect> = None;
            for tx in 0..tiles_x {
                let x0 = tx * ts;
                let x1 = cmp::min(x0 + ts, w);
                if tile_differs(current, previous, x0, y0, x1, y1) {
                    changed_tiles += 1;
                    match run.as_mut() {
                        Some(r) => r.width += x1 - x0,
                        None => {
                            run = Some(Rect::new(x0 as i32, y0 as i32, x1 - x0, y1 - y0))
                        }
                    }
                } else if let Some(r) = run.take() {
                    regions.push(r);
                }
            }
            regions.extend(run);
        }

        let total_tiles = u64::from(tiles_x) * u64::from(tiles_y);
        if changed_tiles as f64 / total_tiles as f64 > FULL_FRAME_RATIO {
            return Damage::full(w, h);
        }
        Damage {
            width: w,
            height: h,
            regions,
            full_frame: false,
        }
    }
}

impl Default for DamageDetector {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SIZE)
    }
}

/// Row-by-row byte comparison for one tile.
fn tile_differs(
    current: &PixelBuffer,
    previous: &Previous,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
) -> bool {
    let bpp = current.format().bytes_per_pixel();
    let prev_stride = previous.width as usize * bpp;
    let left = x0 as usize * bpp;
    let right = x1 as usize * bpp;
    (y0..y1).any(|y| {
        let prev_row = y as usize * prev_stride;
        current.row(0, y)[left..right] != previous.pixels[prev_row + left..prev_row + right]
    })
}

// ── Tests ────────────────────────────────────────────────────────
