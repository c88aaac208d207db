//! Plane rescaling filters.

/// Resampling filter, chosen from the speed setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleFilter {
    /// Point sampling. Fastest.
    Nearest,
    /// Linear interpolation between the four nearest samples.
    Bilinear,
    /// Area average over the source footprint. Best for downscaling.
    Box,
}

impl ScaleFilter {
    /// speed > 66 → nearest, speed > 33 → bilinear, otherwise box.
    pub const fn for_speed(speed: u8) -> Self {
        if speed > 66 {
            ScaleFilter::Nearest
        } else if speed > 33 {
            ScaleFilter::Bilinear
        } else {
            ScaleFilter::Box
        }
    }
}

/// Source or destination plane geometry for [`scale_plane`].
#[derive(Debug, Clone, Copy)]
pub struct PlaneGeometry {
    pub width: usize,
    pub height: usize,
    pub stride: usize,
}

/// Rescale one plane of `bpp`-byte samples, channel by channel.
pub fn scale_plane(
    src: &[u8],
    src_geo: PlaneGeometry,
    dst: &mut [u8],
    dst_geo: PlaneGeometry,
    bpp: usize,
    filter: ScaleFilter,
) {
    if src_geo.width == 0 || src_geo.height == 0 {
        return;
    }
    match filter {
        ScaleFilter::Nearest => nearest(src, src_geo, dst, dst_geo, bpp),
        ScaleFilter::Bilinear => bilinear(src, src_geo, dst, dst_geo, bpp),
        ScaleFilter::Box => box_filter(src, src_geo, dst, dst_geo, bpp),
    }
}

fn nearest(src: &[u8], s: PlaneGeometry, dst: &mut [u8], d: PlaneGeometry, bpp: usize) {
    for dy in 0..d.height {
        let sy = dy * s.height / d.height;
        let src_row = &src[sy * s.stride..];
        let dst_row = &mut dst[dy * d.stride..];
        for dx in 0..d.width {
            let sx = dx * s.width / d.width;
            dst_row[dx * bpp..(dx + 1) * bpp].copy_from_slice(&src_row[sx * bpp..(sx + 1) * bpp]);
        }
    }
}

/// Source coordinate of destination sample `i` in 16.16 fixed point,
/// aligned on sample centres.
fn center_map(i: usize, src_len: usize, dst_len: usize) -> (usize, usize, u64) {
    let pos = ((2 * i + 1) as u64 * src_len as u64 * 0x10000) / (2 * dst_len as u64);
    let pos = pos.saturating_sub(0x8000);
    let i0 = ((pos >> 16) as usize).min(src_len - 1);
    let i1 = (i0 + 1).min(src_len - 1);
    (i0, i1, pos & 0xFFFF)
}

fn bilinear(src: &[u8], s: PlaneGeometry, dst: &mut [u8], d: PlaneGeometry, bpp: usize) {
    for dy in 0..d.height {
        let (y0, y1, fy) = center_map(dy, s.height, d.height);
        for dx in 0..d.width {
            let (x0, x1, fx) = center_map(dx, s.width, d.width);
            for c in 0..bpp {
                let p00 = src[y0 * s.stride + x0 * bpp + c] as u64;
                let p01 = src[y0 * s.stride + x1 * bpp + c] as u64;
                let p10 = src[y1 * s.stride + x0 * bpp + c] as u64;
                let p11 = src[y1 * s.stride + x1 * bpp + c] as u64;
                let top = p00 * (0x10000 - fx) + p01 * fx;
                let bottom = p10 * (0x10000 - fx) + p11 * fx;
                let value = (top * (0x10000 - fy) + bottom * fy + (1 << 31)) >> 32;
                dst[dy * d.stride + dx * bpp + c] = value.min(255) as u8;
            }
        }
    }
}

fn box_filter(src: &[u8], s: PlaneGeometry, dst: &mut [u8], d: PlaneGeometry, bpp: usize) {
    for dy in 0..d.height {
        let y0 = dy * s.height / d.height;
        let y1 = ((dy + 1) * s.height / d.height).max(y0 + 1).min(s.height);
        for dx in 0..d.width {
            let x0 = dx * s.width / d.width;
            let x1 = ((dx + 1) * s.width / d.width).max(x0 + 1).min(s.width);
            let count = ((y1 - y0) * (x1 - x0)) as u32;
            for c in 0..bpp {
                let mut sum = 0u32;
                for sy in y0..y1 {
                    let row = &src[sy * s.stride..];
                    for sx in x0..x1 {
                        sum += row[sx * bpp + c] as u32;
                    }
                }
                dst[dy * d.stride + dx * bpp + c] = ((sum + count / 2) / count) as u8;
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
