//! Pixel transforms between packed RGB layouts and planar YUV.
//!
//! YUV is full-range BT.601 in 8.8 fixed point: white is Y=255, U=V=128.
//! Every transform reads the top-left `dst.width() × dst.height()` region
//! of `src`, which may be larger.

use crate::error::PipelineError;
use crate::pixel::{ChannelLayout, PixelBuffer, PixelFormat};

/// Signature shared by every entry in the dispatch table.
pub type TransformFn = fn(&PixelBuffer, &mut PixelBuffer) -> Result<(), PipelineError>;

// ── Colour math ──────────────────────────────────────────────────

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[inline]
pub(crate) fn rgb_to_y(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8((77 * r + 150 * g + 29 * b + 128) >> 8)
}

#[inline]
pub(crate) fn rgb_to_uv(r: i32, g: i32, b: i32) -> (u8, u8) {
    let u = ((-43 * r - 85 * g + 128 * b + 128) >> 8) + 128;
    let v = ((128 * r - 107 * g - 21 * b + 128) >> 8) + 128;
    (clamp_u8(u), clamp_u8(v))
}

#[inline]
pub(crate) fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y = y as i32;
    let u = u as i32 - 128;
    let v = v as i32 - 128;
    let r = y + ((359 * v + 128) >> 8);
    let g = y - ((88 * u + 183 * v + 128) >> 8);
    let b = y + ((454 * u + 128) >> 8);
    (clamp_u8(r), clamp_u8(g), clamp_u8(b))
}

fn layout(format: PixelFormat) -> Result<ChannelLayout, PipelineError> {
    format
        .channels()
        .ok_or_else(|| PipelineError::InvalidBuffer(format!("{format} is not a packed format")))
}

#[inline]
fn write_pixel(out: &mut [u8], l: &ChannelLayout, r: u8, g: u8, b: u8, a: u8) {
    out[l.r] = r;
    out[l.g] = g;
    out[l.b] = b;
    if let Some(i) = l.alpha {
        out[i] = a;
    }
    if let Some(i) = l.padding {
        out[i] = 0xFF;
    }
}

// ── Packed → packed ──────────────────────────────────────────────

/// Reorder channels between two packed layouts. Lossless.
pub fn swizzle_packed(src: &PixelBuffer, dst: &mut PixelBuffer) -> Result<(), PipelineError> {
    let sl = layout(src.format())?;
    let dl = layout(dst.format())?;
    let (sbpp, dbpp) = (src.format().bytes_per_pixel(), dst.format().bytes_per_pixel());
    let (w, h) = (dst.width() as usize, dst.height() as usize);
    let (sstride, dstride) = (src.stride(0), dst.stride(0));
    let input = src.plane(0);
    let output = dst.plane_mut(0)?;

    for y in 0..h {
        let srow = &input[y * sstride..];
        let drow = &mut output[y * dstride..];
        for x in 0..w {
            let sp = &srow[x * sbpp..(x + 1) * sbpp];
            let a = sl.alpha.map_or(0xFF, |i| sp[i]);
            write_pixel(&mut drow[x * dbpp..(x + 1) * dbpp], &dl, sp[sl.r], sp[sl.g], sp[sl.b], a);
        }
    }
    Ok(())
}

/// Plain copy between identical formats.
pub fn copy_planes(src: &PixelBuffer, dst: &mut PixelBuffer) -> Result<(), PipelineError> {
    let format = dst.format();
    let (w, h) = (dst.width(), dst.height());
    for p in 0..format.plane_count() {
        let (_, ph) = format.plane_dimensions(p, w, h);
        let row_len = format.min_stride(p, w);
        let (sstride, dstride) = (src.stride(p), dst.stride(p));
        let input = src.plane(p);
        let output = dst.plane_mut(p)?;
        for y in 0..ph as usize {
            output[y * dstride..y * dstride + row_len]
                .copy_from_slice(&input[y * sstride..y * sstride + row_len]);
        }
    }
    Ok(())
}

// ── Packed → planar ──────────────────────────────────────────────

/// RGB family to YUV 4:2:0 / 4:2:2 / 4:4:4.
///
/// Chroma samples average the RGB of every source pixel they cover.
pub fn packed_to_planar(src: &PixelBuffer, dst: &mut PixelBuffer) -> Result<(), PipelineError> {
    let sl = layout(src.format())?;
    let bpp = src.format().bytes_per_pixel();
    let sstride = src.stride(0);
    let input = src.plane(0);
    let dformat = dst.format();
    let (w, h) = (dst.width(), dst.height());
    let (dx, dy) = dformat.chroma_divisors();
    let (cw, ch) = dformat.plane_dimensions(1, w, h);
    let strides = [dst.stride(0), dst.stride(1), dst.stride(2)];
    let [yp, up, vp] = dst.planes_mut()? else {
        return Err(PipelineError::InvalidBuffer(format!("{dformat} is not planar")));
    };

    for y in 0..h as usize {
        let srow = &input[y * sstride..];
        let yrow = &mut yp[y * strides[0]..];
        for x in 0..w as usize {
            let p = &srow[x * bpp..];
            yrow[x] = rgb_to_y(p[sl.r] as i32, p[sl.g] as i32, p[sl.b] as i32);
        }
    }

    for cy in 0..ch as usize {
        let y0 = cy * dy as usize;
        let y1 = (y0 + dy as usize).min(h as usize);
        for cx in 0..cw as usize {
            let x0 = cx * dx as usize;
            let x1 = (x0 + dx as usize).min(w as usize);
            let (mut rs, mut gs, mut bs, mut n) = (0i32, 0i32, 0i32, 0i32);
            for sy in y0..y1 {
                let srow = &input[sy * sstride..];
                for sx in x0..x1 {
                    let p = &srow[sx * bpp..];
                    rs += p[sl.r] as i32;
                    gs += p[sl.g] as i32;
                    bs += p[sl.b] as i32;
                    n += 1;
                }
            }
            let (u, v) = rgb_to_uv((rs + n / 2) / n, (gs + n / 2) / n, (bs + n / 2) / n);
            up[cy * strides[1] + cx] = u;
            vp[cy * strides[2] + cx] = v;
        }
    }
    Ok(())
}

// ── Planar → packed ──────────────────────────────────────────────

/// YUV 4:2:0 / 4:2:2 / 4:4:4 to any RGB family layout.
pub fn planar_to_packed(src: &PixelBuffer, dst: &mut PixelBuffer) -> Result<(), PipelineError> {
    let dl = layout(dst.format())?;
    let bpp = dst.format().bytes_per_pixel();
    let (dx, dy) = src.format().chroma_divisors();
    let (w, h) = (dst.width() as usize, dst.height() as usize);
    let (ys, us, vs) = (src.stride(0), src.stride(1), src.stride(2));
    let (yp, up, vp) = (src.plane(0), src.plane(1), src.plane(2));
    let dstride = dst.stride(0);
    let output = dst.plane_mut(0)?;

    for y in 0..h {
        let cy = y / dy as usize;
        let drow = &mut output[y * dstride..];
        for x in 0..w {
            let cx = x / dx as usize;
            let (r, g, b) = yuv_to_rgb(yp[y * ys + x], up[cy * us + cx], vp[cy * vs + cx]);
            write_pixel(&mut drow[x * bpp..(x + 1) * bpp], &dl, r, g, b, 0xFF);
        }
    }
    Ok(())
}

// ── Planar → planar ──────────────────────────────────────────────

/// Change chroma subsampling. Luma is copied; each destination chroma
/// sample averages the source chroma under its footprint.
pub fn planar_resample(src: &PixelBuffer, dst: &mut PixelBuffer) -> Result<(), PipelineError> {
    let (sdx, sdy) = src.format().chroma_divisors();
    let dformat = dst.format();
    let (ddx, ddy) = dformat.chroma_divisors();
    let (w, h) = (dst.width() as usize, dst.height() as usize);
    let (cw, ch) = dformat.plane_dimensions(1, w as u32, h as u32);
    let sstrides = [src.stride(0), src.stride(1), src.stride(2)];
    let dstrides = [dst.stride(0), dst.stride(1), dst.stride(2)];
    let [yp, up, vp] = dst.planes_mut()? else {
        return Err(PipelineError::InvalidBuffer(format!("{dformat} is not planar")));
    };

    let sy_plane = src.plane(0);
    for y in 0..h {
        yp[y * dstrides[0]..y * dstrides[0] + w]
            .copy_from_slice(&sy_plane[y * sstrides[0]..y * sstrides[0] + w]);
    }

    for (plane, out) in [(1usize, up), (2usize, vp)] {
        let input = src.plane(plane);
        for cy in 0..ch as usize {
            let y0 = cy * ddy as usize;
            let y1 = (y0 + ddy as usize).min(h);
            for cx in 0..cw as usize {
                let x0 = cx * ddx as usize;
                let x1 = (x0 + ddx as usize).min(w);
                let (mut sum, mut n) = (0u32, 0u32);
                for ly in y0..y1 {
                    let row = &input[(ly / sdy as usize) * sstrides[plane]..];
                    for lx in x0..x1 {
                        sum += row[lx / sdx as usize] as u32;
                        n += 1;
                    }
                }
                out[cy * dstrides[plane] + cx] = ((sum + n / 2) / n) as u8;
            }
        }
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_and_black() {
        assert_eq!(rgb_to_y(255, 255, 255), 255);
        assert_eq!(rgb_to_uv(255, 255, 255), (128, 128));
        assert_eq!(rgb_to_y(0, 0, 0), 0);
        assert_eq!(rgb_to_uv(0, 0, 0), (128, 128));
        assert_eq!(yuv_to_rgb(255, 128, 128), (255, 255, 255));
        assert_eq!(yuv_to_rgb(0, 128, 128), (0, 0, 0));
    }

    #[test]
    fn colour_math_roundtrips_within_tolerance() {
        for &(r, g, b) in &[
            (255u8, 0u8, 0u8),
            (0, 255, 0),
            (0, 0, 255),
            (12, 200, 99),
            (250, 128, 3),
            (64, 64, 64),
        ] {
            let y = rgb_to_y(r as i32, g as i32, b as i32);
            let (u, v) = rgb_to_uv(r as i32, g as i32, b as i32);
            let (r2, g2, b2) = yuv_to_rgb(y, u, v);
            for (a, b) in [(r, r2), (g, g2), (b, b2)] {
                assert!((a as i32 - b as i32).abs() <= 4, "{r},{g},{b} -> {r2},{g2},{b2}");
            }
        }
    }
}
