//! `yuvz`: the built-in planar video bitstream.
//!
//! Each frame is an 18-byte header followed by a zstd-compressed payload
//! holding the Y, U and V planes back to back, tightly packed.
//!
//! ```text
//! magic:       [u8; 2]  "YZ"
//! version:     u8       1
//! frame type:  u8       0 = key, 1 = delta
//! sampling:    u8       0 = 4:2:0, 1 = 4:2:2, 2 = 4:4:4
//! quantizer:   u8       1 (lossless) ..= 32
//! width:       u32 LE
//! height:      u32 LE
//! frame index: u32 LE   increments by one per frame within a context
//! ```
//!
//! Keyframes carry `sample / q`. Delta frames carry residuals against the
//! reconstructed previous frame: with `q == 1` the wrapping byte
//! difference, otherwise the residual divided by `q` as an `i8`. Encoder
//! and decoder reconstruct identically, so predictions never drift.

use crate::error::PipelineError;
use crate::pixel::{PixelBuffer, PixelFormat};

pub const MAGIC: [u8; 2] = *b"YZ";
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 18;
pub const MAX_QUANTIZER: u8 = 32;

/// Tightly packed planes of one reconstructed frame.
pub type Planes = Vec<Vec<u8>>;

// ── FrameHeader ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub keyframe: bool,
    pub sampling: PixelFormat,
    pub quantizer: u8,
    pub width: u32,
    pub height: u32,
    pub frame_index: u32,
}

impl FrameHeader {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&MAGIC);
        out.push(VERSION);
        out.push(if self.keyframe { 0 } else { 1 });
        out.push(sampling_code(self.sampling));
        out.push(self.quantizer);
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.frame_index.to_le_bytes());
    }

    /// Split a bitstream into its header and compressed payload.
    pub fn parse(data: &[u8]) -> Result<(Self, &[u8]), PipelineError> {
        if data.len() < HEADER_LEN {
            return Err(corrupt(format!("{} bytes is shorter than a header", data.len())));
        }
        if data[0..2] != MAGIC {
            return Err(corrupt("bad magic".into()));
        }
        if data[2] != VERSION {
            return Err(corrupt(format!("unknown version {}", data[2])));
        }
        let keyframe = match data[3] {
            0 => true,
            1 => false,
            other => return Err(corrupt(format!("unknown frame type {other}"))),
        };
        let sampling = match data[4] {
            0 => PixelFormat::Yuv420p,
            1 => PixelFormat::Yuv422p,
            2 => PixelFormat::Yuv444p,
            other => return Err(corrupt(format!("unknown sampling {other}"))),
        };
        let quantizer = data[5];
        if quantizer == 0 || quantizer > MAX_QUANTIZER {
            return Err(corrupt(format!("quantizer {quantizer} out of range")));
        }
        let word = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        let header = FrameHeader {
            keyframe,
            sampling,
            quantizer,
            width: word(6),
            height: word(10),
            frame_index: word(14),
        };
        if header.width == 0 || header.height == 0 {
            return Err(corrupt("zero-sized frame".into()));
        }
        Ok((header, &data[HEADER_LEN..]))
    }

    /// Byte length of each tightly packed plane.
    pub fn plane_sizes(&self) -> [usize; 3] {
        plane_sizes(self.sampling, self.width, self.height)
    }
}

fn sampling_code(sampling: PixelFormat) -> u8 {
    match sampling {
        PixelFormat::Yuv422p => 1,
        PixelFormat::Yuv444p => 2,
        _ => 0,
    }
}

fn corrupt(reason: String) -> PipelineError {
    PipelineError::DecodeFailed(format!("yuvz: {reason}"))
}

pub fn plane_sizes(sampling: PixelFormat, width: u32, height: u32) -> [usize; 3] {
    let mut sizes = [0usize; 3];
    for (p, size) in sizes.iter_mut().enumerate() {
        let (w, h) = sampling.plane_dimensions(p, width, height);
        *size = w as usize * h as usize;
    }
    sizes
}

/// Copy the planes of `image` without stride padding.
pub fn tight_planes(image: &PixelBuffer) -> Planes {
    let format = image.format();
    (0..format.plane_count())
        .map(|p| {
            let (w, h) = format.plane_dimensions(p, image.width(), image.height());
            let mut plane = Vec::with_capacity(w as usize * h as usize);
            for y in 0..h {
                plane.extend_from_slice(&image.row(p, y)[..w as usize]);
            }
            plane
        })
        .collect()
}

// ── Quantization ─────────────────────────────────────────────────

#[inline]
fn key_reconstruct(symbol: u8, q: u8) -> u8 {
    if q == 1 {
        symbol
    } else {
        (symbol as u32 * q as u32 + q as u32 / 2).min(255) as u8
    }
}

#[inline]
fn delta_symbol(current: u8, reference: u8, q: u8) -> u8 {
    if q == 1 {
        current.wrapping_sub(reference)
    } else {
        let residual = current as i32 - reference as i32;
        (residual / q as i32) as i8 as u8
    }
}

#[inline]
fn delta_reconstruct(symbol: u8, reference: u8, q: u8) -> u8 {
    if q == 1 {
        reference.wrapping_add(symbol)
    } else {
        (reference as i32 + symbol as i8 as i32 * q as i32).clamp(0, 255) as u8
    }
}

/// Quantize `planes` into symbols, also returning the reconstruction the
/// decoder will see. `reference` selects delta coding.
pub fn quantize(planes: &[Vec<u8>], reference: Option<&Planes>, q: u8) -> (Vec<u8>, Planes) {
    let total = planes.iter().map(Vec::len).sum();
    let mut symbols = Vec::with_capacity(total);
    let mut recon = Vec::with_capacity(planes.len());

    for (p, plane) in planes.iter().enumerate() {
        let mut out = Vec::with_capacity(plane.len());
        match reference {
            None => {
                for &v in plane {
                    let s = if q == 1 { v } else { v / q };
                    symbols.push(s);
                    out.push(key_reconstruct(s, q));
                }
            }
            Some(reference) => {
                for (&v, &r) in plane.iter().zip(&reference[p]) {
                    let s = delta_symbol(v, r, q);
                    symbols.push(s);
                    out.push(delta_reconstruct(s, r, q));
                }
            }
        }
        recon.push(out);
    }
    (symbols, recon)
}

/// Rebuild planes from symbols. The caller has checked the symbol count.
pub fn reconstruct(
    symbols: &[u8],
    sizes: [usize; 3],
    reference: Option<&Planes>,
    q: u8,
) -> Planes {
    let mut planes = Vec::with_capacity(3);
    let mut offset = 0;
    for (p, &size) in sizes.iter().enumerate() {
        let chunk = &symbols[offset..offset + size];
        offset += size;
        let plane = match reference {
            None => chunk.iter().map(|&s| key_reconstruct(s, q)).collect(),
            Some(reference) => chunk
                .iter()
                .zip(&reference[p])
                .map(|(&s, &r)| delta_reconstruct(s, r, q))
                .collect(),
        };
        planes.push(plane);
    }
    planes
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn header(keyframe: bool) -> FrameHeader {
        FrameHeader {
            keyframe,
            sampling: PixelFormat::Yuv422p,
            quantizer: 4,
            width: 33,
            height: 17,
            frame_index: 9,
        }
    }

    #[test]
    fn header_layout() {
        let mut out = Vec::new();
        header(false).write(&mut out);
        assert_eq!(out.len(), HEADER_LEN);
        assert_eq!(&out[..6], &[b'Y', b'Z', 1, 1, 1, 4]);
        out.extend_from_slice(b"payload");
        let (parsed, payload) = FrameHeader::parse(&out).unwrap();
        assert_eq!(parsed, header(false));
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn header_rejects_garbage() {
        assert!(FrameHeader::parse(b"YZ").is_err());
        let mut out = Vec::new();
        header(true).write(&mut out);
        out[5] = 0;
        assert!(matches!(FrameHeader::parse(&out), Err(PipelineError::DecodeFailed(_))));
        out[5] = 4;
        out[0] = b'X';
        assert!(FrameHeader::parse(&out).is_err());
    }

    #[test]
    fn lossless_delta_is_exact() {
        let reference = vec![vec![0u8, 10, 250, 128]];
        let current = vec![vec![255u8, 9, 3, 128]];
        let (symbols, recon) = quantize(&current, Some(&reference), 1);
        assert_eq!(recon, current);
        let rebuilt = reconstruct(&symbols, [4, 0, 0], Some(&reference), 1);
        assert_eq!(rebuilt[0], current[0]);
    }

    #[test]
    fn lossy_reconstruction_matches_encoder() {
        let reference = vec![vec![0u8, 100, 200, 255, 17]];
        let current = vec![vec![255u8, 0, 201, 254, 90]];
        for q in [2u8, 5, 13, 32] {
            let (symbols, recon) = quantize(&current, Some(&reference), q);
            let rebuilt = reconstruct(&symbols, [5, 0, 0], Some(&reference), q);
            assert_eq!(rebuilt[0], recon[0]);
            for (&a, &b) in current[0].iter().zip(&recon[0]) {
                assert!(a.abs_diff(b) < q, "q={q}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn key_quantization_error_is_bounded() {
        let plane = vec![(0..=255u8).collect::<Vec<_>>()];
        for q in [1u8, 3, 8, 14] {
            let (symbols, recon) = quantize(&plane, None, q);
            assert_eq!(reconstruct(&symbols, [256, 0, 0], None, q)[0], recon[0]);
            for (&a, &b) in plane[0].iter().zip(&recon[0]) {
                assert!(a.abs_diff(b) <= q / 2 + q % 2, "q={q}: {a} vs {b}");
            }
        }
    }
}
