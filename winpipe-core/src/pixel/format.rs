//! Pixel format enumeration and plane geometry.

use std::fmt;

// ── PixelFormat ──────────────────────────────────────────────────

/// Memory layout of a [`PixelBuffer`](super::PixelBuffer).
///
/// Packed formats store one interleaved plane; planar YUV formats store
/// three planes (Y, U, V) where the chroma planes may be subsampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PixelFormat {
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb,
    /// 3 bytes per pixel: Blue, Green, Red.
    Bgr,
    /// 4 bytes per pixel: Red, Green, Blue, padding.
    Rgbx,
    /// 4 bytes per pixel: Blue, Green, Red, padding (the native X11 layout).
    Bgrx,
    /// 4 bytes per pixel: padding, Red, Green, Blue.
    Xrgb,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba,
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra,
    /// 4 bytes per pixel: Alpha, Red, Green, Blue.
    Argb,
    /// Planar YUV with chroma halved in both directions.
    Yuv420p,
    /// Planar YUV with chroma halved horizontally.
    Yuv422p,
    /// Planar YUV without chroma subsampling.
    Yuv444p,
}

/// All formats, packed first.
pub const ALL_FORMATS: [PixelFormat; 11] = [
    PixelFormat::Rgb,
    PixelFormat::Bgr,
    PixelFormat::Rgbx,
    PixelFormat::Bgrx,
    PixelFormat::Xrgb,
    PixelFormat::Rgba,
    PixelFormat::Bgra,
    PixelFormat::Argb,
    PixelFormat::Yuv420p,
    PixelFormat::Yuv422p,
    PixelFormat::Yuv444p,
];

/// Byte offsets of the colour channels inside one packed pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    pub r: usize,
    pub g: usize,
    pub b: usize,
    /// Offset of the alpha byte, if the format carries alpha.
    pub alpha: Option<usize>,
    /// Offset of an unused padding byte, if any.
    pub padding: Option<usize>,
}

impl PixelFormat {
    /// Canonical upper-case name as used on the wire (`"BGRX"`, `"YUV420P"`).
    pub const fn name(self) -> &'static str {
        match self {
            PixelFormat::Rgb => "RGB",
            PixelFormat::Bgr => "BGR",
            PixelFormat::Rgbx => "RGBX",
            PixelFormat::Bgrx => "BGRX",
            PixelFormat::Xrgb => "XRGB",
            PixelFormat::Rgba => "RGBA",
            PixelFormat::Bgra => "BGRA",
            PixelFormat::Argb => "ARGB",
            PixelFormat::Yuv420p => "YUV420P",
            PixelFormat::Yuv422p => "YUV422P",
            PixelFormat::Yuv444p => "YUV444P",
        }
    }

    /// Parse a wire name. Matching is case-sensitive, like the names themselves.
    pub fn from_name(name: &str) -> Option<Self> {
        ALL_FORMATS.into_iter().find(|f| f.name() == name)
    }

    /// Whether the format stores Y, U and V in separate planes.
    pub const fn is_planar(self) -> bool {
        matches!(
            self,
            PixelFormat::Yuv420p | PixelFormat::Yuv422p | PixelFormat::Yuv444p
        )
    }

    /// Number of memory planes.
    pub const fn plane_count(self) -> usize {
        if self.is_planar() { 3 } else { 1 }
    }

    /// Bytes per pixel for packed formats, bytes per sample for planar ones.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb | PixelFormat::Bgr => 3,
            PixelFormat::Rgbx
            | PixelFormat::Bgrx
            | PixelFormat::Xrgb
            | PixelFormat::Rgba
            | PixelFormat::Bgra
            | PixelFormat::Argb => 4,
            PixelFormat::Yuv420p | PixelFormat::Yuv422p | PixelFormat::Yuv444p => 1,
        }
    }

    /// Whether the format carries a meaningful alpha channel.
    pub const fn has_alpha(self) -> bool {
        matches!(
            self,
            PixelFormat::Rgba | PixelFormat::Bgra | PixelFormat::Argb
        )
    }

    /// Channel offsets for packed formats, `None` for planar ones.
    pub const fn channels(self) -> Option<ChannelLayout> {
        let layout = match self {
            PixelFormat::Rgb => (0, 1, 2, None, None),
            PixelFormat::Bgr => (2, 1, 0, None, None),
            PixelFormat::Rgbx => (0, 1, 2, None, Some(3)),
            PixelFormat::Bgrx => (2, 1, 0, None, Some(3)),
            PixelFormat::Xrgb => (1, 2, 3, None, Some(0)),
            PixelFormat::Rgba => (0, 1, 2, Some(3), None),
            PixelFormat::Bgra => (2, 1, 0, Some(3), None),
            PixelFormat::Argb => (1, 2, 3, Some(0), None),
            _ => return None,
        };
        Some(ChannelLayout {
            r: layout.0,
            g: layout.1,
            b: layout.2,
            alpha: layout.3,
            padding: layout.4,
        })
    }

    /// Chroma subsampling divisors `(x, y)` for planar formats.
    ///
    /// Luma is never subsampled; packed formats report `(1, 1)`.
    pub const fn chroma_divisors(self) -> (u32, u32) {
        match self {
            PixelFormat::Yuv420p => (2, 2),
            PixelFormat::Yuv422p => (2, 1),
            _ => (1, 1),
        }
    }

    /// Dimensions in samples of `plane` for an image of `width × height`.
    ///
    /// Subsampled chroma planes round up so odd sizes keep their last column/row.
    pub const fn plane_dimensions(self, plane: usize, width: u32, height: u32) -> (u32, u32) {
        if plane == 0 || !self.is_planar() {
            return (width, height);
        }
        let (dx, dy) = self.chroma_divisors();
        (width.div_ceil(dx), height.div_ceil(dy))
    }

    /// Minimum row length in bytes of `plane`.
    pub const fn min_stride(self, plane: usize, width: u32) -> usize {
        let (w, _) = self.plane_dimensions(plane, width, 1);
        w as usize * self.bytes_per_pixel()
    }

    /// Row strides padded to a 4-byte boundary, one per plane.
    pub fn aligned_strides(self, width: u32) -> Vec<usize> {
        (0..self.plane_count())
            .map(|p| align4(self.min_stride(p, width)))
            .collect()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Round `n` up to the next multiple of four.
pub const fn align4(n: usize) -> usize {
    (n + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip() {
        for f in ALL_FORMATS {
            assert_eq!(PixelFormat::from_name(f.name()), Some(f));
        }
        assert_eq!(PixelFormat::from_name("bgrx"), None);
        assert_eq!(PixelFormat::from_name("NV12"), None);
    }

    #[test]
    fn plane_geometry_rounds_up() {
        assert_eq!(PixelFormat::Yuv420p.plane_dimensions(0, 5, 3), (5, 3));
        assert_eq!(PixelFormat::Yuv420p.plane_dimensions(1, 5, 3), (3, 2));
        assert_eq!(PixelFormat::Yuv422p.plane_dimensions(2, 5, 3), (3, 3));
        assert_eq!(PixelFormat::Yuv444p.plane_dimensions(1, 5, 3), (5, 3));
        assert_eq!(PixelFormat::Bgrx.plane_dimensions(0, 5, 3), (5, 3));
    }

    #[test]
    fn strides_are_aligned() {
        assert_eq!(PixelFormat::Rgb.aligned_strides(5), vec![16]);
        assert_eq!(PixelFormat::Bgrx.aligned_strides(5), vec![20]);
        assert_eq!(PixelFormat::Yuv420p.aligned_strides(5), vec![8, 4, 4]);
    }

    #[test]
    fn channel_layouts() {
        let bgrx = PixelFormat::Bgrx.channels().unwrap();
        assert_eq!((bgrx.r, bgrx.g, bgrx.b), (2, 1, 0));
        assert_eq!(bgrx.padding, Some(3));
        assert_eq!(PixelFormat::Argb.channels().unwrap().alpha, Some(0));
        assert!(PixelFormat::Yuv444p.channels().is_none());
    }
}
