//! The client's copy of a window's pixels.

use std::path::Path;

use tracing::debug;

use crate::codec::{EncoderSettings, PictureEncoder, png::PngPictureEncoder};
use crate::csc::ColorspaceConverter;
use crate::error::PipelineError;
use crate::pixel::{PixelBuffer, PixelFormat, Rect};

/// A BGRX backing store that decoded regions are painted into.
pub struct Surface {
    pixels: PixelBuffer,
    converter: Option<ColorspaceConverter>,
    paints: u64,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: PixelBuffer::allocate(Rect::sized(width, height), PixelFormat::Bgrx),
            converter: None,
            paints: 0,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.pixels.width(), self.pixels.height())
    }

    pub fn paints(&self) -> u64 {
        self.paints
    }

    /// Resize, keeping the overlapping top-left area.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), PipelineError> {
        if (width, height) == self.size() {
            return Ok(());
        }
        let mut resized = PixelBuffer::allocate(Rect::sized(width, height), PixelFormat::Bgrx);
        let keep_w = width.min(self.pixels.width()) as usize * 4;
        let keep_h = height.min(self.pixels.height());
        let dst_stride = resized.stride(0);
        let dst = resized.plane_mut(0)?;
        for y in 0..keep_h {
            let start = y as usize * dst_stride;
            dst[start..start + keep_w].copy_from_slice(&self.pixels.row(0, y)[..keep_w]);
        }
        debug!(width, height, "surface resized");
        self.pixels = resized;
        Ok(())
    }

    /// Paint decoded pixels at `(x, y)`, clipped to the surface.
    ///
    /// Pixels that are not BGRX go through a colorspace converter, which
    /// is kept for as long as the incoming size and format stay the same.
    pub fn paint(&mut self, x: i32, y: i32, image: &PixelBuffer) -> Result<(), PipelineError> {
        let converted;
        let bgrx = if image.format() == PixelFormat::Bgrx {
            image
        } else {
            converted = self.convert(image)?;
            &converted
        };

        let (sw, sh) = self.size();
        let target = Rect::new(x, y, bgrx.width(), bgrx.height());
        let Some(clip) = Rect::sized(sw, sh).intersect(&target) else {
            return Ok(());
        };
        let src_x = (clip.x - x) as usize * 4;
        let src_y = (clip.y - y) as u32;
        let row_len = clip.width as usize * 4;
        let dst_stride = self.pixels.stride(0);
        let dst = self.pixels.plane_mut(0)?;
        for row in 0..clip.height {
            let src = &bgrx.row(0, src_y + row)[src_x..src_x + row_len];
            let start = (clip.y as usize + row as usize) * dst_stride + clip.x as usize * 4;
            dst[start..start + row_len].copy_from_slice(src);
        }
        self.paints += 1;
        Ok(())
    }

    fn convert(&mut self, image: &PixelBuffer) -> Result<PixelBuffer, PipelineError> {
        let (w, h) = (image.width(), image.height());
        let reusable = self
            .converter
            .as_ref()
            .is_some_and(|c| c.src_format() == image.format() && c.src_size() == (w, h));
        if !reusable {
            self.converter = Some(ColorspaceConverter::init(
                w,
                h,
                image.format(),
                w,
                h,
                PixelFormat::Bgrx,
                100,
            )?);
        }
        match self.converter.as_mut() {
            Some(converter) => converter.convert(image),
            None => Err(PipelineError::InvalidState {
                operation: "convert",
                state: "uninitialized",
            }),
        }
    }

    /// Packed BGRX pixels without stride padding.
    pub fn pixels(&self) -> Vec<u8> {
        self.pixels.tight_bytes()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.pixels.width() || y >= self.pixels.height() {
            return None;
        }
        let px = &self.pixels.row(0, y)[x as usize * 4..x as usize * 4 + 4];
        Some([px[0], px[1], px[2], px[3]])
    }

    /// blake3 digest of the visible pixels, as hex.
    pub fn checksum(&self) -> String {
        blake3::hash(&self.pixels()).to_hex().to_string()
    }

    /// Write the surface to `path` as a PNG.
    pub fn dump_png(&self, path: &Path) -> Result<(), PipelineError> {
        let settings = EncoderSettings {
            speed: 100,
            ..EncoderSettings::default()
        };
        let picture = PngPictureEncoder::new(&settings).encode(&self.pixels)?;
        std::fs::write(path, picture.data).map_err(|e| {
            PipelineError::EncodeFailed(format!("cannot write {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "surface dumped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, format: PixelFormat, px: &[u8]) -> PixelBuffer {
        let data = px.repeat((w * h) as usize);
        PixelBuffer::packed(Rect::sized(w, h), format, data, w as usize * px.len()).unwrap()
    }

    #[test]
    fn paint_is_clipped() {
        let mut surface = Surface::new(4, 4);
        surface
            .paint(2, -1, &solid(4, 2, PixelFormat::Bgrx, &[9, 8, 7, 6]))
            .unwrap();
        assert_eq!(surface.pixel(2, 0), Some([9, 8, 7, 6]));
        assert_eq!(surface.pixel(3, 0), Some([9, 8, 7, 6]));
        assert_eq!(surface.pixel(1, 0), Some([0, 0, 0, 0]));
        assert_eq!(surface.pixel(2, 1), Some([0, 0, 0, 0]));
        surface
            .paint(10, 10, &solid(1, 1, PixelFormat::Bgrx, &[1, 1, 1, 1]))
            .unwrap();
    }

    #[test]
    fn other_layouts_are_converted() {
        let mut surface = Surface::new(2, 2);
        surface
            .paint(0, 0, &solid(2, 2, PixelFormat::Rgb, &[10, 20, 30]))
            .unwrap();
        assert_eq!(&surface.pixel(1, 1).unwrap()[..3], &[30, 20, 10]);
    }

    #[test]
    fn resize_keeps_overlap() {
        let mut surface = Surface::new(2, 2);
        surface
            .paint(0, 0, &solid(2, 2, PixelFormat::Bgrx, &[5, 5, 5, 5]))
            .unwrap();
        surface.resize(3, 1).unwrap();
        assert_eq!(surface.size(), (3, 1));
        assert_eq!(surface.pixel(1, 0), Some([5, 5, 5, 5]));
        assert_eq!(surface.pixel(2, 0), Some([0, 0, 0, 0]));
    }

    #[test]
    fn checksum_tracks_content() {
        let mut a = Surface::new(3, 3);
        let b = Surface::new(3, 3);
        assert_eq!(a.checksum(), b.checksum());
        a.paint(1, 1, &solid(1, 1, PixelFormat::Bgrx, &[1, 2, 3, 4]))
            .unwrap();
        assert_ne!(a.checksum(), b.checksum());
    }
}
