//! A framebuffer kept in memory and painted by another component.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::capture::{CaptureSource, check_size};
use crate::error::PipelineError;
use crate::pixel::{PixelBuffer, PixelFormat, Rect};

/// Shared BGRX framebuffer. Clones refer to the same pixels.
#[derive(Clone)]
pub struct ShadowFramebuffer {
    inner: Arc<Mutex<PixelBuffer>>,
}

impl ShadowFramebuffer {
    pub fn new(width: u32, height: u32) -> Result<Self, PipelineError> {
        check_size(width, height)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(PixelBuffer::allocate(
                Rect::sized(width, height),
                PixelFormat::Bgrx,
            ))),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, PixelBuffer>, PipelineError> {
        self.inner
            .lock()
            .map_err(|_| PipelineError::Capture("shadow framebuffer lock poisoned".into()))
    }

    pub fn size(&self) -> Result<(u32, u32), PipelineError> {
        let fb = self.lock()?;
        Ok((fb.width(), fb.height()))
    }

    /// Copy tightly packed BGRX pixels into `rect`.
    pub fn paint(&self, rect: Rect, bgrx: &[u8]) -> Result<(), PipelineError> {
        let row_len = rect.width as usize * 4;
        if bgrx.len() != row_len * rect.height as usize {
            return Err(PipelineError::InvalidBuffer(format!(
                "{} bytes for a {}x{} paint",
                bgrx.len(),
                rect.width,
                rect.height
            )));
        }
        let mut fb = self.lock()?;
        check_inside(&fb, rect)?;
        let stride = fb.stride(0);
        let plane = fb.plane_mut(0)?;
        for (row, src) in bgrx.chunks_exact(row_len).enumerate() {
            let start = (rect.y as usize + row) * stride + rect.x as usize * 4;
            plane[start..start + row_len].copy_from_slice(src);
        }
        Ok(())
    }

    /// Fill `rect` with one BGRX colour.
    pub fn fill(&self, rect: Rect, bgrx: [u8; 4]) -> Result<(), PipelineError> {
        let pixels = bgrx.repeat(rect.area() as usize);
        self.paint(rect, &pixels)
    }

    /// Replace the framebuffer with a cleared one of a new size.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), PipelineError> {
        check_size(width, height)?;
        let mut fb = self.lock()?;
        *fb = PixelBuffer::allocate(Rect::sized(width, height), PixelFormat::Bgrx);
        Ok(())
    }
}

fn check_inside(fb: &PixelBuffer, rect: Rect) -> Result<(), PipelineError> {
    let bounds = Rect::sized(fb.width(), fb.height());
    if rect.is_empty() || bounds.intersect(&rect) != Some(rect) {
        return Err(PipelineError::InvalidBuffer(format!(
            "{rect:?} outside {}x{} framebuffer",
            fb.width(),
            fb.height()
        )));
    }
    Ok(())
}

/// Captures whatever was last painted into a [`ShadowFramebuffer`].
pub struct ShadowSource {
    framebuffer: ShadowFramebuffer,
    size: (u32, u32),
}

impl ShadowSource {
    pub fn new(framebuffer: ShadowFramebuffer) -> Result<Self, PipelineError> {
        let size = framebuffer.size()?;
        Ok(Self { framebuffer, size })
    }

    pub fn framebuffer(&self) -> &ShadowFramebuffer {
        &self.framebuffer
    }
}

impl CaptureSource for ShadowSource {
    fn name(&self) -> &'static str {
        "shadow"
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Picks up size changes made through [`ShadowFramebuffer::resize`].
    fn refresh(&mut self) -> Result<(), PipelineError> {
        self.size = self.framebuffer.size()?;
        Ok(())
    }

    fn grab(&mut self, region: Rect) -> Result<PixelBuffer, PipelineError> {
        self.framebuffer.lock()?.crop(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn painted_pixels_are_captured() {
        let fb = ShadowFramebuffer::new(8, 8).unwrap();
        let mut source = ShadowSource::new(fb.clone()).unwrap();
        fb.fill(Rect::new(2, 3, 2, 1), [1, 2, 3, 4]).unwrap();
        let grabbed = source.grab(Rect::new(2, 3, 2, 1)).unwrap();
        assert_eq!(grabbed.tight_bytes(), vec![1, 2, 3, 4, 1, 2, 3, 4]);
        let untouched = source.grab(Rect::new(0, 0, 1, 1)).unwrap();
        assert_eq!(untouched.tight_bytes(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn paint_checks_bounds_and_length() {
        let fb = ShadowFramebuffer::new(4, 4).unwrap();
        assert!(fb.paint(Rect::new(3, 3, 2, 1), &[0; 8]).is_err());
        assert!(fb.paint(Rect::new(0, 0, 2, 1), &[0; 7]).is_err());
    }

    #[test]
    fn resize_is_seen_after_refresh() {
        let fb = ShadowFramebuffer::new(4, 4).unwrap();
        let mut source = ShadowSource::new(fb.clone()).unwrap();
        fb.resize(10, 6).unwrap();
        assert_eq!(source.size(), (4, 4));
        source.refresh().unwrap();
        assert_eq!(source.size(), (10, 6));
        assert_eq!(source.grab_full().unwrap().rect(), Rect::sized(10, 6));
    }
}
