//! Deterministic animated test pattern.

use tracing::trace;

use crate::capture::{CaptureSource, check_size};
use crate::error::PipelineError;
use crate::pixel::{PixelBuffer, PixelFormat, Rect};

const BOX_SIZE: u32 = 32;
const BOX_COLOR: [u8; 4] = [0x30, 0x90, 0xF0, 0xFF];

/// A static gradient with a box that moves a few pixels per frame.
///
/// The same frame number always renders the same pixels, and only the
/// box area changes between frames.
pub struct SyntheticSource {
    frame: u64,
    snapshot: PixelBuffer,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Result<Self, PipelineError> {
        check_size(width, height)?;
        let mut source = Self {
            frame: 0,
            snapshot: PixelBuffer::allocate(Rect::sized(width, height), PixelFormat::Bgrx),
        };
        source.render()?;
        Ok(source)
    }

    /// Frames rendered since construction, starting at 0.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Top-left corner of the moving box in the current frame.
    pub fn box_rect(&self) -> Rect {
        box_rect(self.frame, self.snapshot.width(), self.snapshot.height())
    }

    fn render(&mut self) -> Result<(), PipelineError> {
        let bx = self.box_rect();
        let width = self.snapshot.width();
        let height = self.snapshot.height();
        let stride = self.snapshot.stride(0);
        let plane = self.snapshot.plane_mut(0)?;
        for y in 0..height {
            let row = &mut plane[y as usize * stride..][..width as usize * 4];
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let x = x as u32;
                let inside = x >= bx.x as u32
                    && x < bx.x as u32 + bx.width
                    && y >= bx.y as u32
                    && y < bx.y as u32 + bx.height;
                if inside {
                    px.copy_from_slice(&BOX_COLOR);
                } else {
                    px.copy_from_slice(&[x as u8, y as u8, ((x + y) / 2) as u8, 0xFF]);
                }
            }
        }
        Ok(())
    }
}

fn box_rect(frame: u64, width: u32, height: u32) -> Rect {
    let size = BOX_SIZE.min(width).min(height);
    let x = (frame * 8) % u64::from(width - size + 1);
    let y = (frame * 4) % u64::from(height - size + 1);
    Rect::new(x as i32, y as i32, size, size)
}

impl CaptureSource for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn size(&self) -> (u32, u32) {
        (self.snapshot.width(), self.snapshot.height())
    }

    fn refresh(&mut self) -> Result<(), PipelineError> {
        self.frame += 1;
        trace!(frame = self.frame, "rendering synthetic frame");
        self.render()
    }

    fn grab(&mut self, region: Rect) -> Result<PixelBuffer, PipelineError> {
        self.snapshot.crop(region)
    }
}
