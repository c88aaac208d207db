//! Screen capture sources.
//!
//! A source keeps one snapshot of its window contents. [`CaptureSource::refresh`]
//! takes a new snapshot, which may block, so pipeline workers call it from
//! `spawn_blocking`. [`CaptureSource::grab`] then copies any region of the
//! snapshot out as a packed BGRX [`PixelBuffer`].

pub mod shadow;
pub mod synthetic;
pub mod y4m;

use std::path::PathBuf;

use crate::error::PipelineError;
use crate::pixel::{PixelBuffer, Rect};

pub use self::y4m::Y4mSource;
pub use shadow::{ShadowFramebuffer, ShadowSource};
pub use synthetic::SyntheticSource;

/// Something that can produce window pixels.
pub trait CaptureSource: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Current snapshot size.
    fn size(&self) -> (u32, u32);

    /// Take a new snapshot.
    fn refresh(&mut self) -> Result<(), PipelineError>;

    /// Copy `region` of the current snapshot. The region must lie inside
    /// [`size`](Self::size); the returned buffer is positioned at it.
    fn grab(&mut self, region: Rect) -> Result<PixelBuffer, PipelineError>;

    /// Copy the whole snapshot.
    fn grab_full(&mut self) -> Result<PixelBuffer, PipelineError> {
        let (width, height) = self.size();
        self.grab(Rect::sized(width, height))
    }
}

/// How to build a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Synthetic { width: u32, height: u32 },
    Y4m { path: PathBuf, looping: bool },
}

/// Build the source described by `spec`.
pub fn open_source(spec: &SourceSpec) -> Result<Box<dyn CaptureSource>, PipelineError> {
    match spec {
        SourceSpec::Synthetic { width, height } => {
            Ok(Box::new(SyntheticSource::new(*width, *height)?))
        }
        SourceSpec::Y4m { path, looping } => Ok(Box::new(Y4mSource::open(path, *looping)?)),
    }
}

fn check_size(width: u32, height: u32) -> Result<(), PipelineError> {
    if width == 0 || height == 0 {
        return Err(PipelineError::Capture(format!(
            "capture size {width}x{height} is empty"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_synthetic() {
        let mut source = open_source(&SourceSpec::Synthetic {
            width: 16,
            height: 8,
        })
        .unwrap();
        assert_eq!(source.name(), "synthetic");
        let frame = source.grab_full().unwrap();
        assert_eq!(frame.rect(), Rect::sized(16, 8));
    }

    #[test]
    fn open_missing_y4m_fails() {
        let spec = SourceSpec::Y4m {
            path: PathBuf::from("/nonexistent/clip.y4m"),
            looping: false,
        };
        assert!(matches!(open_source(&spec), Err(PipelineError::Capture(_))));
    }
}
