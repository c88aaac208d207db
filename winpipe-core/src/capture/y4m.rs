//! Replays a YUV4MPEG2 clip as a capture source.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use y4m::{Colorspace, Decoder};

use crate::capture::{CaptureSource, check_size};
use crate::csc::ColorspaceConverter;
use crate::error::PipelineError;
use crate::pixel::{PixelBuffer, PixelFormat, Rect};

type Reader = Box<dyn Read + Send>;

/// Reads one Y4M frame per refresh and presents it as BGRX.
///
/// Sources opened from a file can loop back to the first frame at the end
/// of the clip; sources built from a reader stop with a capture error.
pub struct Y4mSource {
    decoder: Decoder<Reader>,
    path: Option<PathBuf>,
    looping: bool,
    width: u32,
    height: u32,
    format: PixelFormat,
    converter: ColorspaceConverter,
    snapshot: PixelBuffer,
    frames: u64,
}

impl Y4mSource {
    pub fn open(path: impl AsRef<Path>, looping: bool) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let decoder = open_decoder(path)?;
        let mut source = Self::with_decoder(decoder)?;
        source.path = Some(path.to_path_buf());
        source.looping = looping;
        info!(path = %path.display(), width = source.width, height = source.height, "y4m clip opened");
        Ok(source)
    }

    pub fn from_reader(reader: impl Read + Send + 'static) -> Result<Self, PipelineError> {
        let decoder = y4m::decode(Box::new(reader) as Reader).map_err(y4m_error)?;
        Self::with_decoder(decoder)
    }

    fn with_decoder(decoder: Decoder<Reader>) -> Result<Self, PipelineError> {
        let width = decoder.get_width() as u32;
        let height = decoder.get_height() as u32;
        check_size(width, height)?;
        let format = planar_format(decoder.get_colorspace())?;
        let converter =
            ColorspaceConverter::init(width, height, format, width, height, PixelFormat::Bgrx, 100)?;
        Ok(Self {
            decoder,
            path: None,
            looping: false,
            width,
            height,
            format,
            converter,
            snapshot: PixelBuffer::allocate(Rect::sized(width, height), PixelFormat::Bgrx),
            frames: 0,
        })
    }

    /// Sampling of the clip.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Frames read so far, across loops.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn read_planes(&mut self) -> Result<Option<Vec<Vec<u8>>>, PipelineError> {
        match self.decoder.read_frame() {
            Ok(frame) => Ok(Some(vec![
                frame.get_y_plane().to_vec(),
                frame.get_u_plane().to_vec(),
                frame.get_v_plane().to_vec(),
            ])),
            Err(y4m::Error::EOF) => Ok(None),
            Err(e) => Err(y4m_error(e)),
        }
    }
}

fn open_decoder(path: &Path) -> Result<Decoder<Reader>, PipelineError> {
    let file = File::open(path)
        .map_err(|e| PipelineError::Capture(format!("cannot open {}: {e}", path.display())))?;
    y4m::decode(Box::new(file) as Reader).map_err(y4m_error)
}

fn y4m_error(e: y4m::Error) -> PipelineError {
    PipelineError::Capture(format!("y4m: {e:?}"))
}

fn planar_format(colorspace: Colorspace) -> Result<PixelFormat, PipelineError> {
    match colorspace {
        Colorspace::C420
        | Colorspace::C420jpeg
        | Colorspace::C420paldv
        | Colorspace::C420mpeg2 => Ok(PixelFormat::Yuv420p),
        Colorspace::C422 => Ok(PixelFormat::Yuv422p),
        Colorspace::C444 => Ok(PixelFormat::Yuv444p),
        other => Err(PipelineError::UnsupportedFormat(format!(
            "y4m colorspace {other:?}"
        ))),
    }
}

impl CaptureSource for Y4mSource {
    fn name(&self) -> &'static str {
        "y4m"
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn refresh(&mut self) -> Result<(), PipelineError> {
        let planes = match self.read_planes()? {
            Some(planes) => planes,
            None => match (self.path.clone(), self.looping) {
                (Some(path), true) => {
                    debug!(path = %path.display(), frames = self.frames, "y4m clip looped");
                    self.decoder = open_decoder(&path)?;
                    self.read_planes()?.ok_or_else(|| {
                        PipelineError::Capture("y4m clip has no frames".into())
                    })?
                }
                _ => return Err(PipelineError::SourceEnded),
            },
        };
        let strides = (0..3).map(|p| self.format.min_stride(p, self.width)).collect();
        let frame = PixelBuffer::new(
            Rect::sized(self.width, self.height),
            self.format,
            planes,
            strides,
        )?;
        self.snapshot = self.converter.convert(&frame)?;
        self.frames += 1;
        Ok(())
    }

    fn grab(&mut self, region: Rect) -> Result<PixelBuffer, PipelineError> {
        self.snapshot.crop(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn clip(frames: usize, luma: u8) -> Vec<u8> {
        let mut data = b"YUV4MPEG2 W4 H2 F25:1 C420jpeg\n".to_vec();
        for _ in 0..frames {
            data.extend_from_slice(b"FRAME\n");
            data.extend_from_slice(&[luma; 8]);
            data.extend_from_slice(&[128; 4]);
        }
        data
    }

    #[test]
    fn white_frames_become_white_bgrx() {
        let mut source = Y4mSource::from_reader(Cursor::new(clip(1, 255))).unwrap();
        assert_eq!(source.size(), (4, 2));
        assert_eq!(source.format(), PixelFormat::Yuv420p);
        source.refresh().unwrap();
        let frame = source.grab_full().unwrap();
        for px in frame.tight_bytes().chunks_exact(4) {
            assert_eq!(&px[..3], &[255, 255, 255]);
        }
    }

    #[test]
    fn reader_source_stops_at_end() {
        let mut source = Y4mSource::from_reader(Cursor::new(clip(2, 16))).unwrap();
        source.refresh().unwrap();
        source.refresh().unwrap();
        assert!(matches!(source.refresh(), Err(PipelineError::SourceEnded)));
        assert_eq!(source.frames(), 2);
    }

    #[test]
    fn garbage_header_is_rejected() {
        let err = Y4mSource::from_reader(Cursor::new(b"not a clip".to_vec()));
        assert!(matches!(err, Err(PipelineError::Capture(_))));
    }
}
