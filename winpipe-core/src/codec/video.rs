//! `yuvz` glue between the picture traits and the stateful codec.
//!
//! On the encoder side the colorspace converter and the video encoder
//! are kept in lockstep: whenever a quality change moves the encoder to
//! another chroma sampling, the converter is rebuilt to produce it.

use tracing::debug;

use crate::codec::{
    DrawPayload, EncodedPicture, Encoding, EncoderSettings, PictureDecoder, PictureEncoder,
    VideoDecoder, VideoEncoder, profile_for_quality,
};
use crate::csc::ColorspaceConverter;
use crate::error::PipelineError;
use crate::pixel::{PixelBuffer, PixelFormat};
use crate::wire::{Options, Value};

// ── Encoder side ─────────────────────────────────────────────────

pub struct VideoPipeline {
    width: u32,
    height: u32,
    src_format: PixelFormat,
    speed: u8,
    csc: Option<ColorspaceConverter>,
    encoder: VideoEncoder,
}

impl VideoPipeline {
    pub fn new(
        width: u32,
        height: u32,
        src_format: PixelFormat,
        settings: &EncoderSettings,
    ) -> Result<Self, PipelineError> {
        let sampling = profile_for_quality(settings.quality).sampling;
        let mut encoder =
            VideoEncoder::init_context(width, height, sampling, settings.quality, settings.speed)?;
        encoder.set_keyframe_interval(settings.keyframe_interval);
        let mut pipeline = Self {
            width,
            height,
            src_format,
            speed: settings.speed,
            csc: None,
            encoder,
        };
        pipeline.ensure_csc()?;
        Ok(pipeline)
    }

    /// (Re)build the converter when it no longer outputs what the encoder takes.
    fn ensure_csc(&mut self) -> Result<(), PipelineError> {
        let wanted = self.encoder.input_format();
        if self.src_format == wanted {
            self.csc = None;
            return Ok(());
        }
        if self.csc.as_ref().is_some_and(|c| c.dst_format() == wanted) {
            return Ok(());
        }
        debug!(src = %self.src_format, dst = %wanted, "colorspace stage rebuilt");
        self.csc = Some(ColorspaceConverter::init(
            self.width,
            self.height,
            self.src_format,
            self.width,
            self.height,
            wanted,
            self.speed,
        )?);
        Ok(())
    }

    pub fn encoder(&self) -> &VideoEncoder {
        &self.encoder
    }

    /// Format the colorspace stage currently produces.
    pub fn csc_output(&self) -> PixelFormat {
        self.csc
            .as_ref()
            .map_or(self.src_format, ColorspaceConverter::dst_format)
    }
}

impl PictureEncoder for VideoPipeline {
    fn encoding(&self) -> Encoding {
        Encoding::Yuvz
    }

    fn encode(&mut self, image: &PixelBuffer) -> Result<EncodedPicture, PipelineError> {
        if image.format() != self.src_format {
            return Err(PipelineError::InvalidBuffer(format!(
                "video pipeline takes {}, got {}",
                self.src_format,
                image.format()
            )));
        }
        self.ensure_csc()?;
        let (data, is_keyframe) = match self.csc.as_mut() {
            Some(csc) => {
                let yuv = csc.convert(image)?;
                self.encoder.compress(&yuv, None)?
            }
            None => self.encoder.compress(image, None)?,
        };

        let mut options = Options::new();
        options.insert("csc".into(), Value::from(self.encoder.input_format().name()));
        options.insert("type".into(), Value::from(if is_keyframe { "IDR" } else { "P" }));
        options.insert("quality".into(), Value::Int(self.encoder.quality().into()));
        options.insert("speed".into(), Value::Int(self.encoder.speed().into()));

        Ok(EncodedPicture {
            encoding: Encoding::Yuvz,
            data,
            width: self.width,
            height: self.height,
            rowstride: 0,
            options,
            is_keyframe,
        })
    }

    fn set_quality(&mut self, quality: u8) {
        if self.encoder.set_quality(quality) {
            // The converter follows on the next frame.
            debug!(quality, sampling = %self.encoder.input_format(), "video profile changed");
        }
    }

    fn set_speed(&mut self, speed: u8) {
        self.speed = speed.min(100);
        self.encoder.set_speed(speed);
    }

    fn request_keyframe(&mut self) {
        self.encoder.request_keyframe();
    }
}

// ── Decoder side ─────────────────────────────────────────────────

/// Creates its [`VideoDecoder`] lazily and replaces it when the stream
/// changes size.
pub struct VideoPictureDecoder {
    decoder: Option<VideoDecoder>,
}

impl VideoPictureDecoder {
    pub fn new() -> Self {
        Self { decoder: None }
    }

    pub fn decoder(&self) -> Option<&VideoDecoder> {
        self.decoder.as_ref()
    }
}

impl Default for VideoPictureDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PictureDecoder for VideoPictureDecoder {
    fn encoding(&self) -> Encoding {
        Encoding::Yuvz
    }

    fn decode(&mut self, payload: &DrawPayload<'_>) -> Result<PixelBuffer, PipelineError> {
        let size = (payload.rect.width, payload.rect.height);
        let colorspace = payload
            .options
            .get("csc")
            .and_then(Value::as_str)
            .and_then(PixelFormat::from_name)
            .filter(|f| f.is_planar())
            .unwrap_or(PixelFormat::Yuv420p);

        let stale = self.decoder.as_ref().is_none_or(|d| d.size() != size);
        if stale {
            if let Some(mut old) = self.decoder.take() {
                old.close();
            }
            let mut decoder = VideoDecoder::new();
            decoder.init_context(size.0, size.1, colorspace)?;
            self.decoder = Some(decoder);
        }
        let decoder = self.decoder.as_mut().ok_or(PipelineError::InvalidState {
            operation: "decode",
            state: "uninitialized",
        })?;
        decoder.decompress(payload.data)
    }
}

// ── Tests ────────────────────────────────────────────────────────
