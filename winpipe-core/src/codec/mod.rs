//! Picture codecs.
//!
//! Every wire encoding is reached through the [`PictureEncoder`] and
//! [`PictureDecoder`] traits:
//!
//! | encoding        | module    | notes                                    |
//! |-----------------|-----------|------------------------------------------|
//! | `rgb24`/`rgb32` | [`raw`]   | packed pixels, `rgb_format` option       |
//! | `png`           | [`png`]   | lossless, via the `image` crate          |
//! | `yuvz`          | [`video`] | colorspace stage + stateful video codec  |
//! | `h264`/`vp8`    | none      | negotiable names, no built-in library    |
//!
//! Any encoding may additionally carry the `zlib` option, in which case
//! the payload is inflated by [`inflate_payload`] before it reaches the
//! decoder.

pub mod decoder;
pub mod encoder;
pub mod png;
pub mod profile;
pub mod raw;
pub mod registry;
pub mod video;
pub mod yuvz;
pub mod zlib;

use std::borrow::Cow;
use std::fmt;

use tracing::debug;

use crate::error::PipelineError;
use crate::pixel::{PixelBuffer, PixelFormat, Rect};
use crate::wire::{Options, Value};

// ── Re-exports ───────────────────────────────────────────────────

pub use decoder::{DecoderState, VideoDecoder};
pub use encoder::VideoEncoder;
pub use profile::{EncodingProfile, Profile, profile_for_quality};
pub use registry::{CONTEXTS, ContextHandle, ContextKind, HandleRegistry};
pub use video::{VideoPictureDecoder, VideoPipeline};

// ── Encoding ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Rgb24,
    Rgb32,
    Png,
    Yuvz,
    H264,
    Vp8,
}

impl Encoding {
    pub const ALL: [Encoding; 6] = [
        Encoding::Yuvz,
        Encoding::Png,
        Encoding::Rgb24,
        Encoding::Rgb32,
        Encoding::H264,
        Encoding::Vp8,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Encoding::Rgb24 => "rgb24",
            Encoding::Rgb32 => "rgb32",
            Encoding::Png => "png",
            Encoding::Yuvz => "yuvz",
            Encoding::H264 => "h264",
            Encoding::Vp8 => "vp8",
        }
    }

    /// Parse a wire name. Deprecated names map to their replacements.
    pub fn parse(name: &str) -> Result<Self, PipelineError> {
        let encoding = match name {
            "rgb24" => Encoding::Rgb24,
            "rgb32" => Encoding::Rgb32,
            "png" => Encoding::Png,
            "yuvz" => Encoding::Yuvz,
            "h264" => Encoding::H264,
            "vp8" => Encoding::Vp8,
            "x264" | "vpx" => {
                let encoding = if name == "x264" {
                    Encoding::H264
                } else {
                    Encoding::Vp8
                };
                debug!(deprecated = name, replacement = encoding.name(), "encoding name remapped");
                encoding
            }
            other => {
                return Err(PipelineError::UnsupportedFormat(format!(
                    "unknown encoding {other:?}"
                )));
            }
        };
        Ok(encoding)
    }

    /// Stateful inter-frame encodings. These always send full frames.
    pub const fn is_video(self) -> bool {
        matches!(self, Encoding::Yuvz | Encoding::H264 | Encoding::Vp8)
    }

    pub const fn is_raw(self) -> bool {
        matches!(self, Encoding::Rgb24 | Encoding::Rgb32)
    }

    pub const fn has_builtin_codec(self) -> bool {
        !matches!(self, Encoding::H264 | Encoding::Vp8)
    }

    /// Encodings this build can both encode and decode, preferred first.
    pub fn builtin() -> Vec<Encoding> {
        Self::ALL.into_iter().filter(|e| e.has_builtin_codec()).collect()
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Encoder side ─────────────────────────────────────────────────

/// One encoded region, ready to become a `draw` packet.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPicture {
    pub encoding: Encoding,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub rowstride: u32,
    pub options: Options,
    pub is_keyframe: bool,
}

/// Knobs shared by all encoders. Encoders ignore what does not apply.
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub quality: u8,
    pub speed: u8,
    /// zlib level for raw pixel data, 0 for none.
    pub zlib: u8,
    /// Packed layouts the client accepts for raw encodings; empty means any.
    pub rgb_formats: Vec<PixelFormat>,
    pub keyframe_interval: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            quality: 80,
            speed: 50,
            zlib: 0,
            rgb_formats: Vec::new(),
            keyframe_interval: encoder::DEFAULT_KEYFRAME_INTERVAL,
        }
    }
}

pub trait PictureEncoder: Send {
    fn encoding(&self) -> Encoding;

    fn encode(&mut self, image: &PixelBuffer) -> Result<EncodedPicture, PipelineError>;

    fn set_quality(&mut self, _quality: u8) {}

    fn set_speed(&mut self, _speed: u8) {}

    fn request_keyframe(&mut self) {}
}

/// Build an encoder for frames of `width × height` in `src_format`.
pub fn new_encoder(
    encoding: Encoding,
    settings: &EncoderSettings,
    width: u32,
    height: u32,
    src_format: PixelFormat,
) -> Result<Box<dyn PictureEncoder>, PipelineError> {
    let encoder: Box<dyn PictureEncoder> = match encoding {
        Encoding::Rgb24 | Encoding::Rgb32 => Box::new(raw::RawEncoder::new(encoding, settings)),
        Encoding::Png => Box::new(png::PngPictureEncoder::new(settings)),
        Encoding::Yuvz => Box::new(VideoPipeline::new(width, height, src_format, settings)?),
        Encoding::H264 | Encoding::Vp8 => return Err(no_library(encoding)),
    };
    Ok(encoder)
}

// ── Decoder side ─────────────────────────────────────────────────

/// The parts of a `draw` a decoder needs.
#[derive(Debug, Clone, Copy)]
pub struct DrawPayload<'a> {
    pub data: &'a [u8],
    pub rect: Rect,
    pub rowstride: u32,
    pub options: &'a Options,
}

pub trait PictureDecoder: Send {
    fn encoding(&self) -> Encoding;

    fn decode(&mut self, payload: &DrawPayload<'_>) -> Result<PixelBuffer, PipelineError>;
}

pub fn new_decoder(encoding: Encoding) -> Result<Box<dyn PictureDecoder>, PipelineError> {
    let decoder: Box<dyn PictureDecoder> = match encoding {
        Encoding::Rgb24 | Encoding::Rgb32 => Box::new(raw::RawDecoder::new(encoding)),
        Encoding::Png => Box::new(png::PngPictureDecoder),
        Encoding::Yuvz => Box::new(VideoPictureDecoder::new()),
        Encoding::H264 | Encoding::Vp8 => return Err(no_library(encoding)),
    };
    Ok(decoder)
}

/// Undo the `zlib` option, if present. `limit` bounds the inflated size.
pub fn inflate_payload<'a>(
    data: &'a [u8],
    options: &Options,
    limit: usize,
) -> Result<Cow<'a, [u8]>, PipelineError> {
    let level = options.get("zlib").and_then(Value::as_int).unwrap_or(0);
    if level <= 0 {
        return Ok(Cow::Borrowed(data));
    }
    zlib::decompress(data, limit)
        .map(Cow::Owned)
        .map_err(|e| PipelineError::DecodeFailed(format!("zlib: {e}")))
}

fn no_library(encoding: Encoding) -> PipelineError {
    PipelineError::UnsupportedFormat(format!("no codec library for {encoding}"))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_remaps_deprecated_names() {
        assert_eq!(Encoding::parse("x264").unwrap(), Encoding::H264);
        assert_eq!(Encoding::parse("vpx").unwrap(), Encoding::Vp8);
        assert_eq!(Encoding::parse("png").unwrap(), Encoding::Png);
        assert!(matches!(
            Encoding::parse("webp"),
            Err(PipelineError::UnsupportedFormat(_))
        ));
        for e in Encoding::ALL {
            assert_eq!(Encoding::parse(e.name()).unwrap(), e);
        }
    }

    #[test]
    fn recognised_names_without_library() {
        assert!(!Encoding::H264.has_builtin_codec());
        assert!(Encoding::H264.is_video());
        assert!(matches!(new_decoder(Encoding::Vp8), Err(PipelineError::UnsupportedFormat(_))));
        let settings = EncoderSettings::default();
        assert!(new_encoder(Encoding::H264, &settings, 8, 8, PixelFormat::Bgrx).is_err());
        assert_eq!(Encoding::builtin(), vec![
            Encoding::Yuvz,
            Encoding::Png,
            Encoding::Rgb24,
            Encoding::Rgb32,
        ]);
    }

    #[test]
    fn zlib_option_is_inflated_first() {
        let raw = vec![42u8; 300];
        let packed = zlib::compress(&raw, 5).unwrap();
        let options = Options::from([("zlib".to_owned(), Value::Int(5))]);
        assert_eq!(inflate_payload(&packed, &options, 1000).unwrap().as_ref(), &raw[..]);
        let plain = Options::new();
        assert!(matches!(inflate_payload(&raw, &plain, 10).unwrap(), Cow::Borrowed(_)));
        assert!(inflate_payload(&raw, &options, 1000).is_err());
    }
}
