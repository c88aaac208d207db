//! `rgb24` and `rgb32`: packed pixels sent as they are.

use tracing::trace;

use crate::codec::{DrawPayload, EncodedPicture, Encoding, EncoderSettings, PictureDecoder, PictureEncoder, zlib};
use crate::csc;
use crate::error::PipelineError;
use crate::pixel::{PixelBuffer, PixelFormat, Rect};
use crate::wire::Value;

const RGB24_FORMATS: [PixelFormat; 2] = [PixelFormat::Rgb, PixelFormat::Bgr];
const RGB32_FORMATS: [PixelFormat; 6] = [
    PixelFormat::Bgrx,
    PixelFormat::Rgbx,
    PixelFormat::Bgra,
    PixelFormat::Rgba,
    PixelFormat::Xrgb,
    PixelFormat::Argb,
];

fn layouts(encoding: Encoding) -> &'static [PixelFormat] {
    if encoding == Encoding::Rgb24 {
        &RGB24_FORMATS
    } else {
        &RGB32_FORMATS
    }
}

// ── Encoder ──────────────────────────────────────────────────────

pub struct RawEncoder {
    encoding: Encoding,
    zlib: u8,
    accepted: Vec<PixelFormat>,
}

impl RawEncoder {
    pub fn new(encoding: Encoding, settings: &EncoderSettings) -> Self {
        let accepted = layouts(encoding)
            .iter()
            .copied()
            .filter(|f| settings.rgb_formats.is_empty() || settings.rgb_formats.contains(f))
            .collect();
        Self {
            encoding,
            zlib: settings.zlib,
            accepted,
        }
    }

    /// The layout to send `src` in: itself when acceptable, otherwise the
    /// preferred conversion target.
    fn target(&self, src: PixelFormat) -> Result<PixelFormat, PipelineError> {
        if self.accepted.contains(&src) {
            return Ok(src);
        }
        csc::outputs_for(src, &self.accepted)
            .into_iter()
            .next()
            .ok_or_else(|| {
                PipelineError::UnsupportedFormat(format!(
                    "{} cannot carry {src} for this client",
                    self.encoding
                ))
            })
    }
}

impl PictureEncoder for RawEncoder {
    fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn encode(&mut self, image: &PixelBuffer) -> Result<EncodedPicture, PipelineError> {
        let format = self.target(image.format())?;
        let pixels = if format == image.format() {
            image.tight_bytes()
        } else {
            let transform = csc::transform_for(image.format(), format).ok_or_else(|| {
                PipelineError::UnsupportedFormat(format!("no conversion {} -> {format}", image.format()))
            })?;
            let mut converted = PixelBuffer::allocate(Rect::sized(image.width(), image.height()), format);
            transform(image, &mut converted)?;
            converted.tight_bytes()
        };

        let rowstride = image.width() * format.bytes_per_pixel() as u32;
        let mut options = crate::wire::Options::new();
        options.insert("rgb_format".into(), Value::from(format.name()));

        let data = if self.zlib > 0 {
            let packed = zlib::compress(&pixels, self.zlib)
                .map_err(|e| PipelineError::EncodeFailed(format!("zlib: {e}")))?;
            options.insert("zlib".into(), Value::Int(self.zlib.into()));
            packed
        } else {
            pixels
        };
        trace!(encoding = %self.encoding, %format, bytes = data.len(), "raw region encoded");

        Ok(EncodedPicture {
            encoding: self.encoding,
            data,
            width: image.width(),
            height: image.height(),
            rowstride,
            options,
            is_keyframe: true,
        })
    }
}

// ── Decoder ──────────────────────────────────────────────────────

pub struct RawDecoder {
    encoding: Encoding,
}

impl RawDecoder {
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }
}

impl PictureDecoder for RawDecoder {
    fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn decode(&mut self, payload: &DrawPayload<'_>) -> Result<PixelBuffer, PipelineError> {
        let format = match payload.options.get("rgb_format").and_then(Value::as_str) {
            Some(name) => PixelFormat::from_name(name).ok_or_else(|| {
                PipelineError::UnsupportedFormat(format!("unknown rgb_format {name:?}"))
            })?,
            None => layouts(self.encoding)[0],
        };
        if !layouts(self.encoding).contains(&format) {
            return Err(PipelineError::UnsupportedFormat(format!(
                "{} cannot carry {format}",
                self.encoding
            )));
        }
        let rect = Rect::sized(payload.rect.width, payload.rect.height);
        let stride = match payload.rowstride {
            0 => format.min_stride(0, rect.width),
            n => n as usize,
        };
        PixelBuffer::packed(rect, format, payload.data.to_vec(), stride)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Options;

    fn bgrx(w: u32, h: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::allocate(Rect::sized(w, h), PixelFormat::Bgrx);
        for (i, b) in buf.plane_mut(0).unwrap().iter_mut().enumerate() {
            *b = i as u8;
        }
        buf
    }

    fn decode(encoding: Encoding, picture: &EncodedPicture) -> Result<PixelBuffer, PipelineError> {
        let data = crate::codec::inflate_payload(&picture.data, &picture.options, 1 << 20)?;
        RawDecoder::new(encoding).decode(&DrawPayload {
            data: &data,
            rect: Rect::sized(picture.width, picture.height),
            rowstride: picture.rowstride,
            options: &picture.options,
        })
    }

    #[test]
    fn rgb32_passes_native_layout_through() {
        let image = bgrx(3, 2);
        let mut enc = RawEncoder::new(Encoding::Rgb32, &EncoderSettings::default());
        let picture = enc.encode(&image).unwrap();
        assert_eq!(picture.rowstride, 12);
        assert_eq!(picture.options["rgb_format"].as_str(), Some("BGRX"));
        let out = decode(Encoding::Rgb32, &picture).unwrap();
        assert_eq!(out.tight_bytes(), image.tight_bytes());
    }

    #[test]
    fn rgb24_swizzles_to_accepted_layout() {
        let image = bgrx(2, 1);
        let settings = EncoderSettings {
            rgb_formats: vec![PixelFormat::Rgb],
            zlib: 3,
            ..EncoderSettings::default()
        };
        let mut enc = RawEncoder::new(Encoding::Rgb24, &settings);
        let picture = enc.encode(&image).unwrap();
        assert_eq!(picture.options["rgb_format"].as_str(), Some("RGB"));
        assert_eq!(picture.options["zlib"].as_int(), Some(3));
        let out = decode(Encoding::Rgb24, &picture).unwrap();
        assert_eq!(out.format(), PixelFormat::Rgb);
        assert_eq!(out.tight_bytes(), vec![2, 1, 0, 6, 5, 4]);
    }

    #[test]
    fn decoder_rejects_mismatched_layout_and_short_data() {
        let mut dec = RawDecoder::new(Encoding::Rgb24);
        let options = Options::from([("rgb_format".to_owned(), Value::from("BGRX"))]);
        let payload = DrawPayload {
            data: &[0; 16],
            rect: Rect::sized(2, 2),
            rowstride: 8,
            options: &options,
        };
        assert!(matches!(dec.decode(&payload), Err(PipelineError::UnsupportedFormat(_))));

        let options = Options::new();
        let payload = DrawPayload {
            data: &[0; 5],
            rect: Rect::sized(2, 1),
            rowstride: 0,
            options: &options,
        };
        assert!(matches!(dec.decode(&payload), Err(PipelineError::InvalidBuffer(_))));
    }
}
