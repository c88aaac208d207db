//! `png`: lossless still images through the `image` crate.

use std::io::Cursor;

use image::codecs::png::{CompressionType, FilterType, PngDecoder, PngEncoder};
use image::{ColorType, ExtendedColorType, ImageDecoder, ImageEncoder};

use crate::codec::{DrawPayload, EncodedPicture, Encoding, EncoderSettings, PictureDecoder, PictureEncoder};
use crate::csc;
use crate::error::PipelineError;
use crate::pixel::{PixelBuffer, PixelFormat, Rect};
use crate::wire::Options;

/// Speed above which PNG favours fast compression.
const FAST_SPEED: u8 = 50;

pub struct PngPictureEncoder {
    speed: u8,
}

impl PngPictureEncoder {
    pub fn new(settings: &EncoderSettings) -> Self {
        Self {
            speed: settings.speed,
        }
    }
}

impl PictureEncoder for PngPictureEncoder {
    fn encoding(&self) -> Encoding {
        Encoding::Png
    }

    fn encode(&mut self, image: &PixelBuffer) -> Result<EncodedPicture, PipelineError> {
        let (format, color) = if image.format().has_alpha() {
            (PixelFormat::Rgba, ExtendedColorType::Rgba8)
        } else {
            (PixelFormat::Rgb, ExtendedColorType::Rgb8)
        };
        let pixels = if image.format() == format {
            image.tight_bytes()
        } else {
            let transform = csc::transform_for(image.format(), format).ok_or_else(|| {
                PipelineError::UnsupportedFormat(format!("png cannot take {}", image.format()))
            })?;
            let mut converted =
                PixelBuffer::allocate(Rect::sized(image.width(), image.height()), format);
            transform(image, &mut converted)?;
            converted.tight_bytes()
        };

        let compression = if self.speed > FAST_SPEED {
            CompressionType::Fast
        } else {
            CompressionType::Best
        };
        let mut data = Vec::new();
        PngEncoder::new_with_quality(&mut data, compression, FilterType::Adaptive)
            .write_image(&pixels, image.width(), image.height(), color)
            .map_err(|e| PipelineError::EncodeFailed(format!("png: {e}")))?;

        Ok(EncodedPicture {
            encoding: Encoding::Png,
            data,
            width: image.width(),
            height: image.height(),
            rowstride: 0,
            options: Options::new(),
            is_keyframe: true,
        })
    }

    fn set_speed(&mut self, speed: u8) {
        self.speed = speed;
    }
}

pub struct PngPictureDecoder;

impl PictureDecoder for PngPictureDecoder {
    fn encoding(&self) -> Encoding {
        Encoding::Png
    }

    fn decode(&mut self, payload: &DrawPayload<'_>) -> Result<PixelBuffer, PipelineError> {
        let decoder = PngDecoder::new(Cursor::new(payload.data))
            .map_err(|e| PipelineError::DecodeFailed(format!("png: {e}")))?;
        let (width, height) = decoder.dimensions();
        if (width, height) != (payload.rect.width, payload.rect.height) {
            return Err(PipelineError::DecodeFailed(format!(
                "png is {width}x{height}, draw is {}x{}",
                payload.rect.width, payload.rect.height
            )));
        }
        let format = match decoder.color_type() {
            ColorType::Rgb8 => PixelFormat::Rgb,
            ColorType::Rgba8 => PixelFormat::Rgba,
            other => {
                return Err(PipelineError::UnsupportedFormat(format!("png color type {other:?}")));
            }
        };
        let mut pixels = vec![0u8; decoder.total_bytes() as usize];
        decoder
            .read_image(&mut pixels)
            .map_err(|e| PipelineError::DecodeFailed(format!("png: {e}")))?;
        let stride = format.min_stride(0, width);
        PixelBuffer::packed(Rect::sized(width, height), format, pixels, stride)
    }
}
