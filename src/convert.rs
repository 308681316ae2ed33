//! Raw frame to JPEG conversion.
//!
//! Pure: nothing here touches the sensor or storage. Native JPEG frames pass
//! through as a borrowed view, everything else is encoded into an owned
//! buffer.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::error::ConversionError;
use crate::sensor::{FrameFormat, FrameRef};
use crate::settings::{ByteOrder, DeviceSettings, Quality};

pub const ENCODER_QUALITY_MIN: u8 = 10;
pub const ENCODER_QUALITY_MAX: u8 = 100;
/// Encoder quality ceiling for packed color at the top two resolutions.
pub const HIGH_RES_QUALITY_CAP: u8 = 80;

/// Map acquisition quality (0..=63, lower is better) onto the encoder scale
/// (10..=100, higher is better).
pub fn remap_quality(quality: Quality) -> u8 {
    let q = quality.value() as i32;
    let span_in = Quality::MAX as i32 - Quality::MIN as i32;
    let span_out = ENCODER_QUALITY_MAX as i32 - ENCODER_QUALITY_MIN as i32;
    let mapped = (q - Quality::MIN as i32) * span_out / span_in + ENCODER_QUALITY_MIN as i32;
    mapped.clamp(ENCODER_QUALITY_MIN as i32, ENCODER_QUALITY_MAX as i32) as u8
}

/// A JPEG ready for storage.
#[derive(Debug)]
pub enum EncodedImage<'a> {
    /// The sensor's own buffer. Freed by releasing the frame.
    Borrowed(&'a [u8]),
    Owned(Vec<u8>),
}

impl EncodedImage<'_> {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            EncodedImage::Borrowed(bytes) => bytes,
            EncodedImage::Owned(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self, EncodedImage::Borrowed(_))
    }
}

pub fn convert<'a>(
    frame: FrameRef<'a>,
    settings: &DeviceSettings,
) -> Result<EncodedImage<'a>, ConversionError> {
    match frame.format {
        FrameFormat::Jpeg => {
            if frame.data.is_empty() {
                return Err(ConversionError::Truncated {
                    expected: 1,
                    actual: 0,
                });
            }
            Ok(EncodedImage::Borrowed(frame.data))
        }
        FrameFormat::Grayscale => {
            let quality = remap_quality(settings.quality());
            encode_grayscale(frame, quality).map(EncodedImage::Owned)
        }
        FrameFormat::Rgb565 => {
            let mut quality = remap_quality(settings.quality());
            if settings.resolution().is_high() {
                quality = quality.min(HIGH_RES_QUALITY_CAP);
            }
            encode_rgb565(frame, settings.byte_order(), quality).map(EncodedImage::Owned)
        }
        other => Err(ConversionError::UnsupportedFormat(other)),
    }
}

fn pixel_count(frame: &FrameRef<'_>) -> usize {
    frame.width as usize * frame.height as usize
}

fn check_len(frame: &FrameRef<'_>, expected: usize) -> Result<(), ConversionError> {
    if expected == 0 || frame.data.len() < expected {
        return Err(ConversionError::Truncated {
            expected,
            actual: frame.data.len(),
        });
    }
    Ok(())
}

fn encode_grayscale(frame: FrameRef<'_>, quality: u8) -> Result<Vec<u8>, ConversionError> {
    let pixels = pixel_count(&frame);
    check_len(&frame, pixels)?;
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode(
        &frame.data[..pixels],
        frame.width,
        frame.height,
        ExtendedColorType::L8,
    )?;
    Ok(out)
}

fn encode_rgb565(
    frame: FrameRef<'_>,
    byte_order: ByteOrder,
    quality: u8,
) -> Result<Vec<u8>, ConversionError> {
    let samples = pixel_count(&frame) * 2;
    check_len(&frame, samples)?;
    let source = &frame.data[..samples];

    // The swap copy lives only for this call; the sensor buffer is never touched.
    let swapped;
    let little_endian: &[u8] = if byte_order.is_big() {
        swapped = swap_pairs(source)?;
        &swapped
    } else {
        source
    };

    let rgb = expand_rgb565(little_endian)?;
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode(
        &rgb,
        frame.width,
        frame.height,
        ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}

fn swap_pairs(source: &[u8]) -> Result<Vec<u8>, ConversionError> {
    let mut swapped = Vec::new();
    swapped.try_reserve_exact(source.len())?;
    for pair in source.chunks_exact(2) {
        swapped.push(pair[1]);
        swapped.push(pair[0]);
    }
    Ok(swapped)
}

fn expand_rgb565(samples: &[u8]) -> Result<Vec<u8>, ConversionError> {
    let mut rgb = Vec::new();
    rgb.try_reserve_exact(samples.len() / 2 * 3)?;
    for pair in samples.chunks_exact(2) {
        let v = u16::from_le_bytes([pair[0], pair[1]]);
        let r = ((v >> 11) & 0x1f) as u8;
        let g = ((v >> 5) & 0x3f) as u8;
        let b = (v & 0x1f) as u8;
        rgb.push((r << 3) | (r >> 2));
        rgb.push((g << 2) | (g >> 4));
        rgb.push((b << 3) | (b >> 2));
    }
    Ok(rgb)
}
