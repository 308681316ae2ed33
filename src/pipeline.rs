//! One shot: acquire, convert, persist.
//!
//! Every trigger path (console, HTTP, burst) goes through `capture`. The raw
//! frame is a `RawFrame` guard, so it is released exactly once on every
//! branch. Owned encodes release the frame before touching storage so the
//! sensor buffer is not held across the write.

use serde::Serialize;
use std::time::Duration;

use crate::convert::{self, EncodedImage};
use crate::error::CaptureError;
use crate::filestore::{FileStore, IMAGE_EXTENSION};
use crate::sensor::{FrameFormat, FrameSource};
use crate::settings::{DeviceSettings, PixelLayout};

/// Sensor settle time before a high-resolution packed-color grab.
pub const HIGH_RES_SETTLE: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CaptureReport {
    pub identity: u32,
    pub filename: String,
    pub bytes: usize,
    pub format: FrameFormat,
}

pub fn capture(
    source: &mut FrameSource,
    store: &mut FileStore,
    settings: &DeviceSettings,
) -> Result<CaptureReport, CaptureError> {
    if settings.layout() == PixelLayout::Rgb565 && settings.resolution().is_high() {
        std::thread::sleep(HIGH_RES_SETTLE);
    }

    let frame = source.acquire().ok_or(CaptureError::SensorUnavailable)?;
    let format = frame.format();
    log::debug!(
        "frame acquired: {}x{} {:?}, {} bytes",
        frame.width(),
        frame.height(),
        format,
        frame.len()
    );

    let encoded = convert::convert(frame.view(), settings)?;
    let (identity, bytes) = match encoded {
        EncodedImage::Owned(jpeg) => {
            drop(frame);
            (persist(store, &jpeg)?, jpeg.len())
        }
        EncodedImage::Borrowed(jpeg) => (persist(store, jpeg)?, jpeg.len()),
    };

    let filename = format!("{identity}{IMAGE_EXTENSION}");
    log::info!("saved /{filename} ({bytes} bytes)");
    Ok(CaptureReport {
        identity,
        filename,
        bytes,
        format,
    })
}

fn persist(store: &mut FileStore, jpeg: &[u8]) -> Result<u32, CaptureError> {
    let identity = store.next_identity(IMAGE_EXTENSION)?;
    store.write(identity, jpeg)?;
    Ok(identity)
}
