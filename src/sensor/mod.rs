//! Frame acquisition.
//!
//! `FrameSource` owns the sensor driver and the frame lifecycle:
//! - picks a working-memory strategy (`SensorPlan`) from the settings and the
//!   memory the driver reports
//! - initializes / deinitializes the driver
//! - hands out `RawFrame`s
//!
//! A `RawFrame` mutably borrows its `FrameSource` and gives its buffer back to
//! the driver when dropped. There is no other release path, so every acquired
//! buffer is released exactly once, and the source cannot be reinitialized
//! while a frame is outstanding.

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::error::SensorError;
use crate::settings::{DeviceSettings, PixelLayout, Quality, Resolution};

pub mod synthetic;

pub use synthetic::{SyntheticConfig, SyntheticSensor};

/// Native-encoding quality ceiling whenever frames live in aux memory.
pub const AUX_MEMORY_JPEG_QUALITY: u8 = 10;

/// Resolution forced for native-encoded capture without aux memory.
pub const INTERNAL_MEMORY_JPEG_RESOLUTION: Resolution = Resolution::Svga;

/// Pixel layout tag carried by a sensor buffer.
///
/// The driver can report layouts the converter does not handle; those fail
/// conversion with `UnsupportedFormat`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameFormat {
    Jpeg,
    Grayscale,
    Rgb565,
    Yuv422,
    Rgb888,
    #[default]
    Raw,
}

impl From<PixelLayout> for FrameFormat {
    fn from(layout: PixelLayout) -> Self {
        match layout {
            PixelLayout::Jpeg => FrameFormat::Jpeg,
            PixelLayout::Grayscale => FrameFormat::Grayscale,
            PixelLayout::Rgb565 => FrameFormat::Rgb565,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrabMode {
    /// Always hand out the newest completed frame.
    Latest,
    /// Block until a frame is produced.
    WhenEmpty,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferLocation {
    /// High-capacity auxiliary memory (PSRAM on the reference board).
    Aux,
    Internal,
}

/// Driver configuration derived from `DeviceSettings` at init time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SensorPlan {
    pub layout: PixelLayout,
    pub resolution: Resolution,
    pub jpeg_quality: Quality,
    pub frame_buffers: u8,
    pub grab_mode: GrabMode,
    pub location: BufferLocation,
}

impl SensorPlan {
    pub fn for_settings(settings: &DeviceSettings, aux_memory: bool) -> Self {
        let layout = settings.layout();
        if aux_memory {
            let jpeg_quality = if layout == PixelLayout::Jpeg {
                settings.quality().capped(AUX_MEMORY_JPEG_QUALITY)
            } else {
                settings.quality()
            };
            Self {
                layout,
                resolution: settings.resolution(),
                jpeg_quality,
                frame_buffers: 2,
                grab_mode: GrabMode::Latest,
                location: BufferLocation::Aux,
            }
        } else {
            let resolution = if layout == PixelLayout::Jpeg {
                INTERNAL_MEMORY_JPEG_RESOLUTION
            } else {
                settings.resolution()
            };
            Self {
                layout,
                resolution,
                jpeg_quality: settings.quality(),
                frame_buffers: 1,
                grab_mode: GrabMode::WhenEmpty,
                location: BufferLocation::Internal,
            }
        }
    }
}

/// A frame buffer as handed out by the driver.
#[derive(Debug, Default)]
pub struct SensorBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub in_aux_memory: bool,
}

/// Vendor camera driver seam: register init and the raw acquire/release pair.
pub trait SensorDriver {
    /// Whether high-capacity auxiliary memory is available for frame buffers.
    fn has_aux_memory(&self) -> bool;

    fn init(&mut self, plan: &SensorPlan) -> Result<(), SensorError>;

    fn deinit(&mut self);

    /// `None` on transient starvation. Never blocks indefinitely.
    fn grab(&mut self) -> Option<SensorBuffer>;

    fn give_back(&mut self, buffer: SensorBuffer);
}

/// Lifecycle counters, for boot diagnostics and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub inits: u64,
    pub deinits: u64,
    pub acquired: u64,
    pub released: u64,
    pub starved: u64,
}

pub struct FrameSource {
    driver: Box<dyn SensorDriver>,
    plan: Option<SensorPlan>,
    reinit_delay: Duration,
    stats: SourceStats,
}

impl FrameSource {
    pub fn new(driver: Box<dyn SensorDriver>, reinit_delay: Duration) -> Self {
        Self {
            driver,
            plan: None,
            reinit_delay,
            stats: SourceStats::default(),
        }
    }

    pub fn initialize(&mut self, settings: &DeviceSettings) -> Result<SensorPlan, SensorError> {
        let plan = SensorPlan::for_settings(settings, self.driver.has_aux_memory());
        log::info!(
            "initializing camera: {:?} {} quality={} buffers={} grab={:?} memory={:?}",
            plan.layout,
            plan.resolution,
            plan.jpeg_quality,
            plan.frame_buffers,
            plan.grab_mode,
            plan.location
        );
        self.driver.init(&plan)?;
        self.stats.inits += 1;
        self.plan = Some(plan);
        log::info!("camera initialized");
        Ok(plan)
    }

    pub fn deinitialize(&mut self) {
        if self.plan.take().is_some() {
            self.driver.deinit();
            self.stats.deinits += 1;
        }
    }

    /// Deinit, settle, init. Required after any resolution or layout change.
    pub fn reinitialize(&mut self, settings: &DeviceSettings) -> Result<SensorPlan, SensorError> {
        self.deinitialize();
        if !self.reinit_delay.is_zero() {
            std::thread::sleep(self.reinit_delay);
        }
        self.initialize(settings)
    }

    pub fn is_ready(&self) -> bool {
        self.plan.is_some()
    }

    pub fn plan(&self) -> Option<&SensorPlan> {
        self.plan.as_ref()
    }

    pub fn stats(&self) -> SourceStats {
        self.stats
    }

    /// Acquire one frame. `None` when the sensor is not initialized or starved.
    pub fn acquire(&mut self) -> Option<RawFrame<'_>> {
        if self.plan.is_none() {
            log::warn!("frame requested from uninitialized camera");
            return None;
        }
        match self.driver.grab() {
            Some(buffer) => {
                self.stats.acquired += 1;
                Some(RawFrame {
                    source: self,
                    buffer,
                })
            }
            None => {
                self.stats.starved += 1;
                None
            }
        }
    }

    fn release(&mut self, buffer: SensorBuffer) {
        self.driver.give_back(buffer);
        self.stats.released += 1;
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

/// An acquired sensor frame. Dropping it returns the buffer to the driver.
pub struct RawFrame<'a> {
    source: &'a mut FrameSource,
    buffer: SensorBuffer,
}

impl RawFrame<'_> {
    pub fn view(&self) -> FrameRef<'_> {
        FrameRef {
            data: &self.buffer.data,
            width: self.buffer.width,
            height: self.buffer.height,
            format: self.buffer.format,
        }
    }

    pub fn width(&self) -> u32 {
        self.buffer.width
    }

    pub fn height(&self) -> u32 {
        self.buffer.height
    }

    pub fn format(&self) -> FrameFormat {
        self.buffer.format
    }

    pub fn len(&self) -> usize {
        self.buffer.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.data.is_empty()
    }

    /// Whether the buffer lives in shared auxiliary memory.
    pub fn in_aux_memory(&self) -> bool {
        self.buffer.in_aux_memory
    }
}

impl Drop for RawFrame<'_> {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        self.source.release(buffer);
    }
}

/// Borrowed pixel view handed to the converter.
#[derive(Clone, Copy, Debug)]
pub struct FrameRef<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
}

impl<'a> FrameRef<'a> {
    pub fn new(data: &'a [u8], width: u32, height: u32, format: FrameFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
        }
    }
}

/// Sensor backend selection, keyed by source URI.
#[derive(Clone, Debug)]
pub struct SensorSettings {
    pub source: String,
    pub aux_memory: bool,
    pub starve_every: Option<u32>,
    pub reinit_delay: Duration,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            source: "stub://camera".to_string(),
            aux_memory: true,
            starve_every: None,
            reinit_delay: Duration::from_millis(100),
        }
    }
}

pub fn open_driver(settings: &SensorSettings) -> Result<Box<dyn SensorDriver>> {
    if settings.source.starts_with("stub://") {
        log::info!("camera: synthetic sensor {}", settings.source);
        return Ok(Box::new(SyntheticSensor::new(SyntheticConfig {
            aux_memory: settings.aux_memory,
            starve_every: settings.starve_every,
        })));
    }
    Err(anyhow!(
        "unsupported sensor source '{}'; expected stub://",
        settings.source
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ByteOrder, Quality};

    fn settings(layout: PixelLayout, resolution: Resolution, quality: i64) -> DeviceSettings {
        DeviceSettings::new(
            Quality::new(quality).unwrap(),
            resolution,
            layout,
            ByteOrder::Little,
        )
    }

    fn source(aux_memory: bool) -> FrameSource {
        FrameSource::new(
            Box::new(SyntheticSensor::new(SyntheticConfig {
                aux_memory,
                starve_every: None,
            })),
            Duration::ZERO,
        )
    }

    #[test]
    fn aux_memory_plan_double_buffers_and_caps_native_quality() {
        let plan = SensorPlan::for_settings(&settings(PixelLayout::Jpeg, Resolution::Uxga, 30), true);
        assert_eq!(plan.frame_buffers, 2);
        assert_eq!(plan.grab_mode, GrabMode::Latest);
        assert_eq!(plan.location, BufferLocation::Aux);
        assert_eq!(plan.jpeg_quality.value(), AUX_MEMORY_JPEG_QUALITY);
        assert_eq!(plan.resolution, Resolution::Uxga);

        let plan = SensorPlan::for_settings(&settings(PixelLayout::Jpeg, Resolution::Vga, 4), true);
        assert_eq!(plan.jpeg_quality.value(), 4);

        let plan = SensorPlan::for_settings(&settings(PixelLayout::Jpeg, Resolution::Vga, 10), true);
        assert_eq!(plan.jpeg_quality.value(), 10);

        let plan =
            SensorPlan::for_settings(&settings(PixelLayout::Grayscale, Resolution::Vga, 30), true);
        assert_eq!(plan.jpeg_quality.value(), 30);
    }

    #[test]
    fn internal_memory_plan_single_buffers_and_forces_native_resolution() {
        let plan = SensorPlan::for_settings(&settings(PixelLayout::Jpeg, Resolution::Uxga, 30), false);
        assert_eq!(plan.frame_buffers, 1);
        assert_eq!(plan.grab_mode, GrabMode::WhenEmpty);
        assert_eq!(plan.resolution, INTERNAL_MEMORY_JPEG_RESOLUTION);
        assert_eq!(plan.jpeg_quality.value(), 30);

        let plan =
            SensorPlan::for_settings(&settings(PixelLayout::Rgb565, Resolution::Qvga, 30), false);
        assert_eq!(plan.resolution, Resolution::Qvga);
    }

    #[test]
    fn acquire_requires_init() {
        let mut source = source(true);
        assert!(source.acquire().is_none());
        source
            .initialize(&settings(PixelLayout::Grayscale, Resolution::Qqvga, 12))
            .unwrap();
        let frame = source.acquire().expect("frame");
        assert_eq!(frame.width(), 160);
        assert_eq!(frame.format(), FrameFormat::Grayscale);
        assert_eq!(frame.len(), 160 * 120);
    }

    #[test]
    fn dropping_frame_releases_once() {
        let mut source = source(true);
        source
            .initialize(&settings(PixelLayout::Grayscale, Resolution::Qqvga, 12))
            .unwrap();
        for _ in 0..3 {
            let frame = source.acquire().expect("frame");
            drop(frame);
        }
        let stats = source.stats();
        assert_eq!(stats.acquired, 3);
        assert_eq!(stats.released, 3);
    }

    #[test]
    fn reinitialize_counts_one_cycle() {
        let mut source = source(true);
        let s = settings(PixelLayout::Grayscale, Resolution::Qqvga, 12);
        source.initialize(&s).unwrap();
        source.reinitialize(&s).unwrap();
        let stats = source.stats();
        assert_eq!(stats.inits, 2);
        assert_eq!(stats.deinits, 1);
    }

    #[test]
    fn open_driver_rejects_unknown_scheme() {
        let settings = SensorSettings {
            source: "rtsp://camera".to_string(),
            ..SensorSettings::default()
        };
        assert!(open_driver(&settings).is_err());
    }
}
