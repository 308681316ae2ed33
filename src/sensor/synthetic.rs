//! Synthetic sensor for `stub://` sources.
//!
//! Produces a moving gradient with a little noise in whichever layout the
//! plan asks for. Native-encoded frames go through the same JPEG encoder the
//! converter uses.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use rand::Rng;

use super::{FrameFormat, SensorBuffer, SensorDriver, SensorPlan};
use crate::convert::remap_quality;
use crate::error::SensorError;
use crate::settings::PixelLayout;

#[derive(Clone, Copy, Debug, Default)]
pub struct SyntheticConfig {
    pub aux_memory: bool,
    /// Report starvation on every Nth grab.
    pub starve_every: Option<u32>,
}

pub struct SyntheticSensor {
    config: SyntheticConfig,
    active: Option<SensorPlan>,
    grabs: u64,
    frames: u64,
    outstanding: u8,
}

impl SyntheticSensor {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            active: None,
            grabs: 0,
            frames: 0,
            outstanding: 0,
        }
    }

    fn render_rgb(&self, width: u32, height: u32) -> Vec<[u8; 3]> {
        let mut rng = rand::thread_rng();
        let phase = (self.frames % 256) as u32;
        let mut pixels = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let noise: u8 = rng.gen_range(0..8);
                let r = ((x * 255 / width.max(1)) + phase) as u8;
                let g = (y * 255 / height.max(1)) as u8;
                let b = (phase as u8).wrapping_add(noise);
                pixels.push([r, g, b]);
            }
        }
        pixels
    }

    fn render(&self, plan: &SensorPlan) -> Option<SensorBuffer> {
        let (width, height) = plan.resolution.dimensions();
        let pixels = self.render_rgb(width, height);
        let (data, format) = match plan.layout {
            PixelLayout::Grayscale => {
                let data = pixels
                    .iter()
                    .map(|[r, g, b]| ((*r as u16 * 77 + *g as u16 * 150 + *b as u16 * 29) >> 8) as u8)
                    .collect();
                (data, FrameFormat::Grayscale)
            }
            PixelLayout::Rgb565 => {
                let mut data = Vec::with_capacity(pixels.len() * 2);
                for [r, g, b] in &pixels {
                    let packed: u16 =
                        ((*r as u16 >> 3) << 11) | ((*g as u16 >> 2) << 5) | (*b as u16 >> 3);
                    data.extend_from_slice(&packed.to_le_bytes());
                }
                (data, FrameFormat::Rgb565)
            }
            PixelLayout::Jpeg => {
                let flat: Vec<u8> = pixels.iter().flatten().copied().collect();
                let mut out = Vec::new();
                let mut encoder = JpegEncoder::new_with_quality(&mut out, remap_quality(plan.jpeg_quality));
                if let Err(err) = encoder.encode(&flat, width, height, ExtendedColorType::Rgb8) {
                    log::warn!("synthetic sensor: jpeg encode failed: {err}");
                    return None;
                }
                (out, FrameFormat::Jpeg)
            }
        };
        Some(SensorBuffer {
            data,
            width,
            height,
            format,
            in_aux_memory: self.config.aux_memory,
        })
    }
}

impl SensorDriver for SyntheticSensor {
    fn has_aux_memory(&self) -> bool {
        self.config.aux_memory
    }

    fn init(&mut self, plan: &SensorPlan) -> Result<(), SensorError> {
        if plan.frame_buffers == 0 {
            return Err(SensorError::Init("no frame buffers requested".to_string()));
        }
        self.active = Some(*plan);
        self.outstanding = 0;
        Ok(())
    }

    fn deinit(&mut self) {
        self.active = None;
    }

    fn grab(&mut self) -> Option<SensorBuffer> {
        let plan = self.active?;
        self.grabs += 1;
        if let Some(n) = self.config.starve_every {
            if n > 0 && self.grabs % n as u64 == 0 {
                return None;
            }
        }
        if self.outstanding >= plan.frame_buffers {
            return None;
        }
        let buffer = self.render(&plan)?;
        self.frames += 1;
        self.outstanding += 1;
        Some(buffer)
    }

    fn give_back(&mut self, _buffer: SensorBuffer) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }
}
