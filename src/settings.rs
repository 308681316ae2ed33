//! Device settings.
//!
//! `DeviceSettings` is the process-wide capture configuration. It has two
//! kinds of setters:
//!
//! - `set_quality` / `set_byte_order`: recorded and picked up by the next
//!   capture, no sensor reinitialization.
//! - resolution / pixel layout: crate-private here. The public path is
//!   `DeviceContext::set_resolution` / `DeviceContext::set_pixel_layout`,
//!   which run the sensor deinit+reinit cycle as part of the change.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Acquisition quality scale: 0..=63, lower is higher fidelity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Quality(u8);

impl Quality {
    pub const MIN: u8 = 0;
    pub const MAX: u8 = 63;
    pub const DEFAULT: Quality = Quality(12);

    pub fn new(value: i64) -> Result<Self, ValidationError> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(ValidationError::QualityOutOfRange(value))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// The value, clamped to at most `ceiling`.
    pub fn capped(self, ceiling: u8) -> Self {
        Self(self.0.min(ceiling).min(Self::MAX))
    }
}

impl TryFrom<i64> for Quality {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quality> for u8 {
    fn from(q: Quality) -> Self {
        q.0
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolution classes, smallest to largest. The discriminant is the wire index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Resolution {
    Qqvga = 0,
    Qcif = 1,
    Qvga = 2,
    Vga = 3,
    Svga = 4,
    Xga = 5,
    Sxga = 6,
    Uxga = 7,
}

impl Resolution {
    pub const ALL: [Resolution; 8] = [
        Resolution::Qqvga,
        Resolution::Qcif,
        Resolution::Qvga,
        Resolution::Vga,
        Resolution::Svga,
        Resolution::Xga,
        Resolution::Sxga,
        Resolution::Uxga,
    ];

    pub fn from_index(index: i64) -> Result<Self, ValidationError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(ValidationError::ResolutionOutOfRange(index))
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Resolution::Qqvga => (160, 120),
            Resolution::Qcif => (176, 144),
            Resolution::Qvga => (320, 240),
            Resolution::Vga => (640, 480),
            Resolution::Svga => (800, 600),
            Resolution::Xga => (1024, 768),
            Resolution::Sxga => (1280, 1024),
            Resolution::Uxga => (1600, 1200),
        }
    }

    /// The top two size classes. Packed color encodes are quality-capped here.
    pub fn is_high(self) -> bool {
        self >= Resolution::Sxga
    }

    pub fn label(self) -> &'static str {
        match self {
            Resolution::Qqvga => "QQVGA",
            Resolution::Qcif => "QCIF",
            Resolution::Qvga => "QVGA",
            Resolution::Vga => "VGA",
            Resolution::Svga => "SVGA",
            Resolution::Xga => "XGA",
            Resolution::Sxga => "SXGA",
            Resolution::Uxga => "UXGA",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        write!(f, "{} ({}x{})", self.label(), w, h)
    }
}

/// Pixel layout requested from the sensor. The discriminant is the wire index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelLayout {
    /// Sensor emits the deliverable encoding (JPEG) directly.
    Jpeg = 0,
    Grayscale = 1,
    Rgb565 = 2,
}

impl PixelLayout {
    pub fn from_index(index: i64) -> Result<Self, ValidationError> {
        match index {
            0 => Ok(PixelLayout::Jpeg),
            1 => Ok(PixelLayout::Grayscale),
            2 => Ok(PixelLayout::Rgb565),
            other => Err(ValidationError::PixelLayoutOutOfRange(other)),
        }
    }

    pub fn index(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelLayout::Jpeg => "RGB (JPEG)",
            PixelLayout::Grayscale => "Grayscale",
            PixelLayout::Rgb565 => "RGB565",
        };
        f.write_str(name)
    }
}

/// Sample byte order for packed 16-bit color. Only meaningful for RGB565.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    #[default]
    Little,
    /// Samples arrive most-significant byte first and are swapped before encoding.
    Big,
}

impl ByteOrder {
    /// Wire form used by the HTTP surface: 0 = little, 1 = big.
    pub fn from_flag(flag: i64) -> Result<Self, ValidationError> {
        match flag {
            0 => Ok(ByteOrder::Little),
            1 => Ok(ByteOrder::Big),
            other => Err(ValidationError::ByteOrderOutOfRange(other)),
        }
    }

    pub fn flag(self) -> u8 {
        match self {
            ByteOrder::Little => 0,
            ByteOrder::Big => 1,
        }
    }

    pub fn is_big(self) -> bool {
        self == ByteOrder::Big
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteOrder::Little => f.write_str("Little Endian"),
            ByteOrder::Big => f.write_str("Big Endian"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceSettings {
    quality: Quality,
    resolution: Resolution,
    layout: PixelLayout,
    byte_order: ByteOrder,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            quality: Quality::DEFAULT,
            resolution: Resolution::Vga,
            layout: PixelLayout::Jpeg,
            byte_order: ByteOrder::Little,
        }
    }
}

impl DeviceSettings {
    pub fn new(
        quality: Quality,
        resolution: Resolution,
        layout: PixelLayout,
        byte_order: ByteOrder,
    ) -> Self {
        Self {
            quality,
            resolution,
            layout,
            byte_order,
        }
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Takes effect on the next capture. No reinit.
    pub fn set_quality(&mut self, quality: Quality) {
        self.quality = quality;
    }

    /// Takes effect on the next capture. No reinit.
    pub fn set_byte_order(&mut self, byte_order: ByteOrder) {
        self.byte_order = byte_order;
    }

    /// Returns true when the value changed. Caller owns the reinit.
    pub(crate) fn set_resolution(&mut self, resolution: Resolution) -> bool {
        let changed = self.resolution != resolution;
        self.resolution = resolution;
        changed
    }

    /// Returns true when the value changed. Caller owns the reinit.
    pub(crate) fn set_layout(&mut self, layout: PixelLayout) -> bool {
        let changed = self.layout != layout;
        self.layout = layout;
        changed
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            quality: self.quality.value(),
            resolution: self.resolution.index(),
            pixel_format: self.layout.index(),
            endianness: self.byte_order.flag(),
        }
    }
}

/// Wire form of the settings, as reported by `/getsettings`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSnapshot {
    pub quality: u8,
    pub resolution: u8,
    pub pixel_format: u8,
    pub endianness: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capped_quality_clamps_from_above() {
        assert_eq!(Quality::new(4).unwrap().capped(10).value(), 4);
        assert_eq!(Quality::new(10).unwrap().capped(10).value(), 10);
        assert_eq!(Quality::new(30).unwrap().capped(10).value(), 10);
        assert_eq!(Quality::new(63).unwrap().capped(200).value(), 63);
    }

    #[test]
    fn quality_bounds() {
        assert!(Quality::new(0).is_ok());
        assert!(Quality::new(63).is_ok());
        assert!(matches!(
            Quality::new(64),
            Err(ValidationError::QualityOutOfRange(64))
        ));
        assert!(Quality::new(-1).is_err());
    }

    #[test]
    fn resolution_index_round_trip() {
        for res in Resolution::ALL {
            assert_eq!(Resolution::from_index(res.index() as i64).unwrap(), res);
        }
        assert!(Resolution::from_index(8).is_err());
        assert!(Resolution::from_index(-1).is_err());
    }

    #[test]
    fn only_top_two_resolutions_are_high() {
        let high: Vec<_> = Resolution::ALL.iter().filter(|r| r.is_high()).collect();
        assert_eq!(high, vec![&Resolution::Sxga, &Resolution::Uxga]);
    }

    #[test]
    fn geometry_setters_report_change() {
        let mut settings = DeviceSettings::default();
        assert!(!settings.set_resolution(Resolution::Vga));
        assert!(settings.set_resolution(Resolution::Qvga));
        assert!(!settings.set_layout(PixelLayout::Jpeg));
        assert!(settings.set_layout(PixelLayout::Grayscale));
    }

    #[test]
    fn snapshot_uses_wire_indices() {
        let mut settings = DeviceSettings::default();
        settings.set_byte_order(ByteOrder::Big);
        settings.set_quality(Quality::new(10).unwrap());
        let snap = settings.snapshot();
        assert_eq!(
            snap,
            SettingsSnapshot {
                quality: 10,
                resolution: 3,
                pixel_format: 0,
                endianness: 1,
            }
        );
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"pixelFormat\":0"));
    }
}
