use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::burst::BurstRequest;
use crate::filestore::ScanPolicy;
use crate::sensor::SensorSettings;
use crate::settings::{ByteOrder, DeviceSettings, PixelLayout, Quality, Resolution};
use crate::trigger::TriggerSettings;

const DEFAULT_STORAGE_ROOT: &str = "sdcard";
const DEFAULT_MOUNT_ATTEMPTS: u32 = 5;
const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:80";
const DEFAULT_SENSOR_SOURCE: &str = "stub://camera";
const DEFAULT_REINIT_DELAY_MS: u64 = 100;
const DEFAULT_QUALITY: i64 = 12;
const DEFAULT_RESOLUTION: i64 = 3;
const DEFAULT_PIXEL_FORMAT: i64 = 0;
const DEFAULT_BURST_COUNT: i64 = 50;
const DEFAULT_BURST_INTERVAL_SECS: f64 = 0.2;

#[derive(Debug, Deserialize, Default)]
struct NodeConfigFile {
    storage: Option<StorageConfigFile>,
    http: Option<HttpConfigFile>,
    sensor: Option<SensorConfigFile>,
    defaults: Option<DefaultsConfigFile>,
    burst: Option<BurstConfigFile>,
    trigger: Option<TriggerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    root: Option<PathBuf>,
    mount_attempts: Option<u32>,
    scan: Option<ScanPolicy>,
}

#[derive(Debug, Deserialize, Default)]
struct HttpConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SensorConfigFile {
    source: Option<String>,
    aux_memory: Option<bool>,
    starve_every: Option<u32>,
    reinit_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DefaultsConfigFile {
    quality: Option<i64>,
    resolution: Option<i64>,
    pixel_format: Option<i64>,
    big_endian: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct TriggerConfigFile {
    source: Option<String>,
    active_low: Option<bool>,
    debounce_ms: Option<u64>,
    hold_off_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct BurstConfigFile {
    count: Option<i64>,
    interval_secs: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub storage: StorageSettings,
    /// `None` disables the HTTP front end.
    pub http_addr: Option<String>,
    pub sensor: SensorSettings,
    pub defaults: DefaultSettings,
    pub burst: BurstSettings,
    /// Capture button; `source: None` when the node has none.
    pub trigger: TriggerSettings,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub root: PathBuf,
    pub mount_attempts: u32,
    pub scan: ScanPolicy,
}

/// Boot-time device settings, as raw wire values until validated.
#[derive(Debug, Clone)]
pub struct DefaultSettings {
    pub quality: i64,
    pub resolution: i64,
    pub pixel_format: i64,
    pub big_endian: bool,
}

#[derive(Debug, Clone)]
pub struct BurstSettings {
    pub count: i64,
    pub interval_secs: f64,
}

impl NodeConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAPTURE_NODE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: NodeConfigFile) -> Result<Self> {
        let storage = StorageSettings {
            root: file
                .storage
                .as_ref()
                .and_then(|s| s.root.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT)),
            mount_attempts: file
                .storage
                .as_ref()
                .and_then(|s| s.mount_attempts)
                .unwrap_or(DEFAULT_MOUNT_ATTEMPTS),
            scan: file
                .storage
                .as_ref()
                .and_then(|s| s.scan)
                .unwrap_or_default(),
        };
        let http_addr = match file.http.and_then(|http| http.addr) {
            Some(addr) if addr.trim().is_empty() => None,
            Some(addr) => Some(addr),
            None => Some(DEFAULT_HTTP_ADDR.to_string()),
        };
        let sensor = SensorSettings {
            source: file
                .sensor
                .as_ref()
                .and_then(|s| s.source.clone())
                .unwrap_or_else(|| DEFAULT_SENSOR_SOURCE.to_string()),
            aux_memory: file
                .sensor
                .as_ref()
                .and_then(|s| s.aux_memory)
                .unwrap_or(true),
            starve_every: file.sensor.as_ref().and_then(|s| s.starve_every),
            reinit_delay: Duration::from_millis(
                file.sensor
                    .as_ref()
                    .and_then(|s| s.reinit_delay_ms)
                    .unwrap_or(DEFAULT_REINIT_DELAY_MS),
            ),
        };
        let defaults = file.defaults.unwrap_or_default();
        let defaults = DefaultSettings {
            quality: defaults.quality.unwrap_or(DEFAULT_QUALITY),
            resolution: defaults.resolution.unwrap_or(DEFAULT_RESOLUTION),
            pixel_format: defaults.pixel_format.unwrap_or(DEFAULT_PIXEL_FORMAT),
            big_endian: defaults.big_endian.unwrap_or(false),
        };
        let burst = file.burst.unwrap_or_default();
        let burst = BurstSettings {
            count: burst.count.unwrap_or(DEFAULT_BURST_COUNT),
            interval_secs: burst.interval_secs.unwrap_or(DEFAULT_BURST_INTERVAL_SECS),
        };
        let trigger = file.trigger.unwrap_or_default();
        let trigger_defaults = TriggerSettings::default();
        let trigger = TriggerSettings {
            source: trigger.source.filter(|s| !s.trim().is_empty()),
            active_low: trigger.active_low.unwrap_or(trigger_defaults.active_low),
            settle: trigger
                .debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(trigger_defaults.settle),
            hold_off: trigger
                .hold_off_ms
                .map(Duration::from_millis)
                .unwrap_or(trigger_defaults.hold_off),
        };
        Ok(Self {
            storage,
            http_addr,
            sensor,
            defaults,
            burst,
            trigger,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(root) = std::env::var("CAPTURE_NODE_STORAGE_ROOT") {
            if !root.trim().is_empty() {
                self.storage.root = PathBuf::from(root);
            }
        }
        if let Ok(scan) = std::env::var("CAPTURE_NODE_SCAN") {
            if !scan.trim().is_empty() {
                self.storage.scan = scan
                    .parse()
                    .map_err(|e| anyhow!("CAPTURE_NODE_SCAN: {e}"))?;
            }
        }
        if let Ok(addr) = std::env::var("CAPTURE_NODE_HTTP_ADDR") {
            let addr = addr.trim();
            if addr.eq_ignore_ascii_case("off") {
                self.http_addr = None;
            } else if !addr.is_empty() {
                self.http_addr = Some(addr.to_string());
            }
        }
        if let Ok(source) = std::env::var("CAPTURE_NODE_SENSOR") {
            if !source.trim().is_empty() {
                self.sensor.source = source;
            }
        }
        if let Ok(source) = std::env::var("CAPTURE_NODE_TRIGGER") {
            let source = source.trim();
            if source.eq_ignore_ascii_case("off") {
                self.trigger.source = None;
            } else if !source.is_empty() {
                self.trigger.source = Some(source.to_string());
            }
        }
        if let Ok(aux) = std::env::var("CAPTURE_NODE_AUX_MEMORY") {
            self.sensor.aux_memory = parse_bool(&aux).ok_or_else(|| {
                anyhow!("CAPTURE_NODE_AUX_MEMORY must be true/false/1/0")
            })?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.storage.mount_attempts == 0 {
            return Err(anyhow!("storage.mount_attempts must be at least 1"));
        }
        self.device_settings()?;
        self.burst_defaults()?;
        Ok(())
    }

    pub fn device_settings(&self) -> Result<DeviceSettings> {
        let d = &self.defaults;
        let quality =
            Quality::new(d.quality).map_err(|e| anyhow!("defaults.quality: {e}"))?;
        let resolution = Resolution::from_index(d.resolution)
            .map_err(|e| anyhow!("defaults.resolution: {e}"))?;
        let layout = PixelLayout::from_index(d.pixel_format)
            .map_err(|e| anyhow!("defaults.pixel_format: {e}"))?;
        let byte_order = if d.big_endian {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        };
        Ok(DeviceSettings::new(quality, resolution, layout, byte_order))
    }

    pub fn burst_defaults(&self) -> Result<BurstRequest> {
        BurstRequest::new(self.burst.count, self.burst.interval_secs)
            .map_err(|e| anyhow!("burst defaults: {e}"))
    }
}

fn read_config_file(path: &Path) -> Result<NodeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg: NodeConfigFile = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
