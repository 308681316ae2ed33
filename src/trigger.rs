//! Manual capture button.
//!
//! `TriggerInput` is the pin seam: it only reports the current level.
//! `Debouncer` turns sampled levels into single press events: a new level
//! counts once it has held for the settle time, and after a press fires
//! further presses are ignored until the hold-off has passed. The hold-off
//! never sleeps, so the service loop keeps running while it is active.

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_SETTLE: Duration = Duration::from_millis(50);
pub const DEFAULT_HOLD_OFF: Duration = Duration::from_millis(500);

/// A push button or similar level input.
pub trait TriggerInput {
    /// `true` while the button is held down.
    fn is_pressed(&mut self) -> bool;
}

#[derive(Debug)]
pub struct Debouncer {
    settle: Duration,
    hold_off: Duration,
    raw: bool,
    changed_at: Option<Instant>,
    stable: bool,
    quiet_until: Option<Instant>,
}

impl Debouncer {
    pub fn new(settle: Duration, hold_off: Duration) -> Self {
        Self {
            settle,
            hold_off,
            raw: false,
            changed_at: None,
            stable: false,
            quiet_until: None,
        }
    }

    /// Feed one sample. Returns `true` exactly once per accepted press.
    pub fn update(&mut self, pressed: bool, now: Instant) -> bool {
        if pressed != self.raw {
            self.raw = pressed;
            self.changed_at = Some(now);
        }
        if self.raw == self.stable {
            return false;
        }
        let settled = self
            .changed_at
            .map_or(true, |at| now.saturating_duration_since(at) > self.settle);
        if !settled {
            return false;
        }

        self.stable = self.raw;
        if !self.stable {
            return false;
        }
        if self.quiet_until.is_some_and(|until| now < until) {
            log::debug!("button press ignored during hold-off");
            return false;
        }
        self.quiet_until = Some(now + self.hold_off);
        true
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLE, DEFAULT_HOLD_OFF)
    }
}

/// A trigger input paired with its debouncer.
pub struct CaptureButton {
    input: Box<dyn TriggerInput>,
    debouncer: Debouncer,
}

impl CaptureButton {
    pub fn new(input: Box<dyn TriggerInput>, debouncer: Debouncer) -> Self {
        Self { input, debouncer }
    }

    /// Sample the input once. `true` when a press should start a capture.
    pub fn poll(&mut self, now: Instant) -> bool {
        let pressed = self.input.is_pressed();
        self.debouncer.update(pressed, now)
    }
}

/// In-process button, pressed and released through a `StubButtonHandle`.
#[derive(Debug, Default)]
pub struct StubButton {
    level: Arc<AtomicBool>,
}

#[derive(Clone, Debug)]
pub struct StubButtonHandle {
    level: Arc<AtomicBool>,
}

impl StubButton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> StubButtonHandle {
        StubButtonHandle {
            level: self.level.clone(),
        }
    }
}

impl StubButtonHandle {
    pub fn press(&self) {
        self.level.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.level.store(false, Ordering::SeqCst);
    }
}

impl TriggerInput for StubButton {
    fn is_pressed(&mut self) -> bool {
        self.level.load(Ordering::SeqCst)
    }
}

/// Button read from a GPIO value file (`/sys/class/gpio/gpioN/value`).
///
/// With `active_low` the button pulls the line to `0` when pressed, as on a
/// pull-up input.
#[derive(Debug)]
pub struct GpioValueButton {
    path: PathBuf,
    active_low: bool,
    failing: bool,
}

impl GpioValueButton {
    pub fn new(path: PathBuf, active_low: bool) -> Self {
        Self {
            path,
            active_low,
            failing: false,
        }
    }
}

impl TriggerInput for GpioValueButton {
    fn is_pressed(&mut self) -> bool {
        let level = match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                self.failing = false;
                raw.trim() == "1"
            }
            Err(err) => {
                if !self.failing {
                    log::warn!("button input {}: {err}", self.path.display());
                    self.failing = true;
                }
                return false;
            }
        };
        level != self.active_low
    }
}

#[derive(Debug, Clone)]
pub struct TriggerSettings {
    /// `stub://...`, a GPIO value file path, or `None` for no button.
    pub source: Option<String>,
    pub active_low: bool,
    pub settle: Duration,
    pub hold_off: Duration,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            source: None,
            active_low: true,
            settle: DEFAULT_SETTLE,
            hold_off: DEFAULT_HOLD_OFF,
        }
    }
}

pub fn open_button(settings: &TriggerSettings) -> Result<Option<CaptureButton>> {
    let Some(source) = settings.source.as_deref() else {
        return Ok(None);
    };
    let input: Box<dyn TriggerInput> = if source.starts_with("stub://") {
        log::info!("button: stub input {source}");
        Box::new(StubButton::new())
    } else if source.trim().is_empty() {
        return Err(anyhow!("button source is empty"));
    } else {
        log::info!("button: gpio value file {source}");
        Box::new(GpioValueButton::new(
            PathBuf::from(source),
            settings.active_low,
        ))
    };
    Ok(Some(CaptureButton::new(
        input,
        Debouncer::new(settings.settle, settings.hold_off),
    )))
}
