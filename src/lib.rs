//! Capture Node
//!
//! Firmware core for a still-image camera module: grab a frame from the
//! sensor, turn it into a JPEG, and store it under the next free numeric
//! name. A line console, an HTTP server and a capture button drive it,
//! and all of them share one camera and one store on a single thread.
//!
//! # Module Structure
//!
//! - `settings`: quality, resolution, pixel layout, byte order
//! - `sensor`: driver seam, `FrameSource` and the `RawFrame` guard
//! - `convert`: raw frame to JPEG
//! - `storage` / `filestore`: block backends and sequential-id naming
//! - `pipeline`: one shot, acquire to persist
//! - `burst`: N-shot sequences that keep the HTTP side served
//! - `menu` / `console`: serial settings menu and command loop
//! - `api`: HTTP routes
//! - `trigger`: debounced capture button
//! - `context` / `runtime`: shared device state and the main loop

pub mod api;
pub mod burst;
pub mod config;
pub mod console;
pub mod context;
pub mod convert;
pub mod error;
pub mod filestore;
pub mod menu;
pub mod pipeline;
pub mod runtime;
pub mod sensor;
pub mod settings;
pub mod storage;
pub mod trigger;

pub use burst::{BurstController, BurstRequest, BurstState, BurstSummary, BurstTask};
pub use context::{DeferredTask, DeviceContext, GeometryChange};
pub use convert::{convert, remap_quality, EncodedImage};
pub use error::{CaptureError, ConversionError, SensorError, StorageError, ValidationError};
pub use filestore::{FileStore, ScanPolicy, StoredImage, MAX_IDENTITY};
pub use menu::{ConfigMenu, MenuOutcome, MenuState};
pub use pipeline::{capture, CaptureReport};
pub use sensor::{
    FrameFormat, FrameRef, FrameSource, RawFrame, SensorBuffer, SensorDriver, SensorPlan,
    SyntheticConfig, SyntheticSensor,
};
pub use settings::{ByteOrder, DeviceSettings, PixelLayout, Quality, Resolution};
pub use storage::{BlockStore, DirBlockStore, MemoryBlockStore};
pub use trigger::{CaptureButton, Debouncer, StubButton, TriggerInput};
