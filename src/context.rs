//! Device state shared by every front end.
//!
//! One `DeviceContext` owns the settings, the camera, the image store, the
//! burst progress record and the single deferred-task slot. Front ends get
//! `&mut DeviceContext`; nothing here is `Sync` and nothing needs to be.

use crate::burst::{BurstRequest, BurstState};
use crate::error::{CaptureError, SensorError};
use crate::filestore::FileStore;
use crate::pipeline::{self, CaptureReport};
use crate::sensor::FrameSource;
use crate::settings::{ByteOrder, DeviceSettings, PixelLayout, Quality, Resolution};

/// Work accepted by a front end but run later by the main loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeferredTask {
    Capture,
    Burst(BurstRequest),
}

/// Outcome of a resolution or pixel layout change.
#[derive(Debug)]
pub enum GeometryChange {
    Unchanged,
    Reinitialized,
    /// Setting recorded, but the camera did not come back.
    ReinitFailed(SensorError),
}

pub struct DeviceContext {
    settings: DeviceSettings,
    pub source: FrameSource,
    pub store: FileStore,
    pub burst: BurstState,
    pending: Option<DeferredTask>,
}

impl DeviceContext {
    pub fn new(settings: DeviceSettings, source: FrameSource, store: FileStore) -> Self {
        Self {
            settings,
            source,
            store,
            burst: BurstState::default(),
            pending: None,
        }
    }

    /// Current settings. Changes go through the setters below, so a
    /// resolution or layout change always reaches the camera.
    ///
    /// ```compile_fail
    /// # use capture_node::{DeviceContext, DeviceSettings};
    /// fn overwrite(ctx: &mut DeviceContext) {
    ///     ctx.settings = DeviceSettings::default();
    /// }
    /// ```
    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    pub fn capture(&mut self) -> Result<CaptureReport, CaptureError> {
        pipeline::capture(&mut self.source, &mut self.store, &self.settings)
    }

    pub fn set_quality(&mut self, quality: Quality) {
        self.settings.set_quality(quality);
        log::info!("quality set to {quality}");
    }

    pub fn set_byte_order(&mut self, byte_order: ByteOrder) {
        self.settings.set_byte_order(byte_order);
        log::info!("byte order set to {byte_order}");
    }

    pub fn set_resolution(&mut self, resolution: Resolution) -> GeometryChange {
        if !self.settings.set_resolution(resolution) {
            return GeometryChange::Unchanged;
        }
        log::info!("resolution set to {resolution}");
        self.reinitialize()
    }

    pub fn set_pixel_layout(&mut self, layout: PixelLayout) -> GeometryChange {
        if !self.settings.set_layout(layout) {
            return GeometryChange::Unchanged;
        }
        log::info!("pixel format set to {layout}");
        self.reinitialize()
    }

    fn reinitialize(&mut self) -> GeometryChange {
        match self.source.reinitialize(&self.settings) {
            Ok(_) => GeometryChange::Reinitialized,
            Err(err) => {
                log::error!("camera reinit failed: {err}");
                GeometryChange::ReinitFailed(err)
            }
        }
    }

    /// Fill the task slot. Hands the task back if the slot is taken.
    pub fn enqueue(&mut self, task: DeferredTask) -> Result<(), DeferredTask> {
        if self.pending.is_some() {
            return Err(task);
        }
        self.pending = Some(task);
        Ok(())
    }

    pub fn pending(&self) -> Option<&DeferredTask> {
        self.pending.as_ref()
    }

    pub fn take_pending(&mut self) -> Option<DeferredTask> {
        self.pending.take()
    }

    /// A burst is running or waiting in the slot.
    pub fn burst_busy(&self) -> bool {
        self.burst.in_progress || matches!(self.pending, Some(DeferredTask::Burst(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filestore::ScanPolicy;
    use crate::sensor::{SyntheticConfig, SyntheticSensor};
    use crate::storage::MemoryBlockStore;
    use std::time::Duration;

    fn context() -> DeviceContext {
        let settings = DeviceSettings::new(
            Quality::DEFAULT,
            Resolution::Qqvga,
            PixelLayout::Grayscale,
            ByteOrder::Little,
        );
        let mut source = FrameSource::new(
            Box::new(SyntheticSensor::new(SyntheticConfig::default())),
            Duration::ZERO,
        );
        source.initialize(&settings).unwrap();
        let store = FileStore::new(Box::new(MemoryBlockStore::new()), ScanPolicy::StopAtGap);
        DeviceContext::new(settings, source, store)
    }

    #[test]
    fn single_slot_queue() {
        let mut ctx = context();
        assert!(ctx.enqueue(DeferredTask::Capture).is_ok());
        assert_eq!(ctx.enqueue(DeferredTask::Capture), Err(DeferredTask::Capture));
        assert_eq!(ctx.take_pending(), Some(DeferredTask::Capture));
        assert!(ctx.take_pending().is_none());
    }

    #[test]
    fn geometry_reinit_only_on_change() {
        let mut ctx = context();
        let inits = ctx.source.stats().inits;
        assert!(matches!(
            ctx.set_resolution(Resolution::Qqvga),
            GeometryChange::Unchanged
        ));
        assert!(matches!(
            ctx.set_resolution(Resolution::Qvga),
            GeometryChange::Reinitialized
        ));
        assert!(matches!(
            ctx.set_pixel_layout(PixelLayout::Rgb565),
            GeometryChange::Reinitialized
        ));
        ctx.set_quality(Quality::new(40).unwrap());
        ctx.set_byte_order(ByteOrder::Big);
        assert_eq!(ctx.source.stats().inits, inits + 2);
        assert_eq!(ctx.source.stats().deinits, 2);
    }

    #[test]
    fn camera_plan_follows_settings() {
        let mut ctx = context();
        ctx.set_resolution(Resolution::Xga);
        ctx.set_pixel_layout(PixelLayout::Rgb565);
        assert_eq!(ctx.settings().resolution(), Resolution::Xga);
        assert_eq!(ctx.settings().layout(), PixelLayout::Rgb565);
        let plan = ctx.source.plan().expect("camera ready");
        assert_eq!(plan.resolution, ctx.settings().resolution());
        assert_eq!(plan.layout, ctx.settings().layout());
    }

    #[test]
    fn pending_burst_counts_as_busy() {
        let mut ctx = context();
        assert!(!ctx.burst_busy());
        ctx.enqueue(DeferredTask::Burst(BurstRequest::new(2, 0.1).unwrap()))
            .unwrap();
        assert!(ctx.burst_busy());
    }
}
