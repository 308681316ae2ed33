//! Boot sequence and main service loop.
//!
//! Everything runs on one thread. Each tick serves waiting HTTP requests,
//! samples the capture button, runs the deferred task if one was queued,
//! then drains console input. A
//! burst started from either front end keeps the HTTP server polled between
//! shots through the same `service` hook.

use anyhow::Result;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::api::{ApiConfig, HttpServer};
use crate::burst::{BurstController, BurstRequest};
use crate::config::NodeConfig;
use crate::console::Console;
use crate::context::{DeferredTask, DeviceContext};
use crate::filestore::FileStore;
use crate::sensor::{self, FrameSource};
use crate::storage::DirBlockStore;
use crate::trigger::{self, CaptureButton};

pub const LOOP_INTERVAL: Duration = Duration::from_millis(10);
pub const MOUNT_RETRY_DELAY: Duration = Duration::from_millis(500);

pub struct Runtime<W: Write> {
    ctx: DeviceContext,
    server: Option<HttpServer>,
    console: Option<Console<W>>,
    button: Option<CaptureButton>,
}

impl<W: Write> Runtime<W> {
    pub fn new(ctx: DeviceContext, server: Option<HttpServer>, console: Option<Console<W>>) -> Self {
        Self {
            ctx,
            server,
            console,
            button: None,
        }
    }

    pub fn with_button(mut self, button: CaptureButton) -> Self {
        self.button = Some(button);
        self
    }

    /// Bring up camera, storage and HTTP. Camera and storage failures are
    /// logged and the node keeps running without them.
    pub fn boot(config: &NodeConfig, console: Option<Console<W>>) -> Result<Self> {
        let settings = config.device_settings()?;
        let burst_defaults = config.burst_defaults()?;

        let driver = sensor::open_driver(&config.sensor)?;
        let mut source = FrameSource::new(driver, config.sensor.reinit_delay);
        match source.initialize(&settings) {
            Ok(_) => match source.acquire() {
                Some(frame) => log::info!("camera test capture ok: {} bytes", frame.len()),
                None => log::warn!("camera test capture returned no frame"),
            },
            Err(err) => {
                log::error!("camera init failed: {err}");
                log::warn!("continuing without camera");
            }
        }

        let store = match DirBlockStore::mount(
            &config.storage.root,
            config.storage.mount_attempts,
            MOUNT_RETRY_DELAY,
        ) {
            Ok(backend) => FileStore::new(Box::new(backend), config.storage.scan),
            Err(err) => {
                log::error!("storage mount failed: {err}");
                log::warn!("continuing without storage; captures will fail");
                FileStore::absent(config.storage.scan)
            }
        };
        log::info!("storage: {}", store.describe());

        let server = match &config.http_addr {
            Some(addr) => {
                let api = ApiConfig {
                    addr: addr.clone(),
                    burst_defaults,
                };
                match HttpServer::bind(&api) {
                    Ok(server) => Some(server),
                    Err(err) => {
                        log::error!("http server failed to start: {err}");
                        None
                    }
                }
            }
            None => {
                log::info!("http server disabled");
                None
            }
        };

        let button = match trigger::open_button(&config.trigger) {
            Ok(button) => button,
            Err(err) => {
                log::error!("capture button unavailable: {err}");
                None
            }
        };

        let mut console = console;
        if let Some(console) = console.as_mut() {
            console.set_http_addr(server.as_ref().map(HttpServer::local_addr));
            console.print_main_menu()?;
        }

        let ctx = DeviceContext::new(settings, source, store);
        let mut runtime = Self::new(ctx, server, console);
        runtime.button = button;
        Ok(runtime)
    }

    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut DeviceContext {
        &mut self.ctx
    }

    pub fn server(&self) -> Option<&HttpServer> {
        self.server.as_ref()
    }

    pub fn console(&self) -> Option<&Console<W>> {
        self.console.as_ref()
    }

    /// One pass of the main loop.
    pub fn tick(&mut self) -> Result<()> {
        if let Some(server) = self.server.as_mut() {
            server.poll(&mut self.ctx)?;
        }
        self.poll_button(Instant::now())?;
        self.run_pending();

        let Self {
            ctx,
            server,
            console,
            ..
        } = self;
        if let Some(console) = console.as_mut() {
            while let Some(line) = console.next_line() {
                console.handle_line(&line, ctx, &mut service(server))?;
            }
        }
        Ok(())
    }

    fn poll_button(&mut self, now: Instant) -> Result<()> {
        let Some(button) = self.button.as_mut() else {
            return Ok(());
        };
        if !button.poll(now) {
            return Ok(());
        }
        log::info!("capture button pressed");
        match self.console.as_mut() {
            Some(console) => console.button_capture(&mut self.ctx)?,
            None => match self.ctx.capture() {
                Ok(report) => log::info!("button capture saved /{}", report.filename),
                Err(err) => log::warn!("button capture failed ({}): {err}", err.kind()),
            },
        }
        Ok(())
    }

    /// Run the queued task, if any, to completion.
    pub fn run_pending(&mut self) {
        let Some(task) = self.ctx.take_pending() else {
            return;
        };
        match task {
            DeferredTask::Capture => match self.ctx.capture() {
                Ok(report) => log::info!("http capture saved /{}", report.filename),
                Err(err) => log::warn!("http capture failed ({}): {err}", err.kind()),
            },
            DeferredTask::Burst(request) => {
                run_burst(&mut self.ctx, &mut self.server, request);
            }
        }
    }

    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        log::info!("entering main loop");
        while !shutdown.load(Ordering::SeqCst) {
            if let Err(err) = self.tick() {
                log::warn!("main loop: {err}");
            }
            std::thread::sleep(LOOP_INTERVAL);
        }
        log::info!("shutting down");
        self.ctx.source.deinitialize();
        Ok(())
    }
}

fn run_burst(ctx: &mut DeviceContext, server: &mut Option<HttpServer>, request: BurstRequest) {
    BurstController::run(ctx, request, service(server));
}

/// Service hook handed to bursts: poll the HTTP server if there is one.
fn service(server: &mut Option<HttpServer>) -> impl FnMut(&mut DeviceContext) + '_ {
    move |ctx| {
        if let Some(server) = server.as_mut() {
            if let Err(err) = server.poll(ctx) {
                log::warn!("http poll during burst: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filestore::ScanPolicy;
    use crate::sensor::{SyntheticConfig, SyntheticSensor};
    use crate::settings::{ByteOrder, DeviceSettings, PixelLayout, Quality, Resolution};
    use crate::storage::MemoryBlockStore;
    use crate::trigger::{Debouncer, StubButton};

    fn context() -> DeviceContext {
        let settings = DeviceSettings::new(
            Quality::DEFAULT,
            Resolution::Qqvga,
            PixelLayout::Jpeg,
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

    fn console() -> Console<Vec<u8>> {
        Console::new(Vec::new(), BurstRequest::new(2, 0.1).unwrap())
    }

    fn tick_for(runtime: &mut Runtime<Vec<u8>>, ticks: usize) {
        for _ in 0..ticks {
            runtime.tick().unwrap();
            std::thread::sleep(Duration::from_millis(3));
        }
    }

    #[test]
    fn button_press_captures_once() {
        let stub = StubButton::new();
        let handle = stub.handle();
        let button = CaptureButton::new(
            Box::new(stub),
            Debouncer::new(Duration::from_millis(1), Duration::from_millis(100)),
        );
        let mut runtime = Runtime::new(context(), None, Some(console())).with_button(button);

        tick_for(&mut runtime, 3);
        assert_eq!(runtime.context().store.enumerate().count(), 0);

        handle.press();
        tick_for(&mut runtime, 5);
        assert_eq!(runtime.context().store.enumerate().count(), 1);

        // still held: no repeat
        tick_for(&mut runtime, 5);
        assert_eq!(runtime.context().store.enumerate().count(), 1);

        handle.release();
        tick_for(&mut runtime, 3);
        std::thread::sleep(Duration::from_millis(120));
        handle.press();
        tick_for(&mut runtime, 5);
        assert_eq!(runtime.context().store.enumerate().count(), 2);

        let out = String::from_utf8_lossy(runtime.console().unwrap().output()).into_owned();
        assert_eq!(out.matches("Button pressed").count(), 2);
        assert!(out.contains("Saved /2.jpg"));
    }

    #[test]
    fn button_works_without_a_console() {
        let stub = StubButton::new();
        let handle = stub.handle();
        let button = CaptureButton::new(
            Box::new(stub),
            Debouncer::new(Duration::from_millis(1), Duration::from_millis(100)),
        );
        let mut runtime: Runtime<Vec<u8>> = Runtime::new(context(), None, None).with_button(button);
        handle.press();
        tick_for(&mut runtime, 5);
        assert_eq!(runtime.context().store.enumerate().count(), 1);
    }

    #[test]
    fn tick_runs_the_deferred_capture() {
        let mut runtime: Runtime<Vec<u8>> = Runtime::new(context(), None, None);
        runtime
            .context_mut()
            .enqueue(DeferredTask::Capture)
            .unwrap();
        runtime.tick().unwrap();
        assert!(runtime.context().pending().is_none());
        assert_eq!(runtime.context().store.enumerate().count(), 1);
    }
}
