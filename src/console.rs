//! Line-oriented serial console.
//!
//! Stdin is read on a helper thread and handed over a channel, so the main
//! loop only ever sees whole lines and never blocks on input. Everything the
//! console prints goes to its `Write` sink.

use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, TryRecvError};

use crate::burst::{BurstController, BurstRequest};
use crate::context::{DeviceContext, GeometryChange};
use crate::menu::{ConfigMenu, MenuOutcome, MenuState};
use crate::settings::Resolution;

pub struct Console<W: Write> {
    out: W,
    menu: ConfigMenu,
    input: Option<Receiver<String>>,
    burst: BurstRequest,
    http_addr: Option<SocketAddr>,
}

impl<W: Write> Console<W> {
    /// A console with no input source. Lines are fed via `handle_line`.
    pub fn new(out: W, burst: BurstRequest) -> Self {
        Self {
            out,
            menu: ConfigMenu::new(),
            input: None,
            burst,
            http_addr: None,
        }
    }

    /// A console reading lines from process stdin.
    pub fn with_stdin(out: W, burst: BurstRequest) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("console-stdin".to_string())
            .spawn(move || {
                let stdin = io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })?;
        let mut console = Self::new(out, burst);
        console.input = Some(rx);
        Ok(console)
    }

    pub fn set_http_addr(&mut self, addr: Option<SocketAddr>) {
        self.http_addr = addr;
    }

    pub fn menu_state(&self) -> MenuState {
        self.menu.state()
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    /// Next pending input line, if any. Never blocks.
    pub fn next_line(&mut self) -> Option<String> {
        let rx = self.input.as_ref()?;
        match rx.try_recv() {
            Ok(line) => Some(line),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                log::info!("console input closed");
                self.input = None;
                None
            }
        }
    }

    pub fn print_main_menu(&mut self) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "=== Camera Console ===")?;
        writeln!(self.out, "c - capture image")?;
        writeln!(
            self.out,
            "b - burst capture ({} images, {:.1}s interval)",
            self.burst.count(),
            self.burst.interval().as_secs_f64()
        )?;
        writeln!(self.out, "s - settings menu")?;
        writeln!(self.out, "l - list images")?;
        writeln!(self.out, "d - delete all images")?;
        writeln!(self.out, "w - show web address")?;
        writeln!(self.out, "h - help")?;
        Ok(())
    }

    fn print_settings(&mut self, ctx: &DeviceContext) -> io::Result<()> {
        let s = *ctx.settings();
        writeln!(self.out)?;
        writeln!(self.out, "=== Settings ===")?;
        writeln!(self.out, "1 - resolution   (current: {})", s.resolution())?;
        writeln!(self.out, "2 - quality      (current: {})", s.quality())?;
        writeln!(self.out, "3 - pixel format (current: {})", s.layout())?;
        writeln!(self.out, "4 - endianness   (current: {})", s.byte_order())?;
        writeln!(self.out, "c - capture with current settings")?;
        Ok(())
    }

    fn print_submenu(&mut self, state: MenuState) -> io::Result<()> {
        match state {
            MenuState::AwaitingResolution => {
                writeln!(self.out, "Select resolution:")?;
                for res in Resolution::ALL {
                    writeln!(self.out, "{} - {}", res.index(), res)?;
                }
            }
            MenuState::AwaitingQuality => {
                writeln!(self.out, "Enter quality (0-63, lower is better):")?;
            }
            MenuState::AwaitingFormat => {
                writeln!(self.out, "Select pixel format:")?;
                writeln!(self.out, "0 - RGB (JPEG)")?;
                writeln!(self.out, "1 - Grayscale")?;
                writeln!(self.out, "2 - RGB565")?;
            }
            MenuState::AwaitingEndianness => {
                writeln!(self.out, "Select endianness (RGB565 only):")?;
                writeln!(self.out, "1 - Little Endian")?;
                writeln!(self.out, "2 - Big Endian")?;
            }
            MenuState::Idle => {}
        }
        Ok(())
    }

    /// Process one input line. `service` is called between burst shots.
    pub fn handle_line(
        &mut self,
        line: &str,
        ctx: &mut DeviceContext,
        service: &mut dyn FnMut(&mut DeviceContext),
    ) -> io::Result<()> {
        let input = line.trim();
        let Some(first) = input.chars().next() else {
            return Ok(());
        };

        if !self.menu.is_idle() {
            if input.eq_ignore_ascii_case("c") {
                self.capture(ctx)?;
                return self.print_submenu(self.menu.state());
            }
            let outcome = self.menu.submit(input, ctx);
            self.report(outcome)?;
            return self.print_settings(ctx);
        }

        if input.chars().count() == 1 {
            if let Some(state) = self.menu.select(first) {
                return self.print_submenu(state);
            }
        }

        match first.to_ascii_lowercase() {
            'c' => self.capture(ctx),
            'b' => self.burst(ctx, service),
            's' => {
                self.menu.reset();
                self.print_settings(ctx)
            }
            'l' => self.list(ctx),
            'd' => {
                let deleted = ctx.store.delete_all();
                writeln!(self.out, "Deleted {deleted} images")
            }
            'w' => match self.http_addr {
                Some(addr) => writeln!(self.out, "Web interface: http://{addr}/"),
                None => writeln!(self.out, "Web interface disabled"),
            },
            'h' => self.print_main_menu(),
            other => writeln!(self.out, "Unknown command '{other}' (h for help)"),
        }
    }

    /// Capture started by the hardware button rather than a typed command.
    pub fn button_capture(&mut self, ctx: &mut DeviceContext) -> io::Result<()> {
        writeln!(self.out, "Button pressed")?;
        self.capture(ctx)
    }

    fn capture(&mut self, ctx: &mut DeviceContext) -> io::Result<()> {
        match ctx.capture() {
            Ok(report) => writeln!(
                self.out,
                "Saved /{} ({} bytes)",
                report.filename, report.bytes
            ),
            Err(err) => writeln!(self.out, "Capture failed [{}]: {err}", err.kind()),
        }
    }

    fn burst(
        &mut self,
        ctx: &mut DeviceContext,
        service: &mut dyn FnMut(&mut DeviceContext),
    ) -> io::Result<()> {
        if !ctx.store.is_present() {
            return writeln!(self.out, "Burst unavailable: no storage");
        }
        if ctx.burst.in_progress {
            return writeln!(self.out, "Burst already in progress");
        }
        writeln!(
            self.out,
            "Starting burst: {} images at {:.1}s interval",
            self.burst.count(),
            self.burst.interval().as_secs_f64()
        )?;
        let summary = BurstController::run(ctx, self.burst, service);
        writeln!(
            self.out,
            "Burst complete: {} of {} saved",
            summary.succeeded, summary.attempted
        )
    }

    fn list(&mut self, ctx: &DeviceContext) -> io::Result<()> {
        if !ctx.store.is_present() {
            return writeln!(self.out, "No storage");
        }
        let mut count = 0;
        let mut total = 0u64;
        for image in ctx.store.enumerate() {
            writeln!(self.out, "/{} ({} bytes)", image.filename, image.size)?;
            count += 1;
            total += image.size;
        }
        if count == 0 {
            return writeln!(self.out, "No images found");
        }
        writeln!(self.out, "Total: {count} images ({total} bytes)")
    }

    fn report(&mut self, outcome: MenuOutcome) -> io::Result<()> {
        match outcome {
            MenuOutcome::ResolutionApplied(res, change) => {
                writeln!(self.out, "Resolution set to {res}")?;
                self.report_geometry(change)
            }
            MenuOutcome::QualityApplied(q) => writeln!(self.out, "Quality set to {q}"),
            MenuOutcome::FormatApplied(layout, change) => {
                writeln!(self.out, "Pixel format set to {layout}")?;
                self.report_geometry(change)
            }
            MenuOutcome::ByteOrderApplied(order) => writeln!(self.out, "Endianness set to {order}"),
            MenuOutcome::Rejected(err) => writeln!(self.out, "{err}"),
            MenuOutcome::Ignored => Ok(()),
        }
    }

    fn report_geometry(&mut self, change: GeometryChange) -> io::Result<()> {
        match change {
            GeometryChange::Unchanged => writeln!(self.out, "(no change)"),
            GeometryChange::Reinitialized => writeln!(self.out, "Camera reinitialized"),
            GeometryChange::ReinitFailed(err) => {
                writeln!(self.out, "Camera reinit failed: {err}")
            }
        }
    }
}
