//! N-shot burst capture.
//!
//! A burst is a `BurstTask` stepped by `poll`: each step either takes one
//! shot, reports how long until the next one is due, or finishes. The
//! `BurstController` drives a task to completion and calls a service hook in
//! short slices while waiting, so the HTTP front end keeps being served for
//! the whole burst. Individual shot failures are logged and skipped.

use serde::Serialize;
use std::time::{Duration, Instant};

use crate::context::DeviceContext;
use crate::error::{CaptureError, ValidationError};
use crate::pipeline::CaptureReport;

pub const MIN_COUNT: u32 = 1;
pub const MAX_COUNT: u32 = 200;
pub const MIN_INTERVAL_SECS: f64 = 0.1;
pub const MAX_INTERVAL_SECS: f64 = 5.0;

/// Longest stretch the service hook can go uncalled during a burst wait.
pub const SERVICE_SLICE: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BurstRequest {
    count: u32,
    interval: Duration,
}

impl BurstRequest {
    pub fn new(count: i64, interval_secs: f64) -> Result<Self, ValidationError> {
        if !(MIN_COUNT as i64..=MAX_COUNT as i64).contains(&count) {
            return Err(ValidationError::BurstCount(count));
        }
        if !interval_secs.is_finite() || !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&interval_secs) {
            return Err(ValidationError::BurstInterval(interval_secs));
        }
        Ok(Self {
            count: count as u32,
            interval: Duration::from_secs_f64(interval_secs),
        })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Progress record polled by `/burststatus`. All zero when idle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BurstState {
    pub in_progress: bool,
    pub current: u32,
    pub total: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BurstSummary {
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
}

#[derive(Debug)]
pub enum BurstStep {
    Shot {
        index: u32,
        result: Result<CaptureReport, CaptureError>,
    },
    Waiting(Duration),
    Done(BurstSummary),
}

pub struct BurstTask {
    request: BurstRequest,
    taken: u32,
    next_due: Option<Instant>,
    summary: BurstSummary,
}

impl BurstTask {
    pub fn start(request: BurstRequest, ctx: &mut DeviceContext) -> Self {
        ctx.burst = BurstState {
            in_progress: true,
            current: 0,
            total: request.count,
        };
        log::info!(
            "starting burst: {} images at {:.1}s interval",
            request.count,
            request.interval.as_secs_f64()
        );
        Self {
            request,
            taken: 0,
            next_due: None,
            summary: BurstSummary::default(),
        }
    }

    pub fn poll(&mut self, ctx: &mut DeviceContext, now: Instant) -> BurstStep {
        if self.taken >= self.request.count {
            return BurstStep::Done(self.finish(ctx));
        }
        if let Some(due) = self.next_due {
            if now < due {
                return BurstStep::Waiting(due - now);
            }
        }

        self.taken += 1;
        ctx.burst.current = self.taken;
        let result = ctx.capture();
        self.summary.attempted += 1;
        match &result {
            Ok(_) => self.summary.succeeded += 1,
            Err(_) => self.summary.failed += 1,
        }
        self.next_due = if self.taken < self.request.count {
            Some(Instant::now() + self.request.interval)
        } else {
            None
        };
        BurstStep::Shot {
            index: self.taken,
            result,
        }
    }

    /// Clear the progress record. Safe to call more than once.
    pub fn finish(&mut self, ctx: &mut DeviceContext) -> BurstSummary {
        ctx.burst = BurstState::default();
        self.taken = self.request.count;
        self.summary
    }
}

pub struct BurstController;

impl BurstController {
    /// Run the whole burst, calling `service` between shots.
    pub fn run<F>(ctx: &mut DeviceContext, request: BurstRequest, mut service: F) -> BurstSummary
    where
        F: FnMut(&mut DeviceContext),
    {
        let mut task = BurstTask::start(request, ctx);
        loop {
            match task.poll(ctx, Instant::now()) {
                BurstStep::Shot { index, result } => match result {
                    Ok(report) => log::info!(
                        "burst image {index}/{} saved as /{}",
                        request.count,
                        report.filename
                    ),
                    Err(err) => log::warn!(
                        "burst image {index}/{} failed ({}): {err}",
                        request.count,
                        err.kind()
                    ),
                },
                BurstStep::Waiting(remaining) => {
                    service(ctx);
                    std::thread::sleep(remaining.min(SERVICE_SLICE));
                }
                BurstStep::Done(summary) => {
                    log::info!(
                        "burst complete: {}/{} saved",
                        summary.succeeded,
                        summary.attempted
                    );
                    return summary;
                }
            }
        }
    }
}
