//! Console settings menu.
//!
//! `Idle` plus one `Awaiting*` state per setting. A digit selects a submenu
//! from `Idle`; the next line is parsed as the value, applied through
//! `DeviceContext`, and the menu returns to `Idle` whether or not the value
//! was accepted. Capture while a submenu is open is handled by the console
//! and leaves the state untouched.

use crate::context::{DeviceContext, GeometryChange};
use crate::error::ValidationError;
use crate::settings::{ByteOrder, PixelLayout, Quality, Resolution};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MenuState {
    #[default]
    Idle,
    AwaitingResolution,
    AwaitingQuality,
    AwaitingFormat,
    AwaitingEndianness,
}

#[derive(Debug)]
pub enum MenuOutcome {
    ResolutionApplied(Resolution, GeometryChange),
    QualityApplied(Quality),
    FormatApplied(PixelLayout, GeometryChange),
    ByteOrderApplied(ByteOrder),
    Rejected(ValidationError),
    /// No submenu was open.
    Ignored,
}

#[derive(Debug, Default)]
pub struct ConfigMenu {
    state: MenuState,
}

impl ConfigMenu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MenuState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == MenuState::Idle
    }

    pub fn reset(&mut self) {
        self.state = MenuState::Idle;
    }

    /// Open a submenu from `Idle`. `'1'`..`'4'`; anything else is `None`.
    pub fn select(&mut self, option: char) -> Option<MenuState> {
        if !self.is_idle() {
            return None;
        }
        let next = match option {
            '1' => MenuState::AwaitingResolution,
            '2' => MenuState::AwaitingQuality,
            '3' => MenuState::AwaitingFormat,
            '4' => MenuState::AwaitingEndianness,
            _ => return None,
        };
        self.state = next;
        Some(next)
    }

    /// Apply a value line for the open submenu, then return to `Idle`.
    pub fn submit(&mut self, input: &str, ctx: &mut DeviceContext) -> MenuOutcome {
        let state = std::mem::take(&mut self.state);
        if state == MenuState::Idle {
            return MenuOutcome::Ignored;
        }
        let raw = input.trim();
        let value = match raw.parse::<i64>() {
            Ok(v) => v,
            Err(_) => return MenuOutcome::Rejected(ValidationError::NotANumber(raw.to_string())),
        };
        match state {
            MenuState::AwaitingResolution => match Resolution::from_index(value) {
                Ok(res) => MenuOutcome::ResolutionApplied(res, ctx.set_resolution(res)),
                Err(err) => MenuOutcome::Rejected(err),
            },
            MenuState::AwaitingQuality => match Quality::new(value) {
                Ok(q) => {
                    ctx.set_quality(q);
                    MenuOutcome::QualityApplied(q)
                }
                Err(err) => MenuOutcome::Rejected(err),
            },
            MenuState::AwaitingFormat => match PixelLayout::from_index(value) {
                Ok(layout) => MenuOutcome::FormatApplied(layout, ctx.set_pixel_layout(layout)),
                Err(err) => MenuOutcome::Rejected(err),
            },
            // console numbering: 1 = little, 2 = big
            MenuState::AwaitingEndianness => {
                let order = match value {
                    1 => ByteOrder::Little,
                    2 => ByteOrder::Big,
                    other => return MenuOutcome::Rejected(ValidationError::ByteOrderOutOfRange(other)),
                };
                ctx.set_byte_order(order);
                MenuOutcome::ByteOrderApplied(order)
            }
            MenuState::Idle => MenuOutcome::Ignored,
        }
    }
}
