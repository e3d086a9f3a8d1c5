//! Vertical space bookkeeping for the terminal area.
//!
//! The terminal sits below the chrome (menu toggle button, settings menu,
//! error bar). Each piece of chrome adds its height to the offset; the
//! terminal takes whatever is left.

use std::time::{Duration, Instant};

/// Menu toggle button, padding included.
pub const TOGGLE_MENU_BUTTON_PX: i32 = 16;
/// One row of the settings menu or the error bar.
pub const CONFIG_MENU_ROW_PX: i32 = 40;
pub const CONFIG_MENU_PAD_PX: i32 = 4;
pub const CONFIG_MENU_SIZE_PX: i32 = CONFIG_MENU_ROW_PX + CONFIG_MENU_PAD_PX;

/// How long to let the chrome settle before the terminal is resized.
pub const RESIZE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerminalLayout {
    height_offset_px: i32,
}

impl TerminalLayout {
    pub fn height_offset(&self) -> i32 {
        self.height_offset_px
    }

    pub fn adjust(&mut self, delta_px: i32) {
        self.height_offset_px += delta_px;
    }

    /// CSS-style `top` of the terminal area.
    pub fn top(&self) -> String {
        format!("{}px", self.height_offset_px)
    }

    /// CSS-style height of the terminal area.
    pub fn height(&self) -> String {
        format!("calc(100% - {}px)", self.height_offset_px)
    }

    /// Pixel height left for the terminal inside `viewport`.
    pub fn terminal_height(&self, viewport: Viewport) -> u32 {
        let h = i64::from(viewport.height) - i64::from(self.height_offset_px);
        h.clamp(0, i64::from(u32::MAX)) as u32
    }
}

/// One pending deferred resize. Re-arming pushes the deadline out.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResizeTimer {
    due: Option<Instant>,
}

impl ResizeTimer {
    pub fn arm(&mut self, now: Instant) {
        self.due = Some(now + RESIZE_DELAY);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.due
    }

    /// Returns `true` exactly once when the deadline has passed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.due {
            Some(due) if now >= due => {
                self.due = None;
                true
            }
            _ => false,
        }
    }
}
