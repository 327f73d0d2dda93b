//! Logical outputs and the controller layout they are addressed through.
//!
//! Outputs are numbered 1-based across all controllers:
//! `index = (controller - 1) * channels_per_controller + channel`.

use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// A single output spans at most this many physical PWM lanes.
pub const MAX_WIDTH: usize = 5;

/// One level per lane; lanes past the output's width are always zero.
pub type Levels = [u16; MAX_WIDTH];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// 0..=255
    Bits8,
    /// 0..=4095, PCA9685 native
    Bits12,
}

impl Resolution {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            8 => Some(Resolution::Bits8),
            12 => Some(Resolution::Bits12),
            _ => None,
        }
    }

    pub fn max(self) -> u16 {
        match self {
            Resolution::Bits8 => 255,
            Resolution::Bits12 => 4095,
        }
    }

    /// Scale an 8-bit colour component to this resolution.
    pub fn from_u8(self, value: u8) -> u16 {
        (u32::from(value) * u32::from(self.max()) / 255) as u16
    }

    /// Scale a 0-100 brightness, clamped, to this resolution.
    pub fn from_percent(self, percent: u8) -> u16 {
        let percent = u32::from(percent.min(100));
        ((percent * u32::from(self.max()) + 50) / 100) as u16
    }

    /// Inverse of [`Resolution::from_percent`], rounded to nearest.
    pub fn to_percent(self, value: u16) -> u8 {
        let max = u32::from(self.max());
        ((u32::from(value.min(self.max())) * 100 + max / 2) / max) as u8
    }
}

/// Controller/channel counts fixed at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub controllers: u8,
    pub channels_per_controller: u8,
}

/// A validated 1-based (controller, channel) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogicalAddress {
    pub controller: u8,
    pub channel: u8,
}

impl Layout {
    pub fn new(controllers: u8, channels_per_controller: u8) -> Self {
        Self { controllers: controllers.max(1), channels_per_controller: channels_per_controller.max(1) }
    }

    pub fn output_count(&self) -> usize {
        usize::from(self.controllers) * usize::from(self.channels_per_controller)
    }

    /// Validate raw document values. With a single controller the
    /// controller field is not required and is ignored when present.
    pub fn resolve(&self, controller: Option<i64>, channel: Option<i64>) -> Result<LogicalAddress, AddressError> {
        let controller = if self.controllers == 1 {
            1
        } else {
            let raw = controller.ok_or(AddressError::MissingController)?;
            if raw < 1 || raw > i64::from(self.controllers) {
                return Err(AddressError::InvalidController(raw));
            }
            raw as u8
        };
        let raw = channel.ok_or(AddressError::MissingChannel)?;
        if raw < 1 || raw > i64::from(self.channels_per_controller) {
            return Err(AddressError::InvalidChannel(raw));
        }
        Ok(LogicalAddress { controller, channel: raw as u8 })
    }

    pub fn index_of(&self, address: LogicalAddress) -> usize {
        usize::from(address.controller - 1) * usize::from(self.channels_per_controller) + usize::from(address.channel)
    }

    pub fn address_of(&self, index: usize) -> Option<LogicalAddress> {
        if index == 0 || index > self.output_count() {
            return None;
        }
        let per = usize::from(self.channels_per_controller);
        Some(LogicalAddress {
            controller: ((index - 1) / per + 1) as u8,
            channel: ((index - 1) % per + 1) as u8,
        })
    }

    /// Validate a raw 1-based output index from a command.
    pub fn output(&self, raw: i64) -> Result<usize, AddressError> {
        if raw < 1 || raw as u64 > self.output_count() as u64 {
            return Err(AddressError::InvalidOutput(raw));
        }
        Ok(raw as usize)
    }
}

/// Per-output fade state. Owned by the fade engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    index: usize,
    pub(crate) width: u8,
    pub(crate) start: Levels,
    pub(crate) current: Levels,
    pub(crate) target: Levels,
    pub(crate) fade_start_ms: u64,
    pub(crate) duration_ms: u64,
    /// Last non-zero target, restored by a bare ON.
    pub(crate) on_levels: Option<Levels>,
    pub(crate) report_pending: bool,
}

impl Output {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            width: 0,
            start: [0; MAX_WIDTH],
            current: [0; MAX_WIDTH],
            target: [0; MAX_WIDTH],
            fade_start_ms: 0,
            duration_ms: 0,
            on_levels: None,
            report_pending: false,
        }
    }

    pub fn index(&self) -> usize { self.index }
    pub fn width(&self) -> u8 { self.width }
    pub fn current(&self) -> &Levels { &self.current }
    pub fn target(&self) -> &Levels { &self.target }
    pub fn on_levels(&self) -> Option<&Levels> { self.on_levels.as_ref() }

    pub fn is_configured(&self) -> bool { self.width > 0 }
    pub fn is_fading(&self) -> bool { self.current != self.target }

    /// Set a new width and return to the unlit, uncached state.
    pub(crate) fn reset(&mut self, width: u8) {
        *self = Self { width, ..Self::new(self.index) };
    }

    /// Highest lane level, used as the output's single brightness figure.
    pub fn level(&self) -> u16 {
        self.current.iter().copied().max().unwrap_or(0)
    }

    /// Levels restricted to the configured lanes.
    pub(crate) fn mask(&self, mut levels: Levels) -> Levels {
        for lane in usize::from(self.width)..MAX_WIDTH {
            levels[lane] = 0;
        }
        levels
    }
}
