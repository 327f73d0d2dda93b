use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// Config and command document shapes. Addresses are kept as raw integers so
// an out-of-range entry is rejected on its own instead of failing the whole
// document.

/// Steps in a full-range crossfade when pacing is given per step.
pub const FADE_STEPS: u64 = 255;

pub const DEFAULT_FADE_INTERVAL_US: u64 = 500;

/// Convert a per-step interval in microseconds to a whole-fade duration.
pub fn interval_to_duration_ms(interval_us: u64) -> u64 {
    interval_us.saturating_mul(FADE_STEPS) / 1000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum PowerState {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

impl TryFrom<String> for PowerState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.eq_ignore_ascii_case("on") {
            Ok(PowerState::On)
        } else if value.eq_ignore_ascii_case("off") {
            Ok(PowerState::Off)
        } else {
            Err(format!("invalid state {:?}, expected \"on\" or \"off\"", value))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    pub fade_interval_us: Option<u64>,
    pub fade_duration_ms: Option<u64>,
    pub groups: Option<HashMap<String, Vec<i64>>>,
}

impl ConfigDocument {
    /// Default fade duration carried by this document, if any.
    pub fn fade_ms(&self) -> Option<u64> {
        self.fade_duration_ms.or(self.fade_interval_us.map(interval_to_duration_ms))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChannelConfig {
    pub controller: Option<i64>,
    pub strip: Option<i64>,
    pub count: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDocument {
    #[serde(default)]
    pub channels: Vec<ChannelCommand>,
    pub group: Option<String>,
    pub output: Option<i64>,
    pub state: Option<PowerState>,
    pub brightness: Option<i64>,
    /// milliseconds
    pub fade: Option<u64>,
    #[serde(default)]
    pub restart: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCommand {
    pub controller: Option<i64>,
    pub strip: Option<i64>,
    pub state: Option<PowerState>,
    pub brightness: Option<i64>,
    pub colour: Option<Vec<i64>>,
    pub fade_interval_us: Option<u64>,
    pub fade: Option<u64>,
}

impl ChannelCommand {
    pub fn fade_ms(&self) -> Option<u64> {
        self.fade.or(self.fade_interval_us.map(interval_to_duration_ms))
    }
}

/// What a command asks an output to become.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelRequest {
    /// Restore the cached on-levels (full brightness if none).
    On,
    Off,
    /// 0-100
    Brightness(u8),
    /// One 0-255 value per lane.
    Colour(Vec<u8>),
}

impl LevelRequest {
    /// Explicit values win over a bare state.
    pub fn from_fields(state: Option<PowerState>, brightness: Option<i64>, colour: Option<&[i64]>) -> Option<Self> {
        if let Some(colour) = colour {
            return Some(LevelRequest::Colour(colour.iter().map(|&c| c.clamp(0, 255) as u8).collect()));
        }
        if let Some(brightness) = brightness {
            return Some(LevelRequest::Brightness(brightness.clamp(0, 100) as u8));
        }
        match state? {
            PowerState::On => Some(LevelRequest::On),
            PowerState::Off => Some(LevelRequest::Off),
        }
    }
}
