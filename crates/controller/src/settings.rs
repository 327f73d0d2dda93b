use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use ledc_core::Resolution;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub controllers: u8,
    pub channels_per_controller: u8,
    pub resolution: Resolution,
    pub loop_interval_ms: u64,
    /// Overrides the 127 ms fade used when a command names no duration.
    pub default_fade_ms: Option<u64>,
    /// JSON config document applied before the first connect.
    pub config_file: Option<PathBuf>,
    /// 0 disables periodic telemetry.
    pub telemetry_secs: u64,
    pub pwm_frequency_hz: u32,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            controllers: 8,
            channels_per_controller: 16,
            resolution: Resolution::Bits12,
            loop_interval_ms: 5,
            default_fade_ms: None,
            config_file: None,
            telemetry_secs: 60,
            pwm_frequency_hz: 1000,
        }
    }
}

impl ControllerSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|v| parse::<u64>(&v));
        let mut cfg = ControllerSettings::default();

        if let Some(n) = lookup("LEDC_CONTROLLERS").and_then(|v| parse::<u8>(&v)).filter(|n| (1..=8).contains(n)) {
            cfg.controllers = n;
        }
        if let Some(n) = lookup("LEDC_CHANNELS_PER_CONTROLLER").and_then(|v| parse::<u8>(&v)).filter(|n| (1..=16).contains(n)) {
            cfg.channels_per_controller = n;
        }
        if let Some(r) = lookup("LEDC_RESOLUTION_BITS").and_then(|v| parse::<u8>(&v)).and_then(Resolution::from_bits) {
            cfg.resolution = r;
        }
        if let Some(ms) = parsed("LEDC_LOOP_INTERVAL_MS") {
            cfg.loop_interval_ms = ms;
        }
        cfg.default_fade_ms = parsed("LEDC_DEFAULT_FADE_MS");
        cfg.config_file = lookup("LEDC_CONFIG_FILE").filter(|v| !v.is_empty()).map(PathBuf::from);
        if let Some(s) = parsed("LEDC_TELEMETRY_SECS") {
            cfg.telemetry_secs = s;
        }
        if let Some(hz) = lookup("LEDC_PWM_FREQUENCY_HZ").and_then(|v| parse::<u32>(&v)) {
            cfg.pwm_frequency_hz = hz;
        }
        cfg
    }
}

fn parse<T: FromStr>(value: &str) -> Option<T> {
    value.trim().parse().ok()
}
