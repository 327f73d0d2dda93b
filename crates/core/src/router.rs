//! Config and command documents applied to the fade engine.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::commands::{interval_to_duration_ms, CommandDocument, ConfigDocument, LevelRequest, DEFAULT_FADE_INTERVAL_US};
use crate::error::{AddressError, RouterError};
use crate::fade::FadeEngine;
use crate::mapping::ChannelSpec;
use crate::output::MAX_WIDTH;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConfigReport {
    pub channels: usize,
    pub rejected: Vec<AddressError>,
    pub groups: Option<usize>,
    pub default_fade_ms: Option<u64>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CommandReport {
    /// Outputs a fade was started on, in command order.
    pub fades: Vec<usize>,
    pub rejected: Vec<AddressError>,
    pub restart: bool,
}

pub struct Router {
    groups: HashMap<String, Vec<i64>>,
    default_fade_ms: u64,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(interval_to_duration_ms(DEFAULT_FADE_INTERVAL_US))
    }
}

impl Router {
    pub fn new(default_fade_ms: u64) -> Self {
        Self { groups: HashMap::new(), default_fade_ms }
    }

    pub fn default_fade_ms(&self) -> u64 { self.default_fade_ms }

    pub fn group(&self, name: &str) -> Option<&[i64]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    pub fn handle_config(&mut self, doc: &Value, engine: &mut FadeEngine) -> Result<ConfigReport, RouterError> {
        let config = ConfigDocument::deserialize(doc)?;
        let mut report = ConfigReport::default();

        if !config.channels.is_empty() {
            let specs: Vec<ChannelSpec> = config
                .channels
                .iter()
                .map(|c| ChannelSpec { controller: c.controller, channel: c.strip, width: c.count.unwrap_or(0) })
                .collect();
            report.rejected = engine.configure(&specs);
            report.channels = specs.len();
        }

        if let Some(fade_ms) = config.fade_ms() {
            self.default_fade_ms = fade_ms;
            report.default_fade_ms = Some(fade_ms);
        }

        if let Some(groups) = config.groups {
            report.groups = Some(groups.len());
            self.groups = groups;
        }

        info!(
            channels = report.channels,
            rejected = report.rejected.len(),
            groups = ?report.groups,
            default_fade_ms = self.default_fade_ms,
            "config applied"
        );
        Ok(report)
    }

    pub fn handle_command(&mut self, doc: &Value, engine: &mut FadeEngine, now_ms: u64) -> Result<CommandReport, RouterError> {
        let command = CommandDocument::deserialize(doc)?;
        let members = match &command.group {
            Some(name) => Some(self.groups.get(name).ok_or_else(|| RouterError::UnknownGroup(name.clone()))?.clone()),
            None => None,
        };

        let mut report = CommandReport { restart: command.restart, ..CommandReport::default() };
        let layout = engine.layout();
        let fade_ms = command.fade.unwrap_or(self.default_fade_ms);

        for channel in &command.channels {
            let result = layout.resolve(channel.controller, channel.strip).map(|a| layout.index_of(a)).and_then(|index| {
                match LevelRequest::from_fields(channel.state, channel.brightness, channel.colour.as_deref()) {
                    Some(request) => {
                        let fade_ms = channel.fade_ms().unwrap_or(fade_ms);
                        self.apply(engine, index, &request, fade_ms, now_ms).map(|_| Some(index))
                    }
                    None => Ok(None),
                }
            });
            self.record(&mut report, result);
        }

        let request = LevelRequest::from_fields(command.state, command.brightness, None);
        let targets: Vec<i64> = match (members, command.output) {
            (Some(members), _) => members,
            (None, Some(output)) => vec![output],
            (None, None) => Vec::new(),
        };
        match request {
            Some(request) => {
                for raw in targets {
                    let result = layout.output(raw).and_then(|index| self.apply(engine, index, &request, fade_ms, now_ms).map(|_| Some(index)));
                    self.record(&mut report, result);
                }
            }
            None if !targets.is_empty() => debug!(?targets, "command names outputs but no state or brightness"),
            None => {}
        }

        Ok(report)
    }

    fn record(&self, report: &mut CommandReport, result: Result<Option<usize>, AddressError>) {
        match result {
            Ok(Some(index)) => report.fades.push(index),
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "skipping command entry");
                report.rejected.push(err);
            }
        }
    }

    /// Start the fade that `request` describes on one output.
    pub fn apply(&self, engine: &mut FadeEngine, index: usize, request: &LevelRequest, fade_ms: u64, now_ms: u64) -> Result<(), AddressError> {
        let resolution = engine.resolution();
        match request {
            LevelRequest::On => {
                let levels = engine
                    .output(index)
                    .and_then(|o| o.on_levels().copied())
                    .unwrap_or([resolution.max(); MAX_WIDTH]);
                engine.start_fade_levels(index, levels, fade_ms, now_ms)
            }
            LevelRequest::Off => engine.start_fade(index, 0, fade_ms, now_ms),
            LevelRequest::Brightness(percent) => engine.start_fade(index, resolution.from_percent(*percent), fade_ms, now_ms),
            LevelRequest::Colour(values) => {
                let mut levels = [0; MAX_WIDTH];
                for (lane, value) in values.iter().take(MAX_WIDTH).enumerate() {
                    levels[lane] = resolution.from_u8(*value);
                }
                engine.start_fade_levels(index, levels, fade_ms, now_ms)
            }
        }
    }
}
