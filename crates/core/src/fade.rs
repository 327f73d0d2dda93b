//! Time-based linear fades across every configured output.
//!
//! `tick` is called once per control-loop pass. Outputs whose current level
//! differs from their target are interpolated against a monotonic millisecond
//! clock; lanes are written to hardware only when their value changes.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::commands::PowerState;
use crate::error::AddressError;
use crate::mapping::{ChannelSpec, MappingTable};
use crate::output::{Layout, Levels, Output, Resolution, MAX_WIDTH};
use crate::pwm::PwmDriver;

/// Emitted once when an output settles on its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub output: usize,
    /// 0-100
    pub brightness: u8,
    pub state: PowerState,
}

pub struct FadeEngine {
    resolution: Resolution,
    outputs: Vec<Output>,
    table: MappingTable,
    /// Lane writes owed to hardware after a remap, flushed first on the next tick.
    pending: Vec<(u8, u8, u16)>,
}

impl FadeEngine {
    pub fn new(layout: Layout, resolution: Resolution, pins_per_driver: u8) -> Self {
        Self {
            resolution,
            outputs: (1..=layout.output_count()).map(Output::new).collect(),
            table: MappingTable::new(layout, pins_per_driver),
            pending: Vec::new(),
        }
    }

    pub fn layout(&self) -> Layout { self.table.layout() }
    pub fn resolution(&self) -> Resolution { self.resolution }
    pub fn mapping(&self) -> &MappingTable { &self.table }
    pub fn outputs(&self) -> &[Output] { &self.outputs }

    pub fn output(&self, index: usize) -> Option<&Output> {
        self.outputs.get(index.checked_sub(1)?)
    }

    /// Apply channel definitions; see [`MappingTable::configure`].
    ///
    /// Lanes lit under the old mapping that nothing lights under the new one
    /// are driven to zero on the next tick, and outputs that kept their level
    /// but moved pins are rewritten at their new lanes.
    pub fn configure(&mut self, specs: &[ChannelSpec]) -> Vec<AddressError> {
        let before = self.lit_lanes();
        let rejected = self.table.configure(&mut self.outputs, specs);
        let after = self.lit_lanes();

        for (&(driver, pin), &old) in &before {
            let new = after.get(&(driver, pin)).copied().unwrap_or(0);
            if new != old {
                self.pending.push((driver, pin, new));
            }
        }
        for (&(driver, pin), &new) in &after {
            if !before.contains_key(&(driver, pin)) {
                self.pending.push((driver, pin, new));
            }
        }
        if !self.pending.is_empty() {
            debug!(writes = self.pending.len(), "lanes to update after remap");
        }
        rejected
    }

    /// Non-zero hardware lanes as the current mapping and levels describe them.
    fn lit_lanes(&self) -> BTreeMap<(u8, u8), u16> {
        let mut lanes = BTreeMap::new();
        for output in self.outputs.iter().filter(|o| o.is_configured()) {
            let Some(address) = self.table.get(output.index()) else {
                continue;
            };
            for lane in 0..usize::from(output.width) {
                if output.current[lane] > 0 {
                    lanes.insert((address.driver, address.lane(lane)), output.current[lane]);
                }
            }
        }
        lanes
    }

    /// Fade every lane of `index` to `target`.
    pub fn start_fade(&mut self, index: usize, target: u16, duration_ms: u64, now_ms: u64) -> Result<(), AddressError> {
        self.start_fade_levels(index, [target; MAX_WIDTH], duration_ms, now_ms)
    }

    /// Fade each lane of `index` to its own target. Supersedes any fade in flight.
    pub fn start_fade_levels(&mut self, index: usize, target: Levels, duration_ms: u64, now_ms: u64) -> Result<(), AddressError> {
        let max = self.resolution.max();
        let output = index
            .checked_sub(1)
            .and_then(|i| self.outputs.get_mut(i))
            .ok_or(AddressError::InvalidOutput(index as i64))?;
        if !output.is_configured() {
            debug!(output = index, "output unconfigured; fade has no hardware effect");
        }

        let target = output.mask(target.map(|v| v.min(max)));
        output.start = output.current;
        output.target = target;
        output.fade_start_ms = now_ms;
        output.duration_ms = duration_ms;
        output.report_pending = true;
        if target.iter().any(|&v| v > 0) {
            output.on_levels = Some(target);
        }
        trace!(output = index, ?target, duration_ms, "fade started");
        Ok(())
    }

    /// Advance every active fade to `now_ms`, writing changed lanes through `driver`.
    pub fn tick<D: PwmDriver + ?Sized>(&mut self, now_ms: u64, driver: &mut D) -> Vec<StatusEvent> {
        for (driver_index, pin, value) in self.pending.drain(..) {
            if let Err(err) = driver.set_duty(driver_index, pin, value) {
                warn!(driver = driver_index, pin, error = %err, "PWM write failed");
            }
        }

        let mut settled = Vec::new();
        for output in self.outputs.iter_mut() {
            if !output.is_configured() || (!output.is_fading() && !output.report_pending) {
                continue;
            }

            let elapsed = now_ms.saturating_sub(output.fade_start_ms);
            let next = if elapsed >= output.duration_ms {
                output.target
            } else {
                interpolate(&output.start, &output.target, elapsed, output.duration_ms)
            };

            if next != output.current {
                match self.table.get(output.index()) {
                    Some(address) => {
                        for lane in 0..usize::from(output.width) {
                            if next[lane] == output.current[lane] {
                                continue;
                            }
                            if let Err(err) = driver.set_duty(address.driver, address.lane(lane), next[lane]) {
                                warn!(output = output.index(), lane, error = %err, "PWM write failed");
                            }
                        }
                    }
                    None => trace!(output = output.index(), "output unmapped; skipping write"),
                }
                output.current = next;
            }

            if output.current == output.target {
                output.report_pending = false;
                settled.push(status_of(output, self.resolution));
            }
        }
        settled
    }

    /// Present state of every configured output.
    pub fn snapshot(&self) -> Vec<StatusEvent> {
        self.outputs
            .iter()
            .filter(|o| o.is_configured())
            .map(|o| status_of(o, self.resolution))
            .collect()
    }
}

fn status_of(output: &Output, resolution: Resolution) -> StatusEvent {
    let level = output.level();
    StatusEvent {
        output: output.index(),
        brightness: resolution.to_percent(level),
        state: if level > 0 { PowerState::On } else { PowerState::Off },
    }
}

/// `start + (elapsed / duration) * (target - start)` per lane, truncating
/// toward `start` so each lane moves monotonically toward its target.
/// Any `u64` duration is accepted; the result never leaves `start..=target`.
fn interpolate(start: &Levels, target: &Levels, elapsed: u64, duration: u64) -> Levels {
    let mut levels = [0; MAX_WIDTH];
    if duration == 0 {
        return *target;
    }
    let elapsed = i128::from(elapsed.min(duration));
    let duration = i128::from(duration);
    for lane in 0..MAX_WIDTH {
        let from = i128::from(start[lane]);
        let to = i128::from(target[lane]);
        let value = from + (to - from) * elapsed / duration;
        levels[lane] = value.clamp(from.min(to), from.max(to)) as u16;
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PwmError;
    use proptest::prelude::*;

    #[derive(Default)]
    struct RecordingPwm {
        writes: Vec<(u8, u8, u16)>,
    }

    impl PwmDriver for RecordingPwm {
        fn set_duty(&mut self, driver: u8, pin: u8, value: u16) -> Result<(), PwmError> {
            self.writes.push((driver, pin, value));
            Ok(())
        }
    }

    fn engine(width: i64) -> FadeEngine {
        let mut engine = FadeEngine::new(Layout::new(1, 16), Resolution::Bits12, 16);
        let rejected = engine.configure(&[
            ChannelSpec { controller: None, channel: Some(1), width },
            ChannelSpec { controller: None, channel: Some(6), width: 1 },
        ]);
        assert!(rejected.is_empty());
        engine
    }

    #[test]
    fn linear_fade_reaches_target_and_reports_once() {
        let mut engine = engine(1);
        let mut pwm = RecordingPwm::default();
        engine.start_fade(1, 4095, 1000, 0).unwrap();

        assert!(engine.tick(500, &mut pwm).is_empty());
        let mid = engine.output(1).unwrap().current()[0];
        assert!((2046..=2049).contains(&mid), "mid-fade level {}", mid);

        let events = engine.tick(1000, &mut pwm);
        assert_eq!(events, vec![StatusEvent { output: 1, brightness: 100, state: PowerState::On }]);
        assert_eq!(engine.output(1).unwrap().current()[0], 4095);

        let writes = pwm.writes.len();
        assert!(engine.tick(1500, &mut pwm).is_empty());
        assert!(engine.tick(5000, &mut pwm).is_empty());
        assert_eq!(pwm.writes.len(), writes);
    }

    #[test]
    fn zero_duration_snaps_on_next_tick() {
        let mut engine = engine(1);
        let mut pwm = RecordingPwm::default();
        engine.start_fade(1, 1000, 0, 100).unwrap();
        let events = engine.tick(100, &mut pwm);
        assert_eq!(events.len(), 1);
        assert_eq!(pwm.writes, vec![(0, 0, 1000)]);
    }

    #[test]
    fn unchanged_values_are_not_rewritten() {
        let mut engine = engine(1);
        let mut pwm = RecordingPwm::default();
        engine.start_fade(1, 10, 1000, 0).unwrap();
        engine.tick(10, &mut pwm);
        engine.tick(20, &mut pwm);
        engine.tick(30, &mut pwm);
        // 10 * 30 / 1000 truncates to 0 the whole way
        assert!(pwm.writes.is_empty());
    }

    #[test]
    fn new_fade_supersedes_one_in_flight() {
        let mut engine = engine(1);
        let mut pwm = RecordingPwm::default();
        engine.start_fade(1, 4000, 1000, 0).unwrap();
        engine.tick(500, &mut pwm);
        engine.start_fade(1, 0, 100, 500).unwrap();
        let start = engine.output(1).unwrap().current()[0];
        assert_eq!(start, 2000);
        engine.tick(550, &mut pwm);
        assert_eq!(engine.output(1).unwrap().current()[0], 1000);
        let events = engine.tick(600, &mut pwm);
        assert_eq!(events, vec![StatusEvent { output: 1, brightness: 0, state: PowerState::Off }]);
        assert_eq!(engine.output(1).unwrap().on_levels().unwrap()[0], 4000);
    }

    #[test]
    fn multi_lane_output_writes_each_lane() {
        let mut engine = engine(3);
        let mut pwm = RecordingPwm::default();
        engine.start_fade_levels(1, [4095, 0, 2000, 77, 77], 0, 0).unwrap();
        engine.tick(0, &mut pwm);
        assert_eq!(pwm.writes, vec![(0, 0, 4095), (0, 2, 2000)]);
        assert_eq!(engine.output(1).unwrap().target(), &[4095, 0, 2000, 0, 0]);
    }

    #[test]
    fn unconfigured_outputs_are_skipped() {
        let mut engine = engine(1);
        let mut pwm = RecordingPwm::default();
        engine.start_fade(2, 4095, 0, 0).unwrap();
        assert!(engine.tick(10, &mut pwm).is_empty());
        assert!(pwm.writes.is_empty());
        assert_eq!(engine.start_fade(17, 1, 0, 0), Err(AddressError::InvalidOutput(17)));
    }

    #[test]
    fn repeating_the_current_level_still_reports() {
        let mut engine = engine(1);
        let mut pwm = RecordingPwm::default();
        engine.start_fade(1, 0, 100, 0).unwrap();
        assert_eq!(engine.tick(0, &mut pwm).len(), 1);
        assert!(engine.tick(1, &mut pwm).is_empty());
        assert!(pwm.writes.is_empty());
    }

    #[test]
    fn second_output_maps_after_the_first_span() {
        let mut engine = engine(3);
        let mut pwm = RecordingPwm::default();
        engine.start_fade(6, 5, 0, 0).unwrap();
        engine.tick(0, &mut pwm);
        assert_eq!(pwm.writes, vec![(0, 3, 5)]);
        assert_eq!(engine.snapshot().len(), 2);
    }

    #[test]
    fn longest_duration_stays_within_range() {
        let mut engine = engine(1);
        let mut pwm = RecordingPwm::default();
        engine.start_fade(1, 4095, u64::MAX, 0).unwrap();

        engine.tick(10, &mut pwm);
        assert_eq!(engine.output(1).unwrap().current()[0], 0);
        engine.tick(u64::MAX - 1, &mut pwm);
        assert_eq!(engine.output(1).unwrap().current()[0], 4094);
        assert!(pwm.writes.iter().all(|&(_, _, v)| v <= 4095));

        engine.start_fade(1, 0, u64::MAX, 0).unwrap();
        engine.tick(i64::MAX as u64 + 7, &mut pwm);
        let level = engine.output(1).unwrap().current()[0];
        assert!(level <= 4094, "level {}", level);
    }

    #[test]
    fn shrinking_a_lit_span_darkens_released_lanes() {
        let mut engine = FadeEngine::new(Layout::new(1, 16), Resolution::Bits12, 16);
        let mut pwm = RecordingPwm::default();
        engine.configure(&[ChannelSpec { controller: None, channel: Some(1), width: 3 }]);
        engine.start_fade(1, 4095, 0, 0).unwrap();
        engine.tick(0, &mut pwm);
        assert_eq!(pwm.writes, vec![(0, 0, 4095), (0, 1, 4095), (0, 2, 4095)]);

        pwm.writes.clear();
        engine.configure(&[ChannelSpec { controller: None, channel: Some(1), width: 1 }]);
        assert!(engine.tick(1, &mut pwm).is_empty());
        assert_eq!(pwm.writes, vec![(0, 0, 0), (0, 1, 0), (0, 2, 0)]);

        pwm.writes.clear();
        engine.tick(2, &mut pwm);
        assert!(pwm.writes.is_empty());
    }

    #[test]
    fn repacked_output_is_rewritten_at_its_new_pins() {
        let mut engine = FadeEngine::new(Layout::new(1, 16), Resolution::Bits12, 16);
        let mut pwm = RecordingPwm::default();
        engine.configure(&[
            ChannelSpec { controller: None, channel: Some(1), width: 3 },
            ChannelSpec { controller: None, channel: Some(4), width: 1 },
        ]);
        engine.start_fade(1, 4095, 0, 0).unwrap();
        engine.start_fade(4, 1000, 0, 0).unwrap();
        engine.tick(0, &mut pwm);

        pwm.writes.clear();
        engine.configure(&[ChannelSpec { controller: None, channel: Some(1), width: 1 }]);
        assert_eq!(engine.mapping().get(4).unwrap().base_pin, 1);
        engine.tick(1, &mut pwm);
        // Pin 1 now belongs to output 4; pins 0, 2 and 3 go dark.
        assert_eq!(pwm.writes, vec![(0, 0, 0), (0, 1, 1000), (0, 2, 0), (0, 3, 0)]);
    }

    #[test]
    fn reconfiguring_mid_fade_leaves_no_lane_lit() {
        let mut engine = FadeEngine::new(Layout::new(1, 16), Resolution::Bits12, 16);
        let mut pwm = RecordingPwm::default();
        engine.configure(&[ChannelSpec { controller: None, channel: Some(1), width: 2 }]);
        engine.start_fade(1, 4000, 1000, 0).unwrap();
        engine.tick(500, &mut pwm);

        engine.configure(&[ChannelSpec { controller: None, channel: Some(1), width: 1 }]);
        engine.tick(600, &mut pwm);
        engine.tick(2000, &mut pwm);
        assert_eq!(pwm.writes.iter().rev().take(2).map(|&(_, pin, v)| (pin, v)).collect::<Vec<_>>(), vec![(1, 0), (0, 0)]);
        assert!(!engine.output(1).unwrap().is_fading());
    }

    proptest! {
        #[test]
        fn fades_move_monotonically_toward_target(
            start in 0u16..=4095,
            target in 0u16..=4095,
            duration in 1u64..5000,
            mut steps in proptest::collection::vec(0u64..6000, 1..40),
        ) {
            let mut engine = engine(1);
            let mut pwm = RecordingPwm::default();
            engine.start_fade(1, start, 0, 0).unwrap();
            engine.tick(0, &mut pwm);
            engine.start_fade(1, target, duration, 0).unwrap();

            steps.sort_unstable();
            let mut last = start;
            for now in steps {
                engine.tick(now, &mut pwm);
                let level = engine.output(1).unwrap().current()[0];
                if target >= start {
                    prop_assert!(level >= last && level <= target);
                } else {
                    prop_assert!(level <= last && level >= target);
                }
                last = level;
            }
            engine.tick(duration, &mut pwm);
            prop_assert_eq!(engine.output(1).unwrap().current()[0], target);
        }
    }
}
