//! Logical output to physical PWM lane mapping.
//!
//! Within a controller, configured channels are packed onto the driver's pins
//! in channel order: a channel's base pin is the sum of the widths of the
//! configured channels before it. The table is rebuilt wholesale after every
//! configuration update.

use tracing::{debug, warn};

use crate::error::AddressError;
use crate::output::{Layout, LogicalAddress, Output, MAX_WIDTH};

/// A channel definition from a config document, not yet validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSpec {
    pub controller: Option<i64>,
    pub channel: Option<i64>,
    pub width: i64,
}

/// Where an output's first lane lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysicalAddress {
    /// 0-based driver instance.
    pub driver: u8,
    pub base_pin: u8,
}

impl PhysicalAddress {
    pub fn lane(&self, lane: usize) -> u8 {
        self.base_pin + lane as u8
    }
}

#[derive(Debug, Clone)]
pub struct MappingTable {
    layout: Layout,
    pins_per_driver: u8,
    entries: Vec<Option<PhysicalAddress>>,
}

impl MappingTable {
    pub fn new(layout: Layout, pins_per_driver: u8) -> Self {
        Self { layout, pins_per_driver, entries: vec![None; layout.output_count()] }
    }

    pub fn layout(&self) -> Layout { self.layout }

    /// Physical address of a 1-based output index, if it is configured and fits.
    pub fn get(&self, index: usize) -> Option<PhysicalAddress> {
        self.entries.get(index.checked_sub(1)?).copied().flatten()
    }

    /// Apply channel definitions to `outputs` (indexed `index - 1`), then rebuild.
    ///
    /// Each valid entry resets its output to off with the new width and clears
    /// the `width - 1` following channels on the same controller, so a shrunk
    /// or overlapping span cannot leave orphaned lanes lit. Invalid entries are
    /// skipped and returned; their siblings are still applied.
    pub fn configure(&mut self, outputs: &mut [Output], specs: &[ChannelSpec]) -> Vec<AddressError> {
        let mut rejected = Vec::new();
        for spec in specs {
            match self.apply(outputs, spec) {
                Ok(address) => debug!(controller = address.controller, strip = address.channel, width = spec.width, "channel configured"),
                Err(err) => {
                    warn!(error = %err, "rejecting channel config");
                    rejected.push(err);
                }
            }
        }
        rejected.extend(self.rebuild(outputs));
        rejected
    }

    fn apply(&self, outputs: &mut [Output], spec: &ChannelSpec) -> Result<LogicalAddress, AddressError> {
        let address = self.layout.resolve(spec.controller, spec.channel)?;
        if spec.width < 1 || spec.width > MAX_WIDTH as i64 {
            return Err(AddressError::InvalidWidth(spec.width));
        }
        let width = spec.width as u8;
        let index = self.layout.index_of(address);
        outputs[index - 1].reset(width);

        let first = u16::from(address.channel) + 1;
        let last = (u16::from(address.channel) + u16::from(width) - 1).min(u16::from(self.layout.channels_per_controller));
        for channel in first..=last {
            let shadowed = self.layout.index_of(LogicalAddress { controller: address.controller, channel: channel as u8 });
            outputs[shadowed - 1].reset(0);
        }
        Ok(address)
    }

    /// Recompute every entry from the outputs' current widths.
    pub fn rebuild(&mut self, outputs: &mut [Output]) -> Vec<AddressError> {
        let mut overflowed = Vec::new();
        self.entries.iter_mut().for_each(|e| *e = None);
        for controller in 1..=self.layout.controllers {
            let mut offset: u16 = 0;
            for channel in 1..=self.layout.channels_per_controller {
                let index = self.layout.index_of(LogicalAddress { controller, channel });
                let width = outputs[index - 1].width;
                if width == 0 {
                    continue;
                }
                if offset + u16::from(width) > u16::from(self.pins_per_driver) {
                    let err = AddressError::SpanOverflow { controller, channel, width };
                    warn!(error = %err, "channel left unmapped");
                    overflowed.push(err);
                    continue;
                }
                self.entries[index - 1] = Some(PhysicalAddress { driver: controller - 1, base_pin: offset as u8 });
                offset += u16::from(width);
            }
        }
        overflowed
    }
}
