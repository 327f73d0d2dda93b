//! PWM hardware seam and the PCA9685 bank driver.

use embedded_hal::i2c::I2c;
use tracing::{debug, info};

use crate::error::PwmError;

/// Anything that can put a duty value on a physical lane.
pub trait PwmDriver {
    /// `driver` is the 0-based driver instance, `value` is in the fade engine's resolution.
    fn set_duty(&mut self, driver: u8, pin: u8, value: u16) -> Result<(), PwmError>;
}

/// I2C addresses a PCA9685 can be strapped to, in controller order.
pub const PCA9685_ADDRESSES: [u8; 8] = [0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47];
pub const PCA9685_CHANNELS: u8 = 16;

const MODE1: u8 = 0x00;
const MODE2: u8 = 0x01;
const LED0_ON_L: u8 = 0x06;
const PRE_SCALE: u8 = 0xFE;

const MODE1_AUTO_INCREMENT: u8 = 0x20;
const MODE1_SLEEP: u8 = 0x10;
const MODE2_OUTDRV: u8 = 0x04;
const FULL: u16 = 0x1000;
const MAX_DUTY: u16 = 4095;
const OSCILLATOR_HZ: u32 = 25_000_000;

/// Up to eight PCA9685s on one bus. Slot `n` drives controller `n + 1`;
/// values are 12-bit.
pub struct Pca9685Bank<I2C> {
    i2c: I2C,
    slots: Vec<Option<u8>>,
}

impl<I2C: I2c> Pca9685Bank<I2C> {
    /// Scan the bus for the first `controllers` addresses and keep whichever answer.
    pub fn probe(mut i2c: I2C, controllers: u8) -> Self {
        let slots = PCA9685_ADDRESSES
            .iter()
            .take(usize::from(controllers))
            .map(|&addr| {
                let found = i2c.write(addr, &[]).is_ok();
                debug!(address = addr, found, "scanning for PWM driver");
                found.then_some(addr)
            })
            .collect();
        Self { i2c, slots }
    }

    /// Addresses that responded during the probe.
    pub fn addresses(&self) -> Vec<u8> {
        self.slots.iter().flatten().copied().collect()
    }

    /// Put every found driver into auto-increment, totem-pole mode at `frequency_hz`.
    pub fn init(&mut self, frequency_hz: u32) -> Result<(), PwmError> {
        let prescale = prescale_for(frequency_hz);
        for addr in self.addresses() {
            self.write(addr, &[MODE1, MODE1_SLEEP | MODE1_AUTO_INCREMENT])?;
            self.write(addr, &[PRE_SCALE, prescale])?;
            self.write(addr, &[MODE1, MODE1_AUTO_INCREMENT])?;
            self.write(addr, &[MODE2, MODE2_OUTDRV])?;
            info!(address = addr, prescale, "PCA9685 initialised");
        }
        Ok(())
    }

    pub fn release(self) -> I2C {
        self.i2c
    }

    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), PwmError> {
        self.i2c.write(addr, bytes).map_err(|e| PwmError::Bus(format!("{:?}", e)))
    }
}

impl<I2C: I2c> PwmDriver for Pca9685Bank<I2C> {
    fn set_duty(&mut self, driver: u8, pin: u8, value: u16) -> Result<(), PwmError> {
        let addr = self.slots.get(usize::from(driver)).copied().flatten().ok_or(PwmError::NoDriver(driver.saturating_add(1)))?;
        if pin >= PCA9685_CHANNELS {
            return Err(PwmError::InvalidPin(pin));
        }
        let (on, off) = match value {
            0 => (0, FULL),
            v if v >= MAX_DUTY => (FULL, 0),
            v => (0, v),
        };
        let [on_l, on_h] = on.to_le_bytes();
        let [off_l, off_h] = off.to_le_bytes();
        self.write(addr, &[LED0_ON_L + 4 * pin, on_l, on_h, off_l, off_h])
    }
}

fn prescale_for(frequency_hz: u32) -> u8 {
    let frequency_hz = frequency_hz.max(1);
    let divisor = frequency_hz.saturating_mul(4096);
    let prescale = (OSCILLATOR_HZ + divisor / 2) / divisor;
    prescale.saturating_sub(1).clamp(3, 255) as u8
}
