use ledc_core::{PwmDriver, PwmError};
use tracing::trace;

/// Duty sink for hosts without PWM hardware: every write becomes a trace event.
#[derive(Debug, Default)]
pub struct TracingPwm {
    writes: u64,
}

impl TracingPwm {
    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl PwmDriver for TracingPwm {
    fn set_duty(&mut self, driver: u8, pin: u8, value: u16) -> Result<(), PwmError> {
        self.writes += 1;
        trace!(driver, pin, value, "duty");
        Ok(())
    }
}

#[cfg(feature = "rpi")]
pub mod rpi {
    use anyhow::Context;
    use ledc_core::Pca9685Bank;
    use rppal::i2c::I2c;
    use tracing::{info, warn};

    /// Open the Pi's default I2C bus, probe for drivers and initialise whatever answered.
    pub fn open(controllers: u8, frequency_hz: u32) -> anyhow::Result<Pca9685Bank<I2c>> {
        let i2c = I2c::new().context("opening I2C bus")?;
        let mut bank = Pca9685Bank::probe(i2c, controllers);
        let found = bank.addresses();
        if found.is_empty() {
            warn!(controllers, "no PCA9685 answered on the I2C bus");
        }
        bank.init(frequency_hz).context("initialising PCA9685 drivers")?;
        info!(drivers = ?found, "PWM drivers ready");
        Ok(bank)
    }
}
