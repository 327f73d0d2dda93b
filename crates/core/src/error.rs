use thiserror::Error;

/// A configuration or command entry named a channel this controller does not have.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("missing controller")]
    MissingController,
    #[error("invalid controller {0}")]
    InvalidController(i64),
    #[error("missing strip")]
    MissingChannel,
    #[error("invalid strip {0}")]
    InvalidChannel(i64),
    #[error("invalid output {0}")]
    InvalidOutput(i64),
    #[error("invalid width {0} (expected 1..={max})", max = crate::output::MAX_WIDTH)]
    InvalidWidth(i64),
    #[error("controller {controller} strip {channel}: span of {width} overruns the driver")]
    SpanOverflow { controller: u8, channel: u8, width: u8 },
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("invalid document: {0}")]
    InvalidDocument(#[from] serde_json::Error),
    #[error("unknown group {0:?}")]
    UnknownGroup(String),
    #[error(transparent)]
    InvalidAddress(#[from] AddressError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PwmError {
    #[error("no PWM driver for controller {0}")]
    NoDriver(u8),
    #[error("pin {0} out of range")]
    InvalidPin(u8),
    #[error("bus error: {0}")]
    Bus(String),
}
