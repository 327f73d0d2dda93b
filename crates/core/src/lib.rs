pub mod commands;
pub mod error;
pub mod fade;
pub mod mapping;
pub mod output;
pub mod pwm;
pub mod router;
pub mod topics;

pub use commands::*;
pub use error::{AddressError, PwmError, RouterError};
pub use fade::{FadeEngine, StatusEvent};
pub use mapping::{ChannelSpec, MappingTable, PhysicalAddress};
pub use output::{Layout, Levels, LogicalAddress, Output, Resolution, MAX_WIDTH};
pub use pwm::{Pca9685Bank, PwmDriver, PCA9685_ADDRESSES, PCA9685_CHANNELS};
pub use router::{CommandReport, ConfigReport, Router};
pub use topics::*;
