pub mod device;
pub mod engine;
pub mod error;
pub mod spectrum;

pub use engine::{Acquisition, AcquisitionOptions, AcquisitionStats};
pub use error::{AcquisitionError, ConfigError, DeviceError};
