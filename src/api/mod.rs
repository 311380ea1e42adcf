//! Public driver API: build a driver over a serial port (or any transport),
//! bind endpoints to registers and control the controller through a handle.

pub mod driver;
pub mod utils;

pub use driver::{
    AuroraDriver, DriverBuilder, DriverEvent, DriverHandle, DriverHook, LoggingHook,
};
