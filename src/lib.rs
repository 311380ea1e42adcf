//! Aurora Link: polling driver for WaterFurnace Aurora heat pump controllers
//!
//! The controller speaks a Modbus RTU dialect over RS-485 with vendor
//! functions for reading scattered registers in one request. This crate polls
//! it on a fixed cycle, decodes the registers into typed values and pushes
//! changes to endpoint targets (numeric sensors, binary flags, text, a
//! writable switch and thermostats).
//!
//! Start with [`api::driver::DriverBuilder`]. The `protocol` module holds the
//! wire codec, the serial transport, the polling engine and a controller
//! simulator usable in place of a real port.

pub mod api;
#[doc(hidden)]
pub mod boot;
#[doc(hidden)]
pub mod cli;
pub mod protocol;

pub use api::*;
