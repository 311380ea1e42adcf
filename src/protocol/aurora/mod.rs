//! WaterFurnace Aurora register protocol.
//!
//! The bus uses Modbus RTU framing (slave address, function, payload, CRC-16)
//! but only the vendor functions 65/66/67 for reads and writes.

pub mod climate;
pub mod crc;
pub mod decode;
pub mod frame;
pub mod registers;
pub mod simulator;

pub use decode::{decode, extract_bits, RegisterEncoding, RegisterValue};
pub use frame::{
    decode_response, encode_read_ranges, encode_read_registers, encode_request,
    encode_write_registers, scan_response, Expect, RegisterRange, Response, Scan,
};

/// The controller always answers as station 1.
pub const SLAVE_ADDRESS: u8 = 1;

/// Read a list of `(address, quantity)` ranges.
pub const FUNC_READ_RANGES: u8 = 65;
/// Read a list of individual registers.
pub const FUNC_READ_REGISTERS: u8 = 66;
/// Write a list of `(address, value)` pairs.
pub const FUNC_WRITE_REGISTERS: u8 = 67;

pub const ERROR_FLAG: u8 = 0x80;

pub const MAX_REGISTERS_PER_REQUEST: usize = 100;
pub const MAX_FRAME_SIZE: usize = 256;
/// Address + function + CRC.
pub const MIN_FRAME_SIZE: usize = 4;

pub const DEFAULT_BAUD_RATE: u32 = 19200;
