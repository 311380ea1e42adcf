use std::time::Duration;

use thiserror::Error;

/// Failures of the byte link to the controller.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open {port}: {reason}")]
    Open { port: String, reason: String },
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out after {waited:?} ({received} of {expected} bytes received)")]
    Timeout {
        waited: Duration,
        expected: usize,
        received: usize,
    },
    #[error("transport is closed")]
    Closed,
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Frame-level failures while building requests or validating replies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("unexpected frame: {0}")]
    Unexpected(String),
    #[error("device exception for function {function}: code 0x{code:02X}")]
    Exception { function: u8, code: u8 },
    #[error("request carries {count} entries, limit is {limit}")]
    TooLarge { count: usize, limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("register {address}: need {needed} words, {available} available")]
    Width {
        address: u16,
        needed: usize,
        available: usize,
    },
}

/// Setup-time rejection of the binding table. Always fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("register {address} bound as {first} and {second}")]
    ConflictingEncoding {
        address: u16,
        first: String,
        second: String,
    },
    #[error("binding on register {address} has an empty bitmask")]
    InvalidBitmask { address: u16 },
    #[error("climate zone {zone} out of range (0-6)")]
    ZoneOutOfRange { zone: u8 },
    #[error("register {address} is not writable")]
    NotWritable { address: u16 },
    #[error("register {address} spans past the end of the address space")]
    AddressOverflow { address: u16 },
    #[error("numeric endpoint '{name}' on register {address} uses a text encoding")]
    TextEncoding { name: String, address: u16 },
    #[error("register {address} spans {words} words, more than one request carries ({limit})")]
    TooWide { address: u16, words: usize, limit: usize },
    #[error("no endpoint bindings configured")]
    NoBindings,
    #[error("unknown endpoint '{0}'")]
    UnknownEndpoint(String),
}

/// Any runtime failure of a single request/response exchange.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl ProtocolError {
    /// I/O failures other than timeouts mean the link itself is broken.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            ProtocolError::Transport(TransportError::Io(_))
                | ProtocolError::Transport(TransportError::Closed)
        )
    }
}
