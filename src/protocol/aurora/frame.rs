use super::{
    crc::{append_crc, frame_crc_valid},
    ERROR_FLAG, FUNC_READ_RANGES, FUNC_READ_REGISTERS, FUNC_WRITE_REGISTERS,
    MAX_FRAME_SIZE, MAX_REGISTERS_PER_REQUEST, MIN_FRAME_SIZE, SLAVE_ADDRESS,
};
use crate::protocol::error::FrameError;

/// Entries of four bytes (ranges or address/value pairs) that fit one frame.
pub const MAX_QUAD_ENTRIES: usize = (MAX_FRAME_SIZE - MIN_FRAME_SIZE) / 4;

/// A contiguous run of 16-bit registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterRange {
    pub start: u16,
    pub count: u16,
}

impl RegisterRange {
    pub fn new(start: u16, count: u16) -> Self {
        Self { start, count }
    }

    pub fn single(address: u16) -> Self {
        Self::new(address, 1)
    }

    /// One past the last address, widened so ranges ending at 0xFFFF are representable.
    pub fn end(&self) -> u32 {
        self.start as u32 + self.count as u32
    }

    pub fn contains(&self, address: u16) -> bool {
        (address as u32) >= self.start as u32 && (address as u32) < self.end()
    }

    pub fn addresses(&self) -> impl Iterator<Item = u16> {
        (self.start as u32..self.end()).map(|a| a as u16)
    }
}

/// What the outstanding request expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Registers { function: u8, count: usize },
    WriteAck,
}

impl Expect {
    pub fn function(&self) -> u8 {
        match self {
            Expect::Registers { function, .. } => *function,
            Expect::WriteAck => FUNC_WRITE_REGISTERS,
        }
    }

    pub fn read_ranges(ranges: &[RegisterRange]) -> Self {
        Expect::Registers {
            function: FUNC_READ_RANGES,
            count: ranges.iter().map(|r| r.count as usize).sum(),
        }
    }

    pub fn read_registers(count: usize) -> Self {
        Expect::Registers {
            function: FUNC_READ_REGISTERS,
            count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Registers(Vec<u16>),
    WriteAck,
}

/// Outcome of scanning a receive buffer for the reply to an outstanding request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scan {
    /// No complete frame yet. `pending` is what to report if nothing more arrives.
    NeedMore {
        needed: usize,
        pending: Option<FrameError>,
    },
    /// A valid reply; `skipped` noise bytes precede it and `consumed` covers both.
    Frame {
        skipped: usize,
        consumed: usize,
        response: Response,
    },
    /// A CRC-valid frame that is not an acceptable reply.
    Error {
        skipped: usize,
        consumed: usize,
        error: FrameError,
    },
}

/// Device-side view of a request, used by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadRanges(Vec<RegisterRange>),
    ReadRegisters(Vec<u16>),
    WriteRegisters(Vec<(u16, u16)>),
}

pub fn encode_read_ranges(ranges: &[RegisterRange]) -> Result<Vec<u8>, FrameError> {
    if ranges.is_empty() {
        return Err(FrameError::Malformed("empty range list".to_string()));
    }
    if ranges.len() > MAX_QUAD_ENTRIES {
        return Err(FrameError::TooLarge {
            count: ranges.len(),
            limit: MAX_QUAD_ENTRIES,
        });
    }
    let total: usize = ranges.iter().map(|r| r.count as usize).sum();
    if total > MAX_REGISTERS_PER_REQUEST {
        return Err(FrameError::TooLarge {
            count: total,
            limit: MAX_REGISTERS_PER_REQUEST,
        });
    }

    let mut frame = Vec::with_capacity(4 + ranges.len() * 4);
    frame.extend_from_slice(&[SLAVE_ADDRESS, FUNC_READ_RANGES]);
    for range in ranges {
        if range.count == 0 || range.end() > 0x1_0000 {
            return Err(FrameError::Malformed(format!(
                "invalid range {}+{}",
                range.start, range.count
            )));
        }
        frame.extend_from_slice(&range.start.to_be_bytes());
        frame.extend_from_slice(&range.count.to_be_bytes());
    }
    append_crc(&mut frame);
    Ok(frame)
}

pub fn encode_read_registers(addresses: &[u16]) -> Result<Vec<u8>, FrameError> {
    if addresses.is_empty() {
        return Err(FrameError::Malformed("empty address list".to_string()));
    }
    if addresses.len() > MAX_REGISTERS_PER_REQUEST {
        return Err(FrameError::TooLarge {
            count: addresses.len(),
            limit: MAX_REGISTERS_PER_REQUEST,
        });
    }

    let mut frame = Vec::with_capacity(4 + addresses.len() * 2);
    frame.extend_from_slice(&[SLAVE_ADDRESS, FUNC_READ_REGISTERS]);
    for address in addresses {
        frame.extend_from_slice(&address.to_be_bytes());
    }
    append_crc(&mut frame);
    Ok(frame)
}

pub fn encode_write_registers(writes: &[(u16, u16)]) -> Result<Vec<u8>, FrameError> {
    if writes.is_empty() {
        return Err(FrameError::Malformed("empty write list".to_string()));
    }
    if writes.len() > MAX_QUAD_ENTRIES {
        return Err(FrameError::TooLarge {
            count: writes.len(),
            limit: MAX_QUAD_ENTRIES,
        });
    }

    let mut frame = Vec::with_capacity(4 + writes.len() * 4);
    frame.extend_from_slice(&[SLAVE_ADDRESS, FUNC_WRITE_REGISTERS]);
    for (address, value) in writes {
        frame.extend_from_slice(&address.to_be_bytes());
        frame.extend_from_slice(&value.to_be_bytes());
    }
    append_crc(&mut frame);
    Ok(frame)
}

/// Read request for `count` contiguous registers starting at `register`.
pub fn encode_request(register: u16, count: u16) -> Result<Vec<u8>, FrameError> {
    encode_read_ranges(&[RegisterRange::new(register, count)])
}

enum Candidate {
    Reject,
    /// Plausible start; this many bytes are needed to judge it.
    Partial(usize),
    Complete(usize),
}

fn is_aurora_function(function: u8) -> bool {
    matches!(
        function & !ERROR_FLAG,
        FUNC_READ_RANGES | FUNC_READ_REGISTERS | FUNC_WRITE_REGISTERS
    )
}

fn candidate(window: &[u8]) -> Candidate {
    if window.first() != Some(&SLAVE_ADDRESS) {
        return Candidate::Reject;
    }
    let Some(&function) = window.get(1) else {
        return Candidate::Partial(2);
    };
    if !is_aurora_function(function) {
        return Candidate::Reject;
    }

    let total = if function & ERROR_FLAG != 0 {
        5
    } else if function == FUNC_WRITE_REGISTERS {
        MIN_FRAME_SIZE
    } else {
        let Some(&byte_count) = window.get(2) else {
            return Candidate::Partial(3);
        };
        5 + byte_count as usize
    };

    if total > MAX_FRAME_SIZE {
        Candidate::Reject
    } else if window.len() < total {
        Candidate::Partial(total)
    } else {
        Candidate::Complete(total)
    }
}

fn interpret(frame: &[u8], expect: Expect) -> Result<Response, FrameError> {
    let function = frame[1];
    if function & ERROR_FLAG != 0 {
        return Err(FrameError::Exception {
            function: function & !ERROR_FLAG,
            code: frame[2],
        });
    }
    if function != expect.function() {
        return Err(FrameError::Unexpected(format!(
            "function {function} does not answer function {}",
            expect.function()
        )));
    }

    match expect {
        Expect::WriteAck => Ok(Response::WriteAck),
        Expect::Registers { count, .. } => {
            let byte_count = frame[2] as usize;
            if byte_count % 2 != 0 {
                return Err(FrameError::Malformed(format!("odd byte count {byte_count}")));
            }
            let words: Vec<u16> = frame[3..3 + byte_count]
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            if words.len() != count {
                return Err(FrameError::Unexpected(format!(
                    "expected {count} registers, received {}",
                    words.len()
                )));
            }
            Ok(Response::Registers(words))
        }
    }
}

/// Scan `buf` for the reply to `expect`, skipping bus noise before the frame start.
pub fn scan_response(buf: &[u8], expect: Expect) -> Scan {
    let mut needed: Option<usize> = None;
    let mut pending: Option<FrameError> = None;

    for start in 0..buf.len() {
        let window = &buf[start..];
        match candidate(window) {
            Candidate::Reject => {}
            Candidate::Partial(total) => {
                let missing = total - window.len();
                needed = Some(needed.map_or(missing, |n| n.min(missing)));
                if pending.is_none() {
                    pending = Some(FrameError::Truncated {
                        expected: total,
                        actual: window.len(),
                    });
                }
            }
            Candidate::Complete(total) => {
                let frame = &window[..total];
                if !frame_crc_valid(frame) {
                    if pending.is_none() {
                        pending = Some(FrameError::Malformed(format!(
                            "checksum mismatch at offset {start}"
                        )));
                    }
                    continue;
                }
                let consumed = start + total;
                return match interpret(frame, expect) {
                    Ok(response) => Scan::Frame {
                        skipped: start,
                        consumed,
                        response,
                    },
                    Err(error) => Scan::Error {
                        skipped: start,
                        consumed,
                        error,
                    },
                };
            }
        }
    }

    if pending.is_none() && !buf.is_empty() {
        pending = Some(FrameError::Malformed(format!(
            "no frame start in {} bytes",
            buf.len()
        )));
    }
    let minimum = match expect {
        Expect::WriteAck => MIN_FRAME_SIZE,
        Expect::Registers { count, .. } => 5 + count * 2,
    };
    Scan::NeedMore {
        needed: needed.unwrap_or(minimum).max(1),
        pending,
    }
}

/// Decode a complete reply buffer into its register words.
pub fn decode_response(raw: &[u8], expect: Expect) -> Result<Vec<u16>, FrameError> {
    match scan_response(raw, expect) {
        Scan::Frame {
            response: Response::Registers(words),
            ..
        } => Ok(words),
        Scan::Frame {
            response: Response::WriteAck,
            ..
        } => Ok(Vec::new()),
        Scan::Error { error, .. } => Err(error),
        Scan::NeedMore { needed, pending } => Err(pending.unwrap_or(FrameError::Truncated {
            expected: raw.len() + needed,
            actual: raw.len(),
        })),
    }
}

/// Parse a complete request frame (device side).
pub fn parse_request(frame: &[u8]) -> Result<Request, FrameError> {
    if frame.len() < MIN_FRAME_SIZE {
        return Err(FrameError::Truncated {
            expected: MIN_FRAME_SIZE,
            actual: frame.len(),
        });
    }
    if !frame_crc_valid(frame) {
        return Err(FrameError::Malformed("checksum mismatch".to_string()));
    }
    if frame[0] != SLAVE_ADDRESS {
        return Err(FrameError::Unexpected(format!("station {}", frame[0])));
    }

    let payload = &frame[2..frame.len() - 2];
    match frame[1] {
        FUNC_READ_RANGES if payload.len() % 4 == 0 && !payload.is_empty() => Ok(
            Request::ReadRanges(
                payload
                    .chunks_exact(4)
                    .map(|c| {
                        RegisterRange::new(
                            u16::from_be_bytes([c[0], c[1]]),
                            u16::from_be_bytes([c[2], c[3]]),
                        )
                    })
                    .collect(),
            ),
        ),
        FUNC_READ_REGISTERS if payload.len() % 2 == 0 && !payload.is_empty() => {
            Ok(Request::ReadRegisters(
                payload
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect(),
            ))
        }
        FUNC_WRITE_REGISTERS if payload.len() % 4 == 0 && !payload.is_empty() => {
            Ok(Request::WriteRegisters(
                payload
                    .chunks_exact(4)
                    .map(|c| {
                        (
                            u16::from_be_bytes([c[0], c[1]]),
                            u16::from_be_bytes([c[2], c[3]]),
                        )
                    })
                    .collect(),
            ))
        }
        other => Err(FrameError::Malformed(format!(
            "function {other} with {} payload bytes",
            payload.len()
        ))),
    }
}

/// Build a register reply (device side).
pub fn encode_registers_response(function: u8, words: &[u16]) -> Result<Vec<u8>, FrameError> {
    let byte_count = words.len() * 2;
    if byte_count > u8::MAX as usize {
        return Err(FrameError::TooLarge {
            count: words.len(),
            limit: MAX_REGISTERS_PER_REQUEST,
        });
    }
    let mut frame = Vec::with_capacity(5 + byte_count);
    frame.extend_from_slice(&[SLAVE_ADDRESS, function, byte_count as u8]);
    for word in words {
        frame.extend_from_slice(&word.to_be_bytes());
    }
    append_crc(&mut frame);
    Ok(frame)
}

pub fn encode_write_ack() -> Vec<u8> {
    let mut frame = vec![SLAVE_ADDRESS, FUNC_WRITE_REGISTERS];
    append_crc(&mut frame);
    frame
}

pub fn encode_exception(function: u8, code: u8) -> Vec<u8> {
    let mut frame = vec![SLAVE_ADDRESS, function | ERROR_FLAG, code];
    append_crc(&mut frame);
    frame
}

/// Uppercase hex bytes separated by spaces, for trace logs.
pub fn format_hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
