/// Modbus CRC-16 (init 0xFFFF, reflected polynomial 0xA001).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in data {
        crc ^= b as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the CRC low byte first, as the bus expects.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Check the trailing two CRC bytes of a complete frame.
pub fn frame_crc_valid(frame: &[u8]) -> bool {
    if frame.len() < super::MIN_FRAME_SIZE {
        return false;
    }
    let payload_len = frame.len() - 2;
    let received = u16::from_le_bytes([frame[payload_len], frame[payload_len + 1]]);
    crc16(&frame[..payload_len]) == received
}
