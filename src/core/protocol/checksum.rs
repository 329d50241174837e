//! Checksum calculation
//!
//! CRC-16/MODBUS, as used by RTU framing.

/// Initial register value of CRC-16/MODBUS
pub const CRC16_MODBUS_INIT: u16 = 0xFFFF;

/// Reflected polynomial of CRC-16/MODBUS
pub const CRC16_MODBUS_POLY: u16 = 0xA001;

/// CRC-16/Modbus
/// Polynomial: 0x8005 (reflected 0xA001), Init: 0xFFFF, RefIn: true, RefOut: true, XorOut: 0x0000
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = CRC16_MODBUS_INIT;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC16_MODBUS_POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Append the CRC of `frame` to it, low byte first
pub fn append_crc16_modbus(frame: &mut Vec<u8>) {
    let crc = crc16_modbus(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Check a frame whose last two bytes are its CRC, low byte first
pub fn verify_crc16_modbus(frame: &[u8]) -> bool {
    if frame.len() < 2 {
        return false;
    }
    let (body, trailer) = frame.split_at(frame.len() - 2);
    crc16_modbus(body).to_le_bytes() == [trailer[0], trailer[1]]
}
