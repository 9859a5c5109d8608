//! Common Utilities
//! 
//! CRC primitives and bit repacking used by the logical-channel and slot-mapping code

use bytes::{Bytes, BytesMut, BufMut};
use tracing::trace;

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Calculate CRC-8 (polynomial x^8 + x^2 + x + 1)
pub fn crc8(data: &[u8]) -> u8 {
    const CRC8_POLY: u8 = 0x07;
    let mut crc: u8 = 0;

    for byte in data {
        crc ^= *byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ CRC8_POLY;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}

/// Calculate CRC-16 (CCITT polynomial 0x1021, zero init)
pub fn crc16(data: &[u8]) -> u16 {
    const CRC16_POLY: u16 = 0x1021;
    let mut crc: u16 = 0;
    
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    
    crc
}

/// Pack bits into bytes (MSB first)
pub fn pack_bits(bits: &[bool]) -> Bytes {
    let mut bytes = BytesMut::with_capacity((bits.len() + 7) / 8);
    
    for chunk in bits.chunks(8) {
        let mut byte = 0u8;
        for (i, &bit) in chunk.iter().enumerate() {
            if bit {
                byte |= 1 << (7 - i);
            }
        }
        bytes.put_u8(byte);
    }
    
    bytes.freeze()
}

/// Unpack bytes into bits (MSB first)
pub fn unpack_bits(bytes: &[u8]) -> Vec<bool> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    
    for &byte in bytes {
        for i in 0..8 {
            bits.push((byte & (1 << (7 - i))) != 0);
        }
    }
    
    bits
}

/// Repack a byte stream into `bits_per_symbol`-wide code units (MSB first).
///
/// The final unit is zero-padded when the bit count is not a multiple of the
/// unit width.
pub fn repack_bits(bytes: &[u8], bits_per_symbol: usize) -> Vec<u8> {
    debug_assert!((1..=8).contains(&bits_per_symbol));
    let bits = unpack_bits(bytes);
    let units: Vec<u8> = bits
        .chunks(bits_per_symbol)
        .map(|chunk| {
            let mut unit = 0u8;
            for (i, &bit) in chunk.iter().enumerate() {
                if bit {
                    unit |= 1 << (bits_per_symbol - 1 - i);
                }
            }
            unit
        })
        .collect();

    trace!("Repacked {} bytes into {} units of {} bits", bytes.len(), units.len(), bits_per_symbol);
    units
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_bytes_to_hex() {
        let data = vec![0x12, 0x34, 0xAB, 0xCD];
        assert_eq!(bytes_to_hex(&data), "12 34 ab cd");
    }
    
    #[test]
    fn test_crc8_check_value() {
        // CRC-8/SMBUS check value
        assert_eq!(crc8(b"123456789"), 0xF4);
        assert_eq!(crc8(&[]), 0);
    }

    #[test]
    fn test_crc16_check_value() {
        // CRC-16/XMODEM check value
        assert_eq!(crc16(b"123456789"), 0x31C3);
    }
    
    #[test]
    fn test_bit_packing() {
        let bits = vec![true, false, true, false, true, false, true, false];
        let packed = pack_bits(&bits);
        assert_eq!(packed[0], 0xAA); // 10101010
        
        let unpacked = unpack_bits(&packed);
        assert_eq!(unpacked[..8], bits);
    }

    #[test]
    fn test_repack_bits() {
        assert_eq!(repack_bits(&[0xB4], 2), vec![0b10, 0b11, 0b01, 0b00]);
        assert_eq!(repack_bits(&[0xB4], 4), vec![0xB, 0x4]);
        // 8 bits into 3-bit units: 101 101 00(0)
        assert_eq!(repack_bits(&[0xB4], 3), vec![0b101, 0b101, 0b000]);
    }
}
