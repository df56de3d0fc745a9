//! LEB128 variable-length integers used for every length in a node tree.
//!
//! - 0-127: 1 byte
//! - 128-16383: 2 bytes
//! - 16384-2097151: 3 bytes

use crate::error::{Result, WaError};

/// Append a varint to a buffer
pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Read a varint from the front of `data`, returning (value, bytes consumed)
pub fn read_varint(data: &[u8]) -> Result<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0;

    for (pos, &byte) in data.iter().enumerate() {
        result |= u64::from(byte & 0x7F) << shift;

        if byte & 0x80 == 0 {
            return Ok((result, pos + 1));
        }

        shift += 7;
        if shift >= 64 {
            return Err(WaError::Codec("varint overflow".to_string()));
        }
    }

    Err(WaError::Codec("varint truncated".to_string()))
}

/// Encoded size of a value in bytes
pub fn varint_size(value: u64) -> usize {
    if value == 0 {
        return 1;
    }
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7)
}
