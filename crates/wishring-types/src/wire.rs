//! Wire codec for the ring's counter/battery/reset characteristics.
//!
//! The layouts here must be reproduced exactly for device compatibility.
//! Note the endianness asymmetry: counts are written big-endian while the
//! device-time sync is little-endian. The two target different firmware
//! registers and the asymmetry is intentional; do not normalize it.

use crate::error::{ParseError, ParseResult};
use crate::types::BatteryLevel;

/// Size of an encoded count value on the wire.
pub const COUNT_SIZE: usize = 4;

/// Size of an encoded device-time sync payload.
pub const TIME_SIZE: usize = 8;

/// Hard cap on the text payload; the firmware reads a single packet and
/// there is no multi-packet fragmentation.
pub const TEXT_MAX_BYTES: usize = 20;

/// Largest count value the firmware will display.
pub const MAX_COUNT: u32 = 99_999;

/// The single-byte reset command.
pub const RESET_COMMAND: [u8; 1] = [0xFF];

/// Encode a count as 4 bytes, big-endian, most-significant byte first.
#[must_use]
pub fn encode_count(count: u32) -> [u8; COUNT_SIZE] {
    count.to_be_bytes()
}

/// Decode a 4-byte big-endian count.
pub fn decode_count(data: &[u8]) -> ParseResult<u32> {
    if data.len() < COUNT_SIZE {
        return Err(ParseError::InsufficientBytes {
            expected: COUNT_SIZE,
            actual: data.len(),
        });
    }
    Ok(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
}

/// Encode wish text as UTF-8, hard-truncated to at most
/// [`TEXT_MAX_BYTES`] bytes.
///
/// Truncation backs up to the previous character boundary so a multi-byte
/// sequence is never split; the result may therefore be slightly shorter
/// than 20 bytes. The truncation is lossy by design and nothing re-inflates
/// it on the device side.
#[must_use]
pub fn encode_text(text: &str) -> Vec<u8> {
    let mut end = text.len().min(TEXT_MAX_BYTES);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.as_bytes()[..end].to_vec()
}

/// Encode the completion flag: `1` = completed, `0` = not completed.
#[must_use]
pub fn encode_completion(completed: bool) -> [u8; 1] {
    [u8::from(completed)]
}

/// Encode an epoch-millisecond timestamp as 8 bytes, little-endian.
///
/// Little-endian is correct here even though counts are big-endian; the
/// time register on the firmware reads LSB first.
#[must_use]
pub fn encode_time_ms(epoch_ms: i64) -> [u8; TIME_SIZE] {
    epoch_ms.to_le_bytes()
}

/// Decode the press-count byte from an inbound counter notification.
pub fn decode_press(data: &[u8]) -> ParseResult<u8> {
    data.first().copied().ok_or(ParseError::InsufficientBytes {
        expected: 1,
        actual: 0,
    })
}

/// Decode a battery payload, clamping out-of-range values into 0-100.
pub fn decode_battery(data: &[u8]) -> ParseResult<BatteryLevel> {
    let raw = data.first().copied().ok_or(ParseError::InsufficientBytes {
        expected: 1,
        actual: 0,
    })?;
    Ok(BatteryLevel::new(raw))
}
