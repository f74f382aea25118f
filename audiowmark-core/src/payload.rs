use crate::config::PAYLOAD_SIZE;
use crate::error::{Error, Result};

/// Parse a hex message string into a bit vector, four bits per digit,
/// MSB first. An optional `0x` prefix is accepted.
pub fn bit_str_to_vec(message: &str) -> Result<Vec<u8>> {
    let digits = message.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);
    if digits.is_empty() {
        return Err(Error::InvalidMessage(message.to_string()));
    }

    let mut bits = Vec::with_capacity(digits.len() * 4);
    for c in digits.chars() {
        let nibble = c
            .to_digit(16)
            .ok_or_else(|| Error::InvalidMessage(message.to_string()))?;
        for shift in (0..4).rev() {
            bits.push(((nibble >> shift) & 1) as u8);
        }
    }
    Ok(bits)
}

/// Render a bit vector as hex, the inverse of [`bit_str_to_vec`].
pub fn bit_vec_to_str(bits: &[u8]) -> String {
    debug_assert!(bits.len() % 4 == 0);
    bits.chunks(4)
        .map(|nibble| {
            let value = nibble.iter().fold(0u32, |acc, &b| (acc << 1) | b as u32);
            char::from_digit(value, 16).expect("nibble is < 16")
        })
        .collect()
}

/// Parse a message and bring it to exactly [`PAYLOAD_SIZE`] bits.
///
/// Messages longer than the payload are rejected; shorter messages are
/// extended cyclically.
pub fn parse_message(message: &str) -> Result<Vec<u8>> {
    let bits = bit_str_to_vec(message)?;
    if bits.len() > PAYLOAD_SIZE {
        return Err(Error::PayloadTooLong {
            got: bits.len(),
            max: PAYLOAD_SIZE,
        });
    }
    if bits.len() < PAYLOAD_SIZE {
        let expanded: Vec<u8> = (0..PAYLOAD_SIZE).map(|i| bits[i % bits.len()]).collect();
        return Ok(expanded);
    }
    Ok(bits)
}
