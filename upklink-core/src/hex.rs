//! Conversions between integers/byte slices and their mod-script textual
//! form: space-separated, fixed-width, two-digit uppercase hex byte groups.

use crate::error::HexFormatError;

/// Render a byte slice as space-separated two-digit hex groups, e.g.
/// `[0xAA, 0x0B]` -> `"AA 0B"`.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02X}", b));
    }
    out
}

/// Render a 32-bit value as four big-endian hex byte groups, trimmed of
/// surrounding whitespace, e.g. `1` -> `"00 00 00 01"`.
pub fn int_to_hex(value: i32) -> String {
    bytes_to_hex(&value.to_be_bytes())
}

/// Parse a single two-digit hex byte token. Anything but exactly two hex
/// digits is rejected.
pub fn parse_byte_token(token: &str) -> Option<u8> {
    if token.len() != 2 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(token, 16).ok()
}

/// Inverse of [`bytes_to_hex`]: whitespace-separated two-digit byte tokens
/// back into bytes, order-preserving.
pub fn hex_to_bytes(text: &str) -> Result<Vec<u8>, HexFormatError> {
    text.split_whitespace()
        .map(|token| {
            parse_byte_token(token).ok_or_else(|| HexFormatError::BadToken {
                token: token.to_owned(),
            })
        })
        .collect()
}

/// Inverse of [`int_to_hex`]: exactly four byte groups, big-endian.
pub fn hex_to_int(text: &str) -> Result<i32, HexFormatError> {
    let bytes = hex_to_bytes(text)?;
    let bytes: [u8; 4] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| HexFormatError::BadLength {
            expected: 4,
            got: bytes.len(),
        })?;
    Ok(i32::from_be_bytes(bytes))
}
