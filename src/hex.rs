//! Hex text for operator input and output.

use crate::error::TerminalError;

/// Two uppercase hex characters per byte.
pub fn encode_hex(bytes: &[u8]) -> String {
    ::hex::encode_upper(bytes)
}

/// Terminal rendering: ` 0xDE 0xAD`.
pub fn format_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!(" 0x{b:02X}")).collect()
}

/// Parse operator hex. Whitespace is skipped, case is ignored and an odd
/// trailing nibble is padded with `0`, so `"ABC"` decodes to `AB C0`.
///
/// # Errors
///
/// [`TerminalError::InvalidHex`] with the position in the original input.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, TerminalError> {
    let mut digits = String::with_capacity(input.len() + 1);
    let mut positions = Vec::with_capacity(input.len());
    for (position, character) in input.chars().enumerate() {
        if character.is_whitespace() {
            continue;
        }
        if !character.is_ascii_hexdigit() {
            return Err(TerminalError::InvalidHex { character, position });
        }
        digits.push(character);
        positions.push(position);
    }
    if digits.len() % 2 == 1 {
        digits.push('0');
    }
    ::hex::decode(&digits).map_err(|e| match e {
        ::hex::FromHexError::InvalidHexCharacter { c, index } => TerminalError::InvalidHex {
            character: c,
            position: positions.get(index).copied().unwrap_or(index),
        },
        other => TerminalError::InvalidLength(other.to_string()),
    })
}
