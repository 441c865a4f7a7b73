//! # Encoding Module
//!
//! This module provides data encoding and decoding functionality for serial
//! communication. Outbound payloads are either UTF-8 text or whitespace-
//! separated hex pairs; inbound chunks render as lossy text or uppercase hex.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, SerialProbeError};

/// Matches any whitespace inside a typed hex payload.
static HEX_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid regex pattern"));

/// Matches a fully cleaned hex payload.
static HEX_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Fa-f]*$").expect("Invalid regex pattern"));

/// How a frame's bytes map to operator-visible text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMode {
    /// UTF-8 text
    Text,
    /// space-separated uppercase hex pairs
    Hex,
}

impl fmt::Display for DataMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataMode::Text => write!(f, "text"),
            DataMode::Hex => write!(f, "hex"),
        }
    }
}

/// Encodes a typed payload to wire bytes.
///
/// Text mode encodes as UTF-8 and appends `\r\n` when `append_newline` is
/// set. Hex mode strips whitespace, validates the remainder (hex digits,
/// even length), then packs byte pairs; the newline toggle does not apply.
///
/// # Errors
///
/// Returns [`SerialProbeError::InvalidHexFormat`] when a hex payload
/// contains a non-hex digit or an odd number of digits.
///
/// # Examples
///
/// ```
/// use serial_probe::serial::encoding::{encode_outbound, DataMode};
///
/// let bytes = encode_outbound("48 65 6C 6C 6F", DataMode::Hex, false).unwrap();
/// assert_eq!(bytes, vec![0x48, 0x65, 0x6C, 0x6C, 0x6F]);
///
/// let bytes = encode_outbound("AT", DataMode::Text, true).unwrap();
/// assert_eq!(bytes, vec![0x41, 0x54, 0x0D, 0x0A]);
/// ```
pub fn encode_outbound(input: &str, mode: DataMode, append_newline: bool) -> Result<Vec<u8>> {
    match mode {
        DataMode::Text => {
            let mut bytes = input.as_bytes().to_vec();
            if append_newline {
                bytes.extend_from_slice(b"\r\n");
            }
            Ok(bytes)
        }
        DataMode::Hex => {
            let cleaned = clean_hex(input);
            if !HEX_DIGITS.is_match(&cleaned) {
                return Err(SerialProbeError::invalid_hex(
                    "payload contains non-hex characters",
                ));
            }
            if cleaned.len() % 2 != 0 {
                return Err(SerialProbeError::invalid_hex(
                    "payload must contain an even number of hex digits",
                ));
            }
            hex::decode(&cleaned)
                .map_err(|e| SerialProbeError::invalid_hex(e.to_string()))
        }
    }
}

/// Decodes an inbound chunk for display.
///
/// Text mode is a lossy UTF-8 conversion and never fails; hex mode renders
/// each byte as two uppercase digits joined by single spaces.
///
/// # Examples
///
/// ```
/// use serial_probe::serial::encoding::{decode_inbound, DataMode};
///
/// let text = decode_inbound(&[0x48, 0x65, 0x6C, 0x6C, 0x6F], DataMode::Hex);
/// assert_eq!(text, "48 65 6C 6C 6F");
///
/// let text = decode_inbound(&[72, 101, 108, 108, 111], DataMode::Text);
/// assert_eq!(text, "Hello");
/// ```
#[must_use]
pub fn decode_inbound(bytes: &[u8], mode: DataMode) -> String {
    match mode {
        DataMode::Text => String::from_utf8_lossy(bytes).into_owned(),
        DataMode::Hex => bytes
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Reports the payload size for live character counting.
///
/// Hex mode counts complete byte pairs after whitespace removal; an unpaired
/// trailing nibble is a display concern while typing, not an error. Text
/// mode counts characters.
#[must_use]
pub fn byte_length(input: &str, mode: DataMode) -> usize {
    match mode {
        DataMode::Text => input.chars().count(),
        DataMode::Hex => clean_hex(input).len() / 2,
    }
}

/// Removes all whitespace from a typed hex payload.
fn clean_hex(input: &str) -> String {
    HEX_WHITESPACE.replace_all(input, "").into_owned()
}
