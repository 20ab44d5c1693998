// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::byte_array::ByteArrayError;

/// Generate a random alphanumeric string, used to fill in a default `client_id`.
#[must_use]
pub fn random_string(len: usize) -> String {
    thread_rng().sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    /// Encoded length would overflow the 16-bit length prefix.
    TooLong,

    /// Bytes are not valid UTF-8.
    InvalidUtf8,

    /// String contains the NUL code point `U+0000`, disallowed by `[MQTT-1.5.4-2]`.
    ContainsNul,

    /// String contains a surrogate code point (`U+D800..=U+DFFF`), disallowed by
    /// `[MQTT-1.5.4-1]`.
    ContainsSurrogate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientIdError {
    TooLong,
}

/// Convert raw bytes read off the wire into a `String`, rejecting ill-formed UTF-8.
///
/// # Errors
///
/// Returns error if `bytes` is not valid UTF-8.
pub fn to_utf8_string(bytes: &[u8]) -> Result<String, ByteArrayError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_e| ByteArrayError::InvalidString(StringError::InvalidUtf8))
}

/// Validate a string against the UTF-8 Encoded String rules in `[MQTT-1.5.4]`.
///
/// # Errors
///
/// Returns error if `s` is too long to fit a 16-bit length prefix, or contains a
/// disallowed code point.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    if s.len() > usize::from(u16::MAX) {
        return Err(StringError::TooLong);
    }
    for c in s.chars() {
        if c == '\u{0000}' {
            return Err(StringError::ContainsNul);
        }
        if ('\u{D800}'..='\u{DFFF}').contains(&c) {
            return Err(StringError::ContainsSurrogate);
        }
    }
    Ok(())
}

/// Validate a binary-data field against the two-byte length-prefix size limit.
///
/// # Errors
///
/// Returns error if `data` is longer than 65535 bytes.
pub fn validate_two_bytes_data(data: &[u8]) -> Result<(), crate::EncodeError> {
    if data.len() > usize::from(u16::MAX) {
        Err(crate::EncodeError::TooManyData)
    } else {
        Ok(())
    }
}

/// Validate a client identifier.
///
/// The spec recommends 1-23 bytes; this implementation accepts any valid, non-overlong
/// UTF-8 string (a zero-length `client_id` is legal and handled by the broker assigning
/// one, per `[MQTT-3.1.3-6]`) and only rejects identifiers that cannot fit the 16-bit
/// length prefix.
///
/// # Errors
///
/// Returns error if `client_id` is too long to encode.
pub fn validate_client_id(client_id: &str) -> Result<(), ClientIdError> {
    if client_id.len() > usize::from(u16::MAX) {
        Err(ClientIdError::TooLong)
    } else {
        Ok(())
    }
}

/// Validate the CONNECT `keep_alive` field.
///
/// Values `1..=4` are reserved: too small to be a meaningful interval but not the
/// "disabled" sentinel `0`.
///
/// # Errors
///
/// Returns error if `keep_alive` falls in `1..=4`.
pub const fn validate_keep_alive(keep_alive: u16) -> Result<(), crate::DecodeError> {
    if keep_alive != 0 && keep_alive < 5 {
        Err(crate::DecodeError::OtherErrors)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_string_length() {
        assert_eq!(random_string(8).len(), 8);
        assert_ne!(random_string(8), random_string(8));
    }

    #[test]
    fn test_validate_utf8_string_rejects_nul() {
        assert_eq!(
            validate_utf8_string("a\u{0000}b").unwrap_err(),
            StringError::ContainsNul
        );
    }

    #[test]
    fn test_validate_utf8_string_accepts_plain() {
        assert!(validate_utf8_string("a/b").is_ok());
    }

    #[test]
    fn test_validate_keep_alive() {
        assert!(validate_keep_alive(0).is_ok());
        assert!(validate_keep_alive(5).is_ok());
        assert!(validate_keep_alive(60).is_ok());
        assert!(validate_keep_alive(1).is_err());
    }
}
