// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt;

use crate::utils::validate_utf8_string;
use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, StringData};

fn has_wildcard(s: &str) -> bool {
    s.contains('+') || s.contains('#')
}

/// Validate a topic filter used in SUBSCRIBE/UNSUBSCRIBE against the level-separator
/// grammar: `#` only ever appears alone as the final level, `+` matches exactly one
/// whole level.
fn validate_filter(s: &str) -> Result<(), EncodeError> {
    if s.is_empty() {
        return Err(EncodeError::InvalidTopic);
    }
    let levels: Vec<&str> = s.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') {
            let is_last = i == levels.len() - 1;
            if *level != "#" || !is_last {
                return Err(EncodeError::InvalidTopic);
            }
        }
        if level.contains('+') && *level != "+" {
            return Err(EncodeError::InvalidTopic);
        }
    }
    Ok(())
}

/// A PUBLISH topic name: a plain UTF-8 string, no wildcard characters, no embedded NUL.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PubTopic(StringData);

impl PubTopic {
    /// Create a publish topic.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is empty, contains `+`/`#`, or is not valid UTF-8.
    pub fn new(topic: &str) -> Result<Self, EncodeError> {
        if topic.is_empty() || has_wildcard(topic) {
            return Err(EncodeError::InvalidTopic);
        }
        validate_utf8_string(topic)?;
        Ok(Self(StringData::from(topic)?))
    }

    #[must_use]
    pub fn bytes(&self) -> usize {
        self.0.bytes()
    }
}

impl AsRef<str> for PubTopic {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl fmt::Display for PubTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl DecodePacket for PubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let s = StringData::decode(ba)?;
        if s.is_empty() || has_wildcard(s.as_ref()) {
            return Err(DecodeError::InvalidTopic);
        }
        Ok(Self(s))
    }
}

impl EncodePacket for PubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        self.0.encode(buf)
    }
}

/// A SUBSCRIBE/UNSUBSCRIBE topic filter: admits `+` and `#` wildcards per the MQTT
/// level-separator grammar.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SubTopic(StringData);

impl SubTopic {
    /// Create a subscribe/unsubscribe topic filter.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is empty, violates the wildcard grammar, or is not
    /// valid UTF-8.
    pub fn new(topic: &str) -> Result<Self, EncodeError> {
        validate_filter(topic)?;
        validate_utf8_string(topic)?;
        Ok(Self(StringData::from(topic)?))
    }

    #[must_use]
    pub fn bytes(&self) -> usize {
        self.0.bytes()
    }
}

impl AsRef<str> for SubTopic {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl fmt::Display for SubTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl DecodePacket for SubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let s = StringData::decode(ba)?;
        validate_filter(s.as_ref()).map_err(|_e| DecodeError::InvalidTopic)?;
        Ok(Self(s))
    }
}

impl EncodePacket for SubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        self.0.encode(buf)
    }
}
