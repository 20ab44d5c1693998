// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{ByteArray, DecodeError, VarInt, MAX_PACKET_LEN};

use crate::packet::InboundPacket;

/// Consumes a byte stream and yields whole packets, tolerating arbitrary TCP segmentation.
///
/// Holds a growing buffer of bytes received so far and, on each call to `push`, attempts
/// to slice off as many complete packets as the buffer currently holds.
pub struct Framer {
    buf: Vec<u8>,
    max_packet_size: usize,
}

/// A packet whose declared length would exceed the framer's configured bound.
#[derive(Debug)]
pub struct PacketTooLarge {
    pub declared_len: usize,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(1024),
            max_packet_size: MAX_PACKET_LEN,
        }
    }

    #[must_use]
    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            buf: Vec::with_capacity(1024),
            max_packet_size,
        }
    }

    /// Append freshly read bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Try to decode every whole packet currently buffered.
    ///
    /// # Errors
    ///
    /// Returns `PacketTooLarge` if a packet's declared remaining length would push the
    /// total packet size past the configured bound; the connection must be closed.
    /// Returns `DecodeError` if a complete packet's bytes do not decode validly.
    pub fn poll(&mut self) -> Result<Vec<InboundPacket>, FramerError> {
        let mut packets = Vec::new();
        loop {
            match self.try_take_one()? {
                Some(packet) => packets.push(packet),
                None => break,
            }
        }
        Ok(packets)
    }

    fn try_take_one(&mut self) -> Result<Option<InboundPacket>, FramerError> {
        let Some((header_len, remaining_length)) = peek_header(&self.buf)? else {
            return Ok(None);
        };
        let total_len = header_len + remaining_length;
        if total_len > self.max_packet_size {
            return Err(FramerError::TooLarge(PacketTooLarge {
                declared_len: total_len,
            }));
        }
        if self.buf.len() < total_len {
            return Ok(None);
        }

        let packet_bytes: Vec<u8> = self.buf.drain(..total_len).collect();
        let mut ba = ByteArray::new(&packet_bytes);
        let packet = InboundPacket::decode(&mut ba)?;
        Ok(Some(packet))
    }
}

#[derive(Debug)]
pub enum FramerError {
    TooLarge(PacketTooLarge),
    Decode(DecodeError),
}

impl From<DecodeError> for FramerError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}


/// Peek the fixed header at the front of `buf` without consuming it.
///
/// Returns `Some((header_len, remaining_length))` once a whole fixed header (type byte
/// plus 1-4 byte remaining-length varint) is present, `None` if more bytes are needed,
/// or `Err` if the varint itself is malformed (more than 4 continuation bytes).
fn peek_header(buf: &[u8]) -> Result<Option<(usize, usize)>, DecodeError> {
    if buf.is_empty() {
        return Ok(None);
    }
    // Fixed header is [type_byte, varint...]; varint starts at index 1.
    let mut ba = ByteArray::new(&buf[1..]);
    match VarInt::decode(&mut ba) {
        Ok(var_int) => Ok(Some((1 + ba.offset(), var_int.value()))),
        Err(DecodeError::InvalidVarInt) => Err(DecodeError::InvalidVarInt),
        Err(_out_of_range_not_enough_bytes_yet) => Ok(None),
    }
}
