// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Wire codec for MQTT v3.1.1 control packets.
//!
//! This crate holds no connection state: it only knows how to turn a
//! [`ByteArray`] of bytes into a typed packet (`DecodePacket`) and a typed
//! packet back into bytes (`EncodePacket`).

mod binary_data;
mod byte_array;
mod connect;
mod connect_ack;
mod connect_flags;
mod disconnect;
mod error;
mod header;
mod packet_id;
mod ping_request;
mod ping_response;
mod protocol_level;
mod publish;
mod publish_ack;
mod publish_complete;
mod publish_received;
mod publish_release;
mod qos;
mod string_data;
mod subscribe;
mod subscribe_ack;
pub mod topic;
mod u16_data;
mod unsubscribe;
mod unsubscribe_ack;
pub mod utils;
mod var_int;

pub use binary_data::BinaryData;
pub use byte_array::{ByteArray, ByteArrayError};
pub use connect::ConnectPacket;
pub use connect_ack::{ConnectAckPacket, ConnectReturnCode};
pub use connect_flags::ConnectFlags;
pub use disconnect::DisconnectPacket;
pub use error::{DecodeError, EncodeError};
pub use header::{FixedHeader, Packet, PacketType};
pub use packet_id::PacketId;
pub use ping_request::PingRequestPacket;
pub use ping_response::PingResponsePacket;
pub use protocol_level::ProtocolLevel;
pub use publish::PublishPacket;
pub use publish_ack::PublishAckPacket;
pub use publish_complete::PublishCompletePacket;
pub use publish_received::PublishReceivedPacket;
pub use publish_release::PublishReleasePacket;
pub use qos::QoS;
pub use string_data::StringData;
pub use subscribe::{SubscribePacket, SubscribeTopic};
pub use subscribe_ack::{SubscribeAck, SubscribeAckPacket};
pub use topic::{PubTopic, SubTopic};
pub use u16_data::U16Data;
pub use unsubscribe::UnsubscribePacket;
pub use unsubscribe_ack::UnsubscribeAckPacket;
pub use var_int::{VarInt, VarIntError, MAX_PACKET_LEN};

/// A packet value that can be decoded from a byte-buffer.
pub trait DecodePacket: Sized {
    /// # Errors
    ///
    /// Returns error if `ba` does not hold a well-formed encoding of `Self`.
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError>;
}

/// A packet value that can be encoded into a byte-buffer.
pub trait EncodePacket {
    /// Append the wire encoding of `self` to `buf`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns error if `self` holds a value that cannot be validly encoded.
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError>;
}

/// Literal protocol name field carried in every CONNECT packet.
pub const PROTOCOL_NAME: &str = "MQTT";
