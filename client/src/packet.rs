// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{
    ByteArray, ConnectAckPacket, DecodeError, DecodePacket, FixedHeader, PacketType,
    PingResponsePacket, PublishAckPacket, PublishCompletePacket, PublishPacket,
    PublishReceivedPacket, PublishReleasePacket, SubscribeAckPacket, UnsubscribeAckPacket,
};

/// Every control packet kind a client may receive from the broker.
///
/// CONNECT, SUBSCRIBE, UNSUBSCRIBE, PINGREQ and DISCONNECT are outbound-only from the
/// client's point of view and have no variant here.
#[derive(Debug)]
pub enum InboundPacket {
    ConnectAck(ConnectAckPacket),
    Publish(PublishPacket),
    PublishAck(PublishAckPacket),
    PublishReceived(PublishReceivedPacket),
    PublishRelease(PublishReleasePacket),
    PublishComplete(PublishCompletePacket),
    SubscribeAck(SubscribeAckPacket),
    UnsubscribeAck(UnsubscribeAckPacket),
    PingResponse(PingResponsePacket),
}

impl InboundPacket {
    /// Decode a single whole packet (fixed header already known to be fully buffered).
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::InvalidPacketType` for a packet kind a client never
    /// receives (CONNECT, SUBSCRIBE, UNSUBSCRIBE, PINGREQ, DISCONNECT), and whatever
    /// decode error the specific packet kind's decoder raises otherwise.
    pub fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        // Peeking the packet type requires decoding the fixed header, which every
        // concrete packet's own `decode` re-derives from the same bytes; so we decode
        // it once here and dispatch, then let each packet type parse its own body
        // starting from the header it re-reads at offset 0.
        let fixed_header = FixedHeader::decode(ba)?;
        let packet_type = fixed_header.packet_type();
        ba.reset_offset();
        let rewound = ba;
        match packet_type {
            PacketType::ConnectAck => Ok(Self::ConnectAck(ConnectAckPacket::decode(rewound)?)),
            PacketType::Publish { .. } => Ok(Self::Publish(PublishPacket::decode(rewound)?)),
            PacketType::PublishAck => Ok(Self::PublishAck(PublishAckPacket::decode(rewound)?)),
            PacketType::PublishReceived => {
                Ok(Self::PublishReceived(PublishReceivedPacket::decode(rewound)?))
            }
            PacketType::PublishRelease => {
                Ok(Self::PublishRelease(PublishReleasePacket::decode(rewound)?))
            }
            PacketType::PublishComplete => {
                Ok(Self::PublishComplete(PublishCompletePacket::decode(rewound)?))
            }
            PacketType::SubscribeAck => {
                Ok(Self::SubscribeAck(SubscribeAckPacket::decode(rewound)?))
            }
            PacketType::UnsubscribeAck => {
                Ok(Self::UnsubscribeAck(UnsubscribeAckPacket::decode(rewound)?))
            }
            PacketType::PingResponse => {
                Ok(Self::PingResponse(PingResponsePacket::decode(rewound)?))
            }
            PacketType::Connect
            | PacketType::Subscribe
            | PacketType::Unsubscribe
            | PacketType::PingRequest
            | PacketType::Disconnect
            | PacketType::Auth => Err(DecodeError::InvalidPacketType),
        }
    }
}

