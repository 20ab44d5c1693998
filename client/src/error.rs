// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};
use std::io;
use tokio_tungstenite::tungstenite;

/// CONNACK return codes 1-5, mapped from the wire byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectReturnCode {
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadUsernameOrPassword,
    NotAuthorized,
}

impl Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl ConnectReturnCode {
    #[must_use]
    pub const fn from_byte(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::UnacceptableProtocolVersion),
            2 => Some(Self::IdentifierRejected),
            3 => Some(Self::ServerUnavailable),
            4 => Some(Self::BadUsernameOrPassword),
            5 => Some(Self::NotAuthorized),
            _ => None,
        }
    }
}

/// Represent the types of errors a client operation may fail with.
#[derive(Clone, Debug)]
pub enum ErrorKind {
    /// `connect()` called while the client was not `Disconnected`.
    AlreadyConnected,

    /// An operation was attempted with no active connection.
    NoConnection,

    /// The broker rejected the CONNECT with a nonzero return code.
    FailedToConnect { return_code: ConnectReturnCode },

    /// A pending operation's deadline elapsed before it completed.
    Timeout,

    /// An inbound packet was well-formed but not valid in the current context.
    UnexpectedPacket,

    /// An inbound byte sequence could not be decoded as a valid packet.
    MalformedPacket,

    /// No PINGRESP arrived within the keep-alive grace window.
    KeepAliveTimeout,

    /// The connection closed, carrying every outstanding task down with it.
    ConnectionClosed,

    /// The packet-id allocator has no free id left to hand out.
    TooManyInflight,

    /// A SUBSCRIBE request had one or more filters rejected by the broker.
    SubscribeFailed { indices: Vec<usize> },

    /// The underlying transport (TCP/TLS/WebSocket) failed.
    TransportError,
}

#[derive(Clone, Debug)]
pub struct Error {
    /// Type of current error.
    kind: ErrorKind,

    /// Detail message about this error.
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Error {
            kind,
            message: message.to_owned(),
        }
    }

    #[must_use]
    pub fn from_string(kind: ErrorKind, message: String) -> Self {
        Error { kind, message }
    }

    #[must_use]
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::from_string(ErrorKind::TransportError, format!("IO error: {err}"))
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Error::from_string(ErrorKind::TransportError, format!("WebSocket error: {err}"))
    }
}

impl From<codec::EncodeError> for Error {
    fn from(err: codec::EncodeError) -> Self {
        Error::from_string(ErrorKind::MalformedPacket, format!("{err:?}"))
    }
}

impl From<codec::DecodeError> for Error {
    fn from(err: codec::DecodeError) -> Self {
        Error::from_string(ErrorKind::MalformedPacket, format!("{err:?}"))
    }
}

impl From<crate::framer::FramerError> for Error {
    fn from(err: crate::framer::FramerError) -> Self {
        match err {
            crate::framer::FramerError::TooLarge(too_large) => Error::from_string(
                ErrorKind::MalformedPacket,
                format!(
                    "packet of {} bytes exceeds the configured maximum",
                    too_large.declared_len
                ),
            ),
            crate::framer::FramerError::Decode(decode_err) => Error::from(decode_err),
        }
    }
}
