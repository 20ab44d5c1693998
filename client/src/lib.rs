// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Asynchronous MQTT 3.1.1 client session.
//!
//! [`Client`] is a cheaply cloneable handle to a single connection. `connect()` opens the
//! transport, drives the CONNECT/CONNACK handshake and spawns the background task that owns
//! the socket; every other method sends a command into that task and awaits its reply.

mod client;
mod connect_info;
mod connect_options;
mod error;
mod framer;
mod keep_alive;
mod listeners;
mod packet;
mod packet_id_allocator;
mod publish_info;
mod status;
mod subscribe_info;
mod task;
mod transport;

pub use client::Client;
pub use codec::{PublishPacket, QoS};
pub use connect_info::{ConnectInfo, Will};
pub use connect_options::{ConnectOptions, DEFAULT_MQTTS_PORT, DEFAULT_MQTT_PORT, DEFAULT_WS_PATH};
pub use error::{ConnectReturnCode, Error, ErrorKind};
pub use packet::InboundPacket;
pub use publish_info::PublishInfo;
pub use status::ClientStatus;
pub use subscribe_info::{SubscribeInfo, SubscribeOutcome, UnsubscribeInfo};
