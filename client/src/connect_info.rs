// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{ConnectFlags, ConnectPacket, QoS};

use crate::error::Error;

/// A message the broker stores and publishes on the client's behalf if the connection
/// terminates abnormally (no DISCONNECT was seen first).
#[derive(Clone, Debug)]
pub struct Will {
    topic: String,
    payload: Vec<u8>,
    qos: QoS,
    retain: bool,
}

impl Will {
    #[must_use]
    pub fn new(topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.to_owned(),
            payload: payload.to_owned(),
            qos,
            retain,
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }
}

/// Parameters carried inside the CONNECT packet itself.
///
/// Distinct from [`crate::connect_options::ConnectOptions`], which configures the
/// transport (host, port, TLS, WebSocket) rather than the MQTT session.
#[derive(Clone, Debug)]
pub struct ConnectInfo {
    client_id: String,
    clean_session: bool,
    keep_alive: u16,
    username: Option<String>,
    password: Option<Vec<u8>>,
    will: Option<Will>,
}

impl ConnectInfo {
    #[must_use]
    pub fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_owned(),
            clean_session: true,
            keep_alive: 60,
            username: None,
            password: None,
            will: None,
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.clean_session = clean_session;
        self
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    /// Set the keep-alive interval in seconds, `0` to disable it.
    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    pub fn set_username(&mut self, username: &str) -> &mut Self {
        self.username = Some(username.to_owned());
        self
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn set_password(&mut self, password: &[u8]) -> &mut Self {
        self.password = Some(password.to_owned());
        self
    }

    #[must_use]
    pub fn password(&self) -> Option<&[u8]> {
        self.password.as_deref()
    }

    pub fn set_will(&mut self, will: Will) -> &mut Self {
        self.will = Some(will);
        self
    }

    #[must_use]
    pub fn will(&self) -> Option<&Will> {
        self.will.as_ref()
    }

    /// Build the CONNECT packet this info describes.
    ///
    /// # Errors
    ///
    /// Returns an error if the client id, username, password, will topic or will
    /// message fail the codec's own validation (length or charset).
    pub(crate) fn build_packet(&self) -> Result<ConnectPacket, Error> {
        let mut packet = ConnectPacket::new(&self.client_id)?;
        packet.set_keep_alive(self.keep_alive);

        let mut flags = ConnectFlags::default();
        flags.set_clean_session(self.clean_session);

        if let Some(username) = &self.username {
            packet.set_username(username)?;
            flags.set_has_username(true);
        }
        if let Some(password) = &self.password {
            packet.set_password(password)?;
            flags.set_has_password(true);
        }
        if let Some(will) = &self.will {
            packet.set_will_topic(&will.topic)?;
            packet.set_will_message(&will.payload)?;
            flags.set_will(true);
            flags.set_will_qos(will.qos);
            flags.set_will_retain(will.retain);
        }
        packet.set_connect_flags(flags);

        Ok(packet)
    }
}
