// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::sync::Arc;

use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use rustls::{OwnedTrustAnchor, RootCertStore};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::connect_options::ConnectOptions;
use crate::error::{Error, ErrorKind};

/// A full-duplex byte stream to the broker: raw TCP, TLS over TCP, or MQTT-over-WebSocket.
///
/// The framer/codec pair above this type is agnostic to which variant is in use.
pub enum Transport {
    Tcp(TcpStream),
    Tls(TlsStream<TcpStream>),
    Ws(WebSocketStream<MaybeTlsStream<TcpStream>>),
}

impl Transport {
    /// Open a transport according to `options`.
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::TransportError` if the TCP connect, TLS handshake or
    /// WebSocket handshake fails.
    pub async fn connect(options: &ConnectOptions) -> Result<Self, Error> {
        if options.use_websockets() {
            Self::connect_ws(options).await
        } else if options.use_ssl() {
            Self::connect_tls(options).await
        } else {
            Self::connect_tcp(options).await
        }
    }

    async fn connect_tcp(options: &ConnectOptions) -> Result<Self, Error> {
        let addr = (options.host(), options.port());
        log::info!("connecting tcp to {}:{}", options.host(), options.port());
        let socket = TcpStream::connect(addr).await?;
        Ok(Self::Tcp(socket))
    }

    async fn connect_tls(options: &ConnectOptions) -> Result<Self, Error> {
        log::info!("connecting tls to {}:{}", options.host(), options.port());
        let socket = TcpStream::connect((options.host(), options.port())).await?;

        let config = if let Some(config) = options.tls_config() {
            config.clone()
        } else {
            Arc::new(default_client_config())
        };
        let connector = TlsConnector::from(config);

        let server_name_str = options.sni_server_name().unwrap_or_else(|| options.host());
        let server_name = rustls::ServerName::try_from(server_name_str).map_err(|_err| {
            Error::new(
                ErrorKind::TransportError,
                "invalid SNI server name in connect options",
            )
        })?;

        let socket = connector.connect(server_name, socket).await?;
        Ok(Self::Tls(socket))
    }

    async fn connect_ws(options: &ConnectOptions) -> Result<Self, Error> {
        let scheme = if options.use_ssl() { "wss" } else { "ws" };
        let url = format!(
            "{}://{}:{}{}",
            scheme,
            options.host(),
            options.port(),
            options.ws_path()
        );
        log::info!("connecting ws to {}", url);
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        Ok(Self::Ws(ws_stream))
    }

    /// Read whatever bytes are currently available into `buf`, returning how many were read.
    ///
    /// A return value of `0` means the peer closed the connection.
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::TransportError` on any underlying I/O or WebSocket failure.
    pub async fn read_buf(&mut self, buf: &mut Vec<u8>) -> Result<usize, Error> {
        match self {
            Self::Tcp(socket) => Ok(socket.read_buf(buf).await?),
            Self::Tls(socket) => Ok(socket.read_buf(buf).await?),
            Self::Ws(ws) => match ws.next().await {
                Some(msg) => {
                    let data = msg?.into_data();
                    let len = data.len();
                    buf.extend(data);
                    Ok(len)
                }
                None => Ok(0),
            },
        }
    }

    /// # Errors
    ///
    /// Returns `ErrorKind::TransportError` on any underlying I/O or WebSocket failure.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
        match self {
            Self::Tcp(socket) => Ok(socket.write_all(buf).await?),
            Self::Tls(socket) => Ok(socket.write_all(buf).await?),
            Self::Ws(ws) => {
                ws.send(Message::binary(buf)).await?;
                Ok(())
            }
        }
    }

    /// # Errors
    ///
    /// Returns `ErrorKind::TransportError` on any underlying I/O or WebSocket failure.
    pub async fn close(&mut self) -> Result<(), Error> {
        match self {
            Self::Tcp(socket) => Ok(socket.shutdown().await?),
            Self::Tls(socket) => Ok(socket.shutdown().await?),
            Self::Ws(ws) => Ok(ws.close(None).await?),
        }
    }
}

fn default_client_config() -> rustls::ClientConfig {
    let mut root_store = RootCertStore::empty();
    root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));
    rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}
