// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use codec::utils::random_string;
use rustls::{Certificate, PrivateKey, RootCertStore};

use crate::error::{Error, ErrorKind};

/// Default TCP port for plain MQTT.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Default TCP port for MQTT over TLS.
pub const DEFAULT_MQTTS_PORT: u16 = 8883;

/// Default URL path used when tunnelling MQTT over WebSocket.
pub const DEFAULT_WS_PATH: &str = "/mqtt";

/// Connection parameters recognised by the client.
///
/// Invalid combinations (currently: `port == 0`) are rejected at construction rather
/// than deferred to `connect()`.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    host: String,
    port: u16,
    use_ssl: bool,
    tls_config: Option<Arc<rustls::ClientConfig>>,
    use_websockets: bool,
    ws_path: String,
    sni_server_name: Option<String>,
    timeout: Option<Duration>,
    client_id: String,
}

impl ConnectOptions {
    /// Create options pointing at `host`/`port`, plain TCP, with a random `client_id`.
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::TransportError` if `port` is `0`.
    pub fn new(host: &str, port: u16) -> Result<Self, Error> {
        if port == 0 {
            return Err(Error::new(
                ErrorKind::TransportError,
                "port 0 is not a valid connect target",
            ));
        }
        Ok(Self {
            host: host.to_owned(),
            port,
            use_ssl: false,
            tls_config: None,
            use_websockets: false,
            ws_path: DEFAULT_WS_PATH.to_owned(),
            sni_server_name: None,
            timeout: None,
            client_id: random_string(8),
        })
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn set_host(&mut self, host: &str) -> &mut Self {
        self.host = host.to_owned();
        self
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// # Errors
    ///
    /// Returns `ErrorKind::TransportError` if `port` is `0`.
    pub fn set_port(&mut self, port: u16) -> Result<&mut Self, Error> {
        if port == 0 {
            return Err(Error::new(
                ErrorKind::TransportError,
                "port 0 is not a valid connect target",
            ));
        }
        self.port = port;
        Ok(self)
    }

    #[must_use]
    pub const fn use_ssl(&self) -> bool {
        self.use_ssl
    }

    pub fn set_use_ssl(&mut self, use_ssl: bool) -> &mut Self {
        self.use_ssl = use_ssl;
        self
    }

    #[must_use]
    pub fn tls_config(&self) -> Option<&Arc<rustls::ClientConfig>> {
        self.tls_config.as_ref()
    }

    pub fn set_tls_config(&mut self, tls_config: Arc<rustls::ClientConfig>) -> &mut Self {
        self.tls_config = Some(tls_config);
        self
    }

    /// Build a `rustls::ClientConfig` from PEM files and install it via [`Self::set_tls_config`].
    ///
    /// `ca_cert_file` seeds the trust root. `client_cert_file`/`client_key_file` are only
    /// needed for mutual TLS; pass both or neither.
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::TransportError` if a file cannot be read, contains no usable
    /// certificate/key, or `rustls` rejects the assembled config.
    pub fn set_tls_config_from_pem_files(
        &mut self,
        ca_cert_file: &Path,
        client_cert_file: Option<&Path>,
        client_key_file: Option<&Path>,
    ) -> Result<&mut Self, Error> {
        let mut root_store = RootCertStore::empty();
        for cert in load_certs(ca_cert_file)? {
            root_store.add(&cert).map_err(|err| {
                Error::from_string(
                    ErrorKind::TransportError,
                    format!("invalid CA certificate in {ca_cert_file:?}: {err}"),
                )
            })?;
        }

        let builder = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store);

        let config = match (client_cert_file, client_key_file) {
            (Some(cert_file), Some(key_file)) => {
                let certs = load_certs(cert_file)?;
                let key = load_key(key_file)?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|err| {
                        Error::from_string(
                            ErrorKind::TransportError,
                            format!("failed to build client-auth TLS config: {err}"),
                        )
                    })?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(Error::new(
                    ErrorKind::TransportError,
                    "client_cert_file and client_key_file must both be set or both be absent",
                ))
            }
        };

        self.tls_config = Some(Arc::new(config));
        Ok(self)
    }

    #[must_use]
    pub const fn use_websockets(&self) -> bool {
        self.use_websockets
    }

    pub fn set_use_websockets(&mut self, use_websockets: bool) -> &mut Self {
        self.use_websockets = use_websockets;
        self
    }

    #[must_use]
    pub fn ws_path(&self) -> &str {
        &self.ws_path
    }

    pub fn set_ws_path(&mut self, ws_path: &str) -> &mut Self {
        self.ws_path = ws_path.to_owned();
        self
    }

    #[must_use]
    pub fn sni_server_name(&self) -> Option<&str> {
        self.sni_server_name.as_deref()
    }

    pub fn set_sni_server_name(&mut self, sni_server_name: &str) -> &mut Self {
        self.sni_server_name = Some(sni_server_name.to_owned());
        self
    }

    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn set_client_id(&mut self, client_id: &str) -> &mut Self {
        self.client_id = client_id.to_owned();
        self
    }
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>, Error> {
    let file = File::open(path).map_err(|err| {
        Error::from_string(
            ErrorKind::TransportError,
            format!("failed to open cert file at {path:?}: {err}"),
        )
    })?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file)).map_err(|err| {
        Error::from_string(
            ErrorKind::TransportError,
            format!("failed to parse cert file at {path:?}: {err}"),
        )
    })?;
    Ok(certs.into_iter().map(Certificate).collect())
}

fn load_key(path: &Path) -> Result<PrivateKey, Error> {
    let open = || {
        File::open(path).map_err(|err| {
            Error::from_string(
                ErrorKind::TransportError,
                format!("failed to open key file at {path:?}: {err}"),
            )
        })
    };

    if let Ok(mut keys) = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(open()?)) {
        if let Some(key) = keys.pop() {
            return Ok(PrivateKey(key));
        }
    }
    if let Ok(mut keys) = rustls_pemfile::rsa_private_keys(&mut BufReader::new(open()?)) {
        if let Some(key) = keys.pop() {
            return Ok(PrivateKey(key));
        }
    }

    Err(Error::from_string(
        ErrorKind::TransportError,
        format!("no usable private key found in {path:?}"),
    ))
}
