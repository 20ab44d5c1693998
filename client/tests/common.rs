// Shared fake-broker harness for the integration tests in this directory.
//
// The real broker is out of scope for this crate; these tests drive the actual
// `Client` over a loopback TCP socket against a tiny hand-rolled peer that decodes
// and encodes packets with `mqtt311_codec` directly.

#![allow(dead_code)]

use std::time::Duration;

use codec::{ByteArray, DecodeError, DecodePacket, EncodePacket, FixedHeader};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

/// Install `env_logger` once per test binary so `log::debug!` output from the client
/// (e.g. discarded unmatched packets) is visible with `--nocapture`.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Bind a loopback listener and return it along with the port it picked.
pub async fn bind_loopback() -> (TcpListener, u16) {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .expect("failed to bind loopback listener");
    let port = listener.local_addr().expect("local_addr").port();
    (listener, port)
}

/// Read exactly one whole MQTT control packet off `stream`, returning its raw bytes.
///
/// Mirrors the client's own `Framer`, reimplemented here against only the codec's
/// public API since the real `Framer` type is private to the client crate.
pub async fn read_one_packet(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    loop {
        let mut chunk = [0_u8; 256];
        let read = stream
            .read(&mut chunk)
            .await
            .expect("fake broker read failed");
        assert!(read > 0, "peer closed before a full packet arrived");
        buf.extend_from_slice(&chunk[..read]);

        let mut ba = ByteArray::new(&buf);
        match FixedHeader::decode(&mut ba) {
            Ok(header) => {
                let total = header.bytes() + header.remaining_length();
                if buf.len() >= total {
                    buf.truncate(total);
                    return buf;
                }
            }
            Err(DecodeError::OutOfRange) => {}
            Err(err) => panic!("fake broker failed to decode fixed header: {err}"),
        }
    }
}

pub async fn encode_and_write<P: EncodePacket>(stream: &mut TcpStream, packet: &P) {
    let mut buf = Vec::new();
    packet.encode(&mut buf).expect("encode fake broker reply");
    tokio::io::AsyncWriteExt::write_all(stream, &buf)
        .await
        .expect("fake broker write failed");
}

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);
