mod common;

use std::time::Duration;

use codec::{
    ByteArray, ConnectAckPacket, ConnectReturnCode as CodecReturnCode, DecodePacket, FixedHeader,
    PacketType, PingResponsePacket,
};
use mqtt311_client::{Client, ClientStatus, ConnectInfo, ConnectOptions, ErrorKind};
use tokio::time::timeout;

use common::{bind_loopback, encode_and_write, read_one_packet, TEST_TIMEOUT};

async fn accept_and_connack(listener: tokio::net::TcpListener) -> tokio::net::TcpStream {
    let (mut stream, _addr) = listener.accept().await.expect("accept");
    let _bytes = read_one_packet(&mut stream).await;
    let ack = ConnectAckPacket::new(false, CodecReturnCode::Accepted);
    encode_and_write(&mut stream, &ack).await;
    stream
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_sends_pingreq_and_survives_pingresp() {
    common::init_logging();
    let (listener, port) = bind_loopback().await;
    let broker = tokio::spawn(async move {
        let mut stream = accept_and_connack(listener).await;

        let bytes = read_one_packet(&mut stream).await;
        let mut ba = ByteArray::new(&bytes);
        let fixed_header = FixedHeader::decode(&mut ba).unwrap();
        assert_eq!(fixed_header.packet_type(), PacketType::PingRequest);

        let pong = PingResponsePacket::new();
        encode_and_write(&mut stream, &pong).await;
        stream
    });

    let client = Client::new();
    let options = ConnectOptions::new("127.0.0.1", port).unwrap();
    let mut info = ConnectInfo::new("c1");
    info.set_keep_alive(10);

    timeout(TEST_TIMEOUT, client.connect(&options, &info))
        .await
        .expect("connect timed out")
        .expect("connect failed");

    // Negotiated keep-alive of 10s yields a 5s ping interval (10 - 5s margin).
    tokio::time::advance(Duration::from_secs(5)).await;

    let mut stream = timeout(TEST_TIMEOUT, broker).await.unwrap().unwrap();

    // The connection must still be usable once the PINGRESP has been handled.
    assert_eq!(client.status(), ClientStatus::Connected);

    timeout(TEST_TIMEOUT, client.disconnect())
        .await
        .expect("disconnect timed out")
        .expect("disconnect failed");

    let mut buf = [0_u8; 16];
    use tokio::io::AsyncReadExt;
    let read = timeout(TEST_TIMEOUT, stream.read(&mut buf))
        .await
        .expect("read after disconnect timed out")
        .expect("read after disconnect failed");
    assert_eq!(read, 0);
}

#[tokio::test(start_paused = true)]
async fn test_missed_pingresp_times_out_connection() {
    let (listener, port) = bind_loopback().await;
    let broker = tokio::spawn(async move {
        let mut stream = accept_and_connack(listener).await;

        // Read the automatic PINGREQ but never answer it.
        let bytes = read_one_packet(&mut stream).await;
        let mut ba = ByteArray::new(&bytes);
        let fixed_header = FixedHeader::decode(&mut ba).unwrap();
        assert_eq!(fixed_header.packet_type(), PacketType::PingRequest);
        stream
    });

    let client = Client::new();
    let options = ConnectOptions::new("127.0.0.1", port).unwrap();
    let mut info = ConnectInfo::new("c1");
    info.set_keep_alive(10);

    timeout(TEST_TIMEOUT, client.connect(&options, &info))
        .await
        .expect("connect timed out")
        .expect("connect failed");

    // First advance to the 5s ping interval, triggering the automatic PINGREQ.
    tokio::time::advance(Duration::from_secs(5)).await;
    let _stream = timeout(TEST_TIMEOUT, broker).await.unwrap().unwrap();

    // Advance past the ping's own deadline (another interval) with no PINGRESP.
    tokio::time::advance(Duration::from_secs(6)).await;

    // Give the connection actor a chance to observe the expired deadline and tear down.
    tokio::task::yield_now().await;

    assert_eq!(client.status(), ClientStatus::Disconnected);

    let err = client
        .disconnect()
        .await
        .expect_err("disconnect should fail once the connection has already closed");
    assert!(matches!(err.kind(), ErrorKind::NoConnection));
}
