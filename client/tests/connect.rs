mod common;

use codec::{ConnectAckPacket, ConnectPacket, ConnectReturnCode as CodecReturnCode, DecodePacket};
use mqtt311_client::{Client, ClientStatus, ConnectInfo, ConnectOptions, ErrorKind};
use tokio::io::AsyncReadExt;
use tokio::time::timeout;

use common::{bind_loopback, encode_and_write, read_one_packet, TEST_TIMEOUT};

#[tokio::test]
async fn test_connect_then_disconnect_closes_transport() {
    common::init_logging();
    let (listener, port) = bind_loopback().await;

    let broker = tokio::spawn(async move {
        let (mut stream, _addr) = listener.accept().await.expect("accept");
        let bytes = read_one_packet(&mut stream).await;
        let mut ba = codec::ByteArray::new(&bytes);
        let connect = ConnectPacket::decode(&mut ba).expect("decode CONNECT");
        assert_eq!(connect.client_id(), "c1");

        let ack = ConnectAckPacket::new(false, CodecReturnCode::Accepted);
        encode_and_write(&mut stream, &ack).await;

        // After DISCONNECT the client closes the transport; confirm read returns EOF.
        let mut buf = [0_u8; 16];
        let read = stream.read(&mut buf).await.expect("read after disconnect");
        assert_eq!(read, 0, "expected the client to close the socket");
    });

    let client = Client::new();
    let options = ConnectOptions::new("127.0.0.1", port).unwrap();
    let info = ConnectInfo::new("c1");

    timeout(TEST_TIMEOUT, client.connect(&options, &info))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    assert_eq!(client.status(), ClientStatus::Connected);

    timeout(TEST_TIMEOUT, client.disconnect())
        .await
        .expect("disconnect timed out")
        .expect("disconnect failed");
    assert_eq!(client.status(), ClientStatus::Disconnected);

    timeout(TEST_TIMEOUT, broker).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_connect_rejected_leaves_client_disconnected() {
    let (listener, port) = bind_loopback().await;

    let broker = tokio::spawn(async move {
        let (mut stream, _addr) = listener.accept().await.expect("accept");
        let _bytes = read_one_packet(&mut stream).await;
        let ack = ConnectAckPacket::new(false, CodecReturnCode::IdentifierRejected);
        encode_and_write(&mut stream, &ack).await;
    });

    let client = Client::new();
    let options = ConnectOptions::new("127.0.0.1", port).unwrap();
    let info = ConnectInfo::new("c1");

    let result = timeout(TEST_TIMEOUT, client.connect(&options, &info))
        .await
        .expect("connect timed out");
    let err = result.expect_err("broker rejected the connect, expected an error");
    assert!(matches!(err.kind(), ErrorKind::FailedToConnect { .. }));
    assert_eq!(client.status(), ClientStatus::Disconnected);

    timeout(TEST_TIMEOUT, broker).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let (listener, port) = bind_loopback().await;

    let broker = tokio::spawn(async move {
        let (mut stream, _addr) = listener.accept().await.expect("accept");
        let _bytes = read_one_packet(&mut stream).await;
        let ack = ConnectAckPacket::new(false, CodecReturnCode::Accepted);
        encode_and_write(&mut stream, &ack).await;
        // Keep the stream alive for the duration of the test.
        let mut buf = [0_u8; 16];
        let _ = stream.read(&mut buf).await;
    });

    let client = Client::new();
    let options = ConnectOptions::new("127.0.0.1", port).unwrap();
    let info = ConnectInfo::new("c1");

    timeout(TEST_TIMEOUT, client.connect(&options, &info))
        .await
        .expect("connect timed out")
        .expect("connect failed");

    let err = client
        .connect(&options, &info)
        .await
        .expect_err("second connect should fail");
    assert!(matches!(err.kind(), ErrorKind::AlreadyConnected));

    broker.abort();
}
