mod common;

use codec::{
    ByteArray, ConnectAckPacket, ConnectReturnCode as CodecReturnCode, DecodePacket,
    SubscribeAck, SubscribeAckPacket, SubscribePacket, QoS,
};
use mqtt311_client::{Client, ConnectInfo, ConnectOptions, ErrorKind, SubscribeInfo, SubscribeOutcome};
use tokio::time::timeout;

use common::{bind_loopback, encode_and_write, read_one_packet, TEST_TIMEOUT};

async fn accept_and_connack(listener: tokio::net::TcpListener) -> tokio::net::TcpStream {
    let (mut stream, _addr) = listener.accept().await.expect("accept");
    let _bytes = read_one_packet(&mut stream).await;
    let ack = ConnectAckPacket::new(false, CodecReturnCode::Accepted);
    encode_and_write(&mut stream, &ack).await;
    stream
}

async fn connect_client(port: u16) -> Client {
    common::init_logging();
    let client = Client::new();
    let options = ConnectOptions::new("127.0.0.1", port).unwrap();
    let info = ConnectInfo::new("c1");
    timeout(TEST_TIMEOUT, client.connect(&options, &info))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    client
}

#[tokio::test]
async fn test_subscribe_reports_granted_qos() {
    let (listener, port) = bind_loopback().await;
    let broker = tokio::spawn(async move {
        let mut stream = accept_and_connack(listener).await;
        let bytes = read_one_packet(&mut stream).await;
        let mut ba = ByteArray::new(&bytes);
        let subscribe = SubscribePacket::decode(&mut ba).unwrap();
        assert_eq!(subscribe.topics().len(), 1);
        assert_eq!(subscribe.topics()[0].topic(), "a/b");

        let ack = SubscribeAckPacket::new(subscribe.packet_id(), SubscribeAck::QoS(QoS::AtLeastOnce));
        encode_and_write(&mut stream, &ack).await;
    });

    let client = connect_client(port).await;
    let mut info = SubscribeInfo::new();
    info.add("a/b", QoS::AtLeastOnce);
    let outcomes = timeout(TEST_TIMEOUT, client.subscribe(info))
        .await
        .expect("subscribe timed out")
        .expect("subscribe failed");
    assert_eq!(outcomes, vec![SubscribeOutcome::Granted(QoS::AtLeastOnce)]);

    timeout(TEST_TIMEOUT, broker).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_subscribe_all_filters_rejected_is_an_error() {
    let (listener, port) = bind_loopback().await;
    let broker = tokio::spawn(async move {
        let mut stream = accept_and_connack(listener).await;
        let bytes = read_one_packet(&mut stream).await;
        let mut ba = ByteArray::new(&bytes);
        let subscribe = SubscribePacket::decode(&mut ba).unwrap();

        let ack = SubscribeAckPacket::new(subscribe.packet_id(), SubscribeAck::Failed);
        encode_and_write(&mut stream, &ack).await;
    });

    let client = connect_client(port).await;
    let mut info = SubscribeInfo::new();
    info.add("a/b", QoS::AtLeastOnce);
    let err = timeout(TEST_TIMEOUT, client.subscribe(info))
        .await
        .expect("subscribe timed out")
        .expect_err("expected every filter rejected to be an error");
    assert!(matches!(err.kind(), ErrorKind::SubscribeFailed { .. }));

    timeout(TEST_TIMEOUT, broker).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_subscribe_partial_grant_succeeds() {
    let (listener, port) = bind_loopback().await;
    let broker = tokio::spawn(async move {
        let mut stream = accept_and_connack(listener).await;
        let bytes = read_one_packet(&mut stream).await;
        let mut ba = ByteArray::new(&bytes);
        let subscribe = SubscribePacket::decode(&mut ba).unwrap();
        assert_eq!(subscribe.topics().len(), 2);

        let ack = SubscribeAckPacket::with_vec(
            subscribe.packet_id(),
            vec![SubscribeAck::QoS(QoS::AtMostOnce), SubscribeAck::Failed],
        );
        encode_and_write(&mut stream, &ack).await;
    });

    let client = connect_client(port).await;
    let mut info = SubscribeInfo::new();
    info.add("a/b", QoS::AtMostOnce);
    info.add("c/#", QoS::ExactOnce);
    let outcomes = timeout(TEST_TIMEOUT, client.subscribe(info))
        .await
        .expect("subscribe timed out")
        .expect("subscribe failed");
    assert_eq!(
        outcomes,
        vec![SubscribeOutcome::Granted(QoS::AtMostOnce), SubscribeOutcome::Failed]
    );

    timeout(TEST_TIMEOUT, broker).await.unwrap().unwrap();
}
