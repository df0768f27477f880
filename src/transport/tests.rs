use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Framed, LinesCodec};

use crate::broker::Broker;
use crate::broker::message::Message;
use crate::config::{BrokerSettings, ServerSettings};
use crate::transport::Server;
use crate::transport::codec::{self, Request, RequestFrame, RequestLineCodec};
use crate::utils::error::{DecodeError, ServerError};

#[test]
fn test_decode_produce() {
    let line = json!({"type": "PRODUCE", "topic": "orders", "body": "hello"}).to_string();
    assert_eq!(
        codec::decode_request(line.as_bytes()).unwrap(),
        Request::Publish {
            topic: "orders".to_string(),
            body: "hello".to_string(),
        }
    );
}

#[test]
fn test_decode_consume() {
    let line = json!({"type": "CONSUME", "topic": "orders"}).to_string();
    assert_eq!(
        codec::decode_request(line.as_bytes()).unwrap(),
        Request::Subscribe {
            topic: "orders".to_string()
        }
    );
}

#[test]
fn test_decode_produce_without_body_is_empty_payload() {
    let line = r#"{"type":"PRODUCE","topic":"orders"}"#;
    assert_eq!(
        codec::decode_request(line.as_bytes()).unwrap(),
        Request::Publish {
            topic: "orders".to_string(),
            body: String::new(),
        }
    );
}

#[test]
fn test_decode_base64_wrapped_request() {
    let line = STANDARD.encode(r#"{"type":"CONSUME","topic":"orders"}"#);
    assert_eq!(
        codec::decode_request(line.as_bytes()).unwrap(),
        Request::Subscribe {
            topic: "orders".to_string()
        }
    );
}

#[test]
fn test_decode_rejects_unknown_type() {
    let line = r#"{"type":"PING","topic":"orders"}"#;
    assert!(matches!(
        codec::decode_request(line.as_bytes()),
        Err(DecodeError::InvalidJson(_))
    ));
}

#[test]
fn test_decode_type_is_case_sensitive() {
    let line = r#"{"type":"produce","topic":"orders","body":"x"}"#;
    assert!(codec::decode_request(line.as_bytes()).is_err());
}

#[test]
fn test_decode_rejects_missing_or_empty_topic() {
    assert!(codec::decode_request(br#"{"type":"CONSUME"}"#).is_err());
    assert!(matches!(
        codec::decode_request(br#"{"type":"CONSUME","topic":""}"#),
        Err(DecodeError::EmptyTopic)
    ));
}

#[test]
fn test_decode_rejects_garbage() {
    assert!(matches!(
        codec::decode_request(b"not a request"),
        Err(DecodeError::InvalidBase64(_))
    ));
    assert!(matches!(
        codec::decode_request(b"{\"type\":"),
        Err(DecodeError::InvalidJson(_))
    ));
}

#[test]
fn test_encode_delivery_is_single_line_json() {
    let message = Message {
        timestamp: "2024-01-02T03:04:05Z".to_string(),
        payload: "multi\nline".to_string(),
    };
    let encoded = codec::encode_delivery(&message).unwrap();

    assert!(!encoded.contains('\n'));
    let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
    assert_eq!(value["payload"], "multi\nline");
    assert_eq!(value["timestamp"], "2024-01-02T03:04:05Z");
    assert_eq!(codec::decode_delivery(&encoded).unwrap(), message);
}

#[test]
fn test_heartbeat_detection() {
    assert!(codec::is_heartbeat(""));
    assert!(codec::is_heartbeat("\r"));
    assert!(!codec::is_heartbeat("{}"));
}

#[test]
fn test_decode_rejects_invalid_utf8() {
    assert!(matches!(
        codec::decode_request(b"\xff\xfe garbage"),
        Err(DecodeError::InvalidUtf8(_))
    ));
}

#[test]
fn test_decode_accepts_crlf_line() {
    assert_eq!(
        codec::decode_request(b"{\"type\":\"CONSUME\",\"topic\":\"orders\"}\r").unwrap(),
        Request::Subscribe {
            topic: "orders".to_string()
        }
    );
}

fn line(text: &[u8]) -> Option<RequestFrame> {
    Some(RequestFrame::Line(bytes::Bytes::copy_from_slice(text)))
}

#[test]
fn test_request_lines_are_split_on_newline() {
    let mut codec = RequestLineCodec::new(64);
    let mut buf = BytesMut::from(&b"first\n\xff\xfe\n\nsec"[..]);

    assert_eq!(codec.decode(&mut buf).unwrap(), line(b"first"));
    assert_eq!(codec.decode(&mut buf).unwrap(), line(b"\xff\xfe"));
    assert_eq!(codec.decode(&mut buf).unwrap(), line(b""));
    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(b"ond\n");
    assert_eq!(codec.decode(&mut buf).unwrap(), line(b"second"));
    assert!(buf.is_empty());
}

#[test]
fn test_overlong_request_line_is_skipped_once() {
    let mut codec = RequestLineCodec::new(8);
    let mut buf = BytesMut::from(&b"0123456789abcdef"[..]);

    // nothing is reported until the end of the long line arrives
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    assert!(buf.is_empty());

    buf.extend_from_slice(b"ghij\nok\n");
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(RequestFrame::Oversized));
    assert_eq!(codec.decode(&mut buf).unwrap(), line(b"ok"));
}

#[test]
fn test_complete_overlong_line_is_reported_in_one_call() {
    let mut codec = RequestLineCodec::new(4);
    let mut buf = BytesMut::from(&b"too long\nfine\n"[..]);

    assert_eq!(codec.decode(&mut buf).unwrap(), Some(RequestFrame::Oversized));
    assert_eq!(codec.decode(&mut buf).unwrap(), line(b"fine"));
}

#[test]
fn test_unterminated_last_line_is_returned_at_eof() {
    let mut codec = RequestLineCodec::new(64);
    let mut buf = BytesMut::from(&b"tail"[..]);

    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    assert_eq!(codec.decode_eof(&mut buf).unwrap(), line(b"tail"));
    assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
}

fn loopback() -> ServerSettings {
    ServerSettings {
        address: "127.0.0.1:0".to_string(),
        protocol: "tcp".to_string(),
    }
}

async fn start(settings: BrokerSettings) -> (Arc<Broker>, std::net::SocketAddr) {
    let broker = Arc::new(Broker::new(settings));
    let server = Server::bind(&loopback(), broker.clone()).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (broker, addr)
}

async fn wait_for_subscribers(broker: &Broker, topic: &str, expected: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while broker
            .registry()
            .get(topic)
            .map_or(0, |t| t.subscriber_count())
            != expected
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriber count not reached");
}

#[tokio::test]
async fn test_bind_rejects_unknown_protocol() {
    let settings = ServerSettings {
        address: "127.0.0.1:0".to_string(),
        protocol: "udp".to_string(),
    };
    let result = Server::bind(&settings, Arc::new(Broker::default())).await;
    assert!(matches!(result, Err(ServerError::UnsupportedProtocol(p)) if p == "udp"));
}

#[tokio::test]
async fn test_bind_failure_is_reported() {
    let (_broker, addr) = start(BrokerSettings::default()).await;
    let settings = ServerSettings {
        address: addr.to_string(),
        protocol: "tcp".to_string(),
    };
    let result = Server::bind(&settings, Arc::new(Broker::default())).await;
    assert!(matches!(result, Err(ServerError::Bind { .. })));
}

#[tokio::test]
async fn test_malformed_lines_are_skipped_before_subscribe() {
    let (broker, addr) = start(BrokerSettings::default()).await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, LinesCodec::new());

    framed.send("garbage").await.unwrap();
    framed.send(r#"{"type":"PING","topic":"orders"}"#).await.unwrap();
    framed.send("").await.unwrap();
    framed
        .send(r#"{"type":"CONSUME","topic":"orders"}"#)
        .await
        .unwrap();
    wait_for_subscribers(&broker, "orders", 1).await;

    broker.publish("orders", "after noise".to_string()).await.unwrap();

    let line = loop {
        let line = tokio::time::timeout(Duration::from_secs(2), framed.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if !codec::is_heartbeat(&line) {
            break line;
        }
    };
    assert_eq!(codec::decode_delivery(&line).unwrap().payload, "after noise");
}

#[tokio::test]
async fn test_producer_connection_is_closed_after_publish() {
    let (broker, addr) = start(BrokerSettings::default()).await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, LinesCodec::new());

    framed
        .send(r#"{"type":"PRODUCE","topic":"orders","body":"hi"}"#)
        .await
        .unwrap();

    let end = tokio::time::timeout(Duration::from_secs(2), framed.next())
        .await
        .unwrap();
    assert!(end.is_none());
    assert!(broker.registry().get("orders").is_some());
}

#[tokio::test]
async fn test_oversized_publish_closes_connection_without_delivery() {
    let (broker, addr) = start(BrokerSettings {
        max_payload_bytes: 4,
        ..BrokerSettings::default()
    })
    .await;
    let mut consumer = Framed::new(TcpStream::connect(addr).await.unwrap(), LinesCodec::new());
    consumer
        .send(r#"{"type":"CONSUME","topic":"orders"}"#)
        .await
        .unwrap();
    wait_for_subscribers(&broker, "orders", 1).await;

    let mut producer = Framed::new(TcpStream::connect(addr).await.unwrap(), LinesCodec::new());
    producer
        .send(r#"{"type":"PRODUCE","topic":"orders","body":"too long"}"#)
        .await
        .unwrap();
    let end = tokio::time::timeout(Duration::from_secs(2), producer.next())
        .await
        .unwrap();
    assert!(end.is_none());

    let delivered = tokio::time::timeout(Duration::from_millis(200), async {
        loop {
            match consumer.next().await {
                Some(Ok(line)) if codec::is_heartbeat(&line) => continue,
                other => return other,
            }
        }
    })
    .await;
    assert!(delivered.is_err());
}

async fn expect_payload(consumer: &mut Framed<TcpStream, LinesCodec>, expected: &str) {
    let line = loop {
        let line = tokio::time::timeout(Duration::from_secs(2), consumer.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if !codec::is_heartbeat(&line) {
            break line;
        }
    };
    assert_eq!(codec::decode_delivery(&line).unwrap().payload, expected);
}

#[tokio::test]
async fn test_overlong_request_line_is_dropped_and_reading_continues() {
    let (broker, addr) = start(BrokerSettings {
        max_frame_bytes: 64,
        ..BrokerSettings::default()
    })
    .await;
    let mut framed = Framed::new(TcpStream::connect(addr).await.unwrap(), LinesCodec::new());

    framed.send("x".repeat(256).as_str()).await.unwrap();
    framed
        .send(r#"{"type":"CONSUME","topic":"orders"}"#)
        .await
        .unwrap();
    wait_for_subscribers(&broker, "orders", 1).await;

    broker.publish("orders", "after long line".to_string()).await.unwrap();
    expect_payload(&mut framed, "after long line").await;
}

#[tokio::test]
async fn test_non_utf8_line_before_subscribe_is_dropped() {
    let (broker, addr) = start(BrokerSettings::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"\xff\xfe garbage\n{\"type\":\"CONSUME\",\"topic\":\"orders\"}\n")
        .await
        .unwrap();
    wait_for_subscribers(&broker, "orders", 1).await;

    broker.publish("orders", "after bad bytes".to_string()).await.unwrap();
    let mut framed = Framed::new(stream, LinesCodec::new());
    expect_payload(&mut framed, "after bad bytes").await;
}

#[tokio::test]
async fn test_producer_noise_is_dropped_before_publish() {
    let (broker, addr) = start(BrokerSettings::default()).await;
    let mut consumer = Framed::new(TcpStream::connect(addr).await.unwrap(), LinesCodec::new());
    consumer
        .send(r#"{"type":"CONSUME","topic":"orders"}"#)
        .await
        .unwrap();
    wait_for_subscribers(&broker, "orders", 1).await;

    let mut producer = TcpStream::connect(addr).await.unwrap();
    producer
        .write_all(b"garbage\n\xff\xfe\x80\n{\"type\":\"PING\"}\n")
        .await
        .unwrap();
    producer
        .write_all(b"{\"type\":\"PRODUCE\",\"topic\":\"orders\",\"body\":\"survived\"}\n")
        .await
        .unwrap();

    expect_payload(&mut consumer, "survived").await;

    let mut producer = Framed::new(producer, LinesCodec::new());
    let end = tokio::time::timeout(Duration::from_secs(2), producer.next())
        .await
        .unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn test_consumer_half_close_keeps_subscription() {
    let (broker, addr) = start(BrokerSettings {
        heartbeat_interval_ms: 50,
        ..BrokerSettings::default()
    })
    .await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"{\"type\":\"CONSUME\",\"topic\":\"orders\"}\n")
        .await
        .unwrap();
    wait_for_subscribers(&broker, "orders", 1).await;

    stream.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(broker.registry().get("orders").unwrap().subscriber_count(), 1);

    let report = broker.publish("orders", "after half close".to_string()).await.unwrap();
    assert_eq!(report.delivered, 1);
    let mut framed = Framed::new(stream, LinesCodec::new());
    expect_payload(&mut framed, "after half close").await;
}

#[tokio::test]
async fn test_shutdown_token_stops_listener_and_consumers() {
    let broker = Arc::new(Broker::default());
    let server = Server::bind(&loopback(), broker.clone()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_token();
    let serving = tokio::spawn(server.run());

    let mut consumer = Framed::new(TcpStream::connect(addr).await.unwrap(), LinesCodec::new());
    consumer
        .send(r#"{"type":"CONSUME","topic":"orders"}"#)
        .await
        .unwrap();
    wait_for_subscribers(&broker, "orders", 1).await;

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), serving)
        .await
        .unwrap()
        .unwrap();

    wait_for_subscribers(&broker, "orders", 0).await;
    let end = tokio::time::timeout(Duration::from_secs(2), consumer.next())
        .await
        .unwrap();
    assert!(end.is_none() || matches!(end, Some(Err(_))));
}
