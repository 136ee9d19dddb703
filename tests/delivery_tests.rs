//! 投递客户端的集成测试

mod common;

use common::UdpCollector;
use mariadb_log_consumer::config::{HttpConfig, TcpConfig, TransportsConfig, UdpConfig};
use mariadb_log_consumer::delivery::{DeliveryClient, DeliveryOutcome};
use mariadb_log_consumer::gelf::{FixedClock, GelfMessage, MessageBuilder};
use std::io::{Read, Write};
use std::net::TcpListener;

fn message() -> GelfMessage {
    MessageBuilder::new("db1", Box::new(FixedClock(1_700_000_000)), 20)
        .build(
            "ERROR boom".to_string(),
            "3",
            None,
            [("log_type", "error"), ("text", "")],
        )
        .unwrap()
}

/// 绑定后立即释放，得到一个当前没有监听者的端口
fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn test_udp_delivery() {
    let collector = UdpCollector::bind();
    let config = TransportsConfig { udp: Some(collector.config()), ..Default::default() };
    let mut client = DeliveryClient::from_config(&config).unwrap();

    assert_eq!(client.deliver(&message()), DeliveryOutcome::Delivered("udp"));
    let received = collector.drain();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["version"], "1.1");
    assert_eq!(received[0]["level"], "3");
    assert_eq!(received[0]["_log_type"], "error");
}

#[test]
fn test_tcp_delivery_with_ack() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut frame = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            stream.read_exact(&mut byte).unwrap();
            if byte[0] == 0 {
                break;
            }
            frame.push(byte[0]);
        }
        stream.write_all(b"ack").unwrap();
        frame
    });

    let config = TransportsConfig {
        tcp: Some(TcpConfig::new("127.0.0.1", port)),
        ..Default::default()
    };
    let mut client = DeliveryClient::from_config(&config).unwrap();
    assert_eq!(client.deliver(&message()), DeliveryOutcome::Delivered("tcp"));

    let frame = server.join().unwrap();
    let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
    assert_eq!(value["short_message"], "ERROR boom");
    client.close();
}

#[test]
fn test_all_transports_fail() {
    let mut http = HttpConfig::new(format!("http://127.0.0.1:{}", closed_port()));
    http.max_retries = 0;

    // UDP 目标无法解析，HTTP 端口没有监听
    let config = TransportsConfig {
        udp: Some(UdpConfig { host: "no-such-host.invalid".to_string(), port: 12201 }),
        http: Some(http),
        ..Default::default()
    };
    let mut client = DeliveryClient::from_config(&config).unwrap();
    assert_eq!(client.len(), 2);
    assert_eq!(client.deliver(&message()), DeliveryOutcome::Exhausted);
}

#[test]
fn test_udp_failure_falls_back_to_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let config = TransportsConfig {
        udp: Some(UdpConfig { host: "no-such-host.invalid".to_string(), port: 12201 }),
        tcp: Some(TcpConfig::new("127.0.0.1", port)),
        ..Default::default()
    };
    let mut client = DeliveryClient::from_config(&config).unwrap();
    let (mut peer, _) = listener.accept().unwrap();
    peer.write_all(b"ok").unwrap();

    assert_eq!(client.deliver(&message()), DeliveryOutcome::Delivered("tcp"));
}

#[test]
fn test_tcp_connect_failure_is_os_error() {
    let config = TransportsConfig {
        tcp: Some(TcpConfig::new("127.0.0.1", closed_port())),
        ..Default::default()
    };
    let err = DeliveryClient::from_config(&config).unwrap_err();
    assert!(err.is_os_error());
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn test_no_transports() {
    let mut client = DeliveryClient::from_config(&TransportsConfig::default()).unwrap();
    assert!(client.is_empty());
    assert_eq!(client.deliver(&message()), DeliveryOutcome::NoTransports);
}
