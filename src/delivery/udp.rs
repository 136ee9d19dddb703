//! UDP 传输：无连接，每条消息一个数据报

use super::{Transport, TransportError};
use crate::config::UdpConfig;
use std::net::UdpSocket;

const NAME: &str = "udp";

#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    host: String,
    port: u16,
}

impl UdpTransport {
    pub fn new(config: &UdpConfig) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|source| TransportError::Connect { transport: NAME, source })?;
        tracing::debug!("UDP 目标 {}:{}", config.host, config.port);
        Ok(Self { socket, host: config.host.clone(), port: config.port })
    }
}

impl Transport for UdpTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        // 每次发送都重新解析地址，DNS 变更无需重启
        self.socket
            .send_to(payload, (self.host.as_str(), self.port))
            .map_err(|e| TransportError::io(NAME, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_send_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut transport =
            UdpTransport::new(&UdpConfig { host: "127.0.0.1".into(), port }).unwrap();
        transport.send(b"{\"version\":\"1.1\"}").unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"{\"version\":\"1.1\"}");
    }

    #[test]
    fn test_unresolvable_host_fails() {
        let mut transport = UdpTransport::new(&UdpConfig {
            host: "no-such-host.invalid".into(),
            port: 12201,
        })
        .unwrap();
        assert!(transport.send(b"x").is_err());
    }
}
