//! TCP 传输
//!
//! 启动时建立一条持久连接。每条消息写完后（可选地追加 NUL 结束符）读取一段有上限的
//! 确认应答。对端关闭连接或写入失败时丢弃连接；确认超时只算本次失败，连接保留，
//! 下一次写入之前先丢掉迟到的确认。

use super::{Transport, TransportError};
use crate::config::TcpConfig;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

const NAME: &str = "tcp";

#[derive(Debug)]
pub struct TcpTransport {
    config: TcpConfig,
    stream: Option<TcpStream>,
    /// 上一条消息等待确认超时，连接上可能还有迟到的确认
    stale_ack: bool,
}

/// 超时为 0 表示不设超时
fn optional_timeout(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

fn open_stream(config: &TcpConfig) -> io::Result<TcpStream> {
    let timeout = optional_timeout(config.timeout());
    let mut last_err = None;

    for addr in (config.host.as_str(), config.port).to_socket_addrs()? {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                stream.set_read_timeout(timeout)?;
                stream.set_write_timeout(timeout)?;
                stream.set_nodelay(true)?;
                tracing::debug!("已连接 Graylog TCP {}", addr);
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{} 没有可用地址", config.host),
        )
    }))
}

/// 以非阻塞方式读空连接上已到达的数据，返回丢弃的字节数
fn drain_pending(stream: &mut TcpStream) -> io::Result<usize> {
    stream.set_nonblocking(true)?;
    let mut buf = [0u8; 512];
    let mut drained = 0;
    let result = loop {
        match stream.read(&mut buf) {
            Ok(0) => break Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            Ok(n) => drained += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(drained),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => break Err(e),
        }
    };
    stream.set_nonblocking(false)?;
    result
}

fn write_frame(stream: &mut TcpStream, payload: &[u8], null_terminate: bool) -> io::Result<()> {
    stream.write_all(payload)?;
    if null_terminate {
        stream.write_all(&[0])?;
    }
    stream.flush()
}

impl TcpTransport {
    /// 建立连接，失败立即返回
    pub fn connect(config: &TcpConfig) -> Result<Self, TransportError> {
        let stream = open_stream(config)
            .map_err(|source| TransportError::Connect { transport: NAME, source })?;
        Ok(Self { config: config.clone(), stream: Some(stream), stale_ack: false })
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn reconnect(&mut self) -> Result<(), TransportError> {
        if self.config.reconnect_attempts == 0 {
            return Err(TransportError::Disconnected(NAME));
        }

        let mut last_err = None;
        for attempt in 1..=self.config.reconnect_attempts {
            match open_stream(&self.config) {
                Ok(stream) => {
                    tracing::info!("第 {} 次重连 Graylog TCP 成功", attempt);
                    self.stream = Some(stream);
                    self.stale_ack = false;
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("第 {} 次重连 Graylog TCP 失败: {}", attempt, e);
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(source) => Err(TransportError::Connect { transport: NAME, source }),
            None => Err(TransportError::Disconnected(NAME)),
        }
    }
}

impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if self.stream.is_none() {
            self.reconnect()?;
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::Disconnected(NAME));
        };

        if self.stale_ack {
            match drain_pending(stream) {
                Ok(n) => {
                    tracing::debug!("丢弃迟到的 TCP 确认 {} 字节", n);
                    self.stale_ack = false;
                }
                Err(e) => {
                    self.stream = None;
                    return Err(TransportError::io(NAME, e));
                }
            }
        }

        if let Err(e) = write_frame(stream, payload, self.config.null_terminate) {
            self.stream = None;
            return Err(TransportError::io(NAME, e));
        }

        let mut reply = vec![0u8; self.config.reply_size.max(1)];
        match stream.read(&mut reply) {
            Ok(0) => {
                self.stream = None;
                Err(TransportError::Disconnected(NAME))
            }
            Ok(n) => {
                tracing::trace!("TCP 确认 {} 字节", n);
                Ok(())
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                tracing::debug!("等待 TCP 确认超时");
                self.stale_ack = true;
                Err(TransportError::io(NAME, e))
            }
            Err(e) => {
                self.stream = None;
                Err(TransportError::io(NAME, e))
            }
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}
