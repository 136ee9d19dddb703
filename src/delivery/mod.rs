//! GELF 消息投递
//!
//! 按 UDP、TCP、HTTP 的优先级依次尝试，第一个成功的传输即结束本次投递。
//! 失败只记录日志，不向上传播；无论结果如何，这个条目都算已处理。

pub mod http;
pub mod tcp;
pub mod udp;

pub use http::HttpTransport;
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

use crate::config::TransportsConfig;
use crate::error::{ConsumerError, Result};
use crate::gelf::GelfMessage;

/// 传输错误
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{transport} 连接失败: {source}")]
    Connect {
        transport: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{transport} 读写失败: {source}")]
    Io {
        transport: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP请求失败: {0}")]
    Http(String),

    #[error("HTTP响应状态码 {0}")]
    Status(u16),

    #[error("{0} 连接已断开")]
    Disconnected(&'static str),
}

impl TransportError {
    pub(crate) fn io(transport: &'static str, source: std::io::Error) -> Self {
        Self::Io { transport, source }
    }
}

/// 所有传输方式都要实现的操作
pub trait Transport {
    /// 用于日志的名字
    fn name(&self) -> &'static str;

    /// 发送一条已序列化的消息
    fn send(&mut self, payload: &[u8]) -> std::result::Result<(), TransportError>;

    /// 释放连接
    fn close(&mut self) {}
}

/// 一次投递的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 由该传输送达
    Delivered(&'static str),
    /// 所有传输都失败了
    Exhausted,
    /// 没有配置任何传输
    NoTransports,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }
}

/// 投递客户端
#[derive(Default)]
pub struct DeliveryClient {
    transports: Vec<Box<dyn Transport>>,
}

impl std::fmt::Debug for DeliveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.transports.iter().map(|t| t.name()).collect();
        f.debug_struct("DeliveryClient").field("transports", &names).finish()
    }
}

impl DeliveryClient {
    /// 传输按给定顺序尝试
    pub fn new(transports: Vec<Box<dyn Transport>>) -> Self {
        Self { transports }
    }

    /// 根据配置创建客户端，顺序固定为 UDP、TCP、HTTP
    pub fn from_config(config: &TransportsConfig) -> Result<Self> {
        let mut transports: Vec<Box<dyn Transport>> = Vec::new();

        if let Some(udp) = &config.udp {
            let transport = UdpTransport::new(udp)
                .map_err(|e| ConsumerError::os("无法创建UDP套接字", io_source(e)))?;
            transports.push(Box::new(transport));
        }

        if let Some(tcp) = &config.tcp {
            let transport = TcpTransport::connect(tcp).map_err(|e| {
                ConsumerError::os(
                    format!("无法连接 Graylog TCP {}:{}", tcp.host, tcp.port),
                    io_source(e),
                )
            })?;
            transports.push(Box::new(transport));
        }

        if let Some(http) = &config.http {
            transports.push(Box::new(HttpTransport::new(http)?));
        }

        let names: Vec<&str> = transports.iter().map(|t| t.name()).collect();
        tracing::info!("已启用的传输: {:?}", names);
        Ok(Self { transports })
    }

    pub fn len(&self) -> usize {
        self.transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    /// 投递一条消息
    pub fn deliver(&mut self, message: &GelfMessage) -> DeliveryOutcome {
        if self.transports.is_empty() {
            tracing::debug!("没有配置传输，消息被丢弃");
            return DeliveryOutcome::NoTransports;
        }

        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("GELF消息序列化失败: {}", e);
                return DeliveryOutcome::Exhausted;
            }
        };
        tracing::debug!("GELF: {}", payload);

        for transport in self.transports.iter_mut() {
            match transport.send(payload.as_bytes()) {
                Ok(()) => {
                    tracing::trace!("消息已通过 {} 发送", transport.name());
                    return DeliveryOutcome::Delivered(transport.name());
                }
                Err(e) => {
                    tracing::warn!("通过 {} 发送失败: {}", transport.name(), e);
                }
            }
        }

        tracing::error!("所有传输均失败，消息未送达");
        DeliveryOutcome::Exhausted
    }

    pub fn close(&mut self) {
        for transport in self.transports.iter_mut() {
            transport.close();
        }
    }
}

fn io_source(err: TransportError) -> std::io::Error {
    match err {
        TransportError::Connect { source, .. } | TransportError::Io { source, .. } => source,
        other => std::io::Error::other(other.to_string()),
    }
}
