//! GELF 消息
//!
//! 提供 GELF 消息值、消息构造器，以及可替换的时钟与主机名来源。
//! 参考: <https://go2docs.graylog.org/current/getting_in_log_data/gelf.html>

pub mod builder;
pub mod message;

pub use builder::{
    Clock, FixedClock, MessageBuilder, SystemClock, normalize_level,
    resolve_hostname,
};
pub use message::{GelfMessage, Mandatory};

/// GELF 协议版本
pub const GELF_VERSION: &str = "1.1";

/// 消息构造相关错误
#[derive(Debug, thiserror::Error)]
pub enum GelfError {
    /// 缺少必填字段
    #[error("缺少必填字段: {0}")]
    MissingField(&'static str),

    /// 字段重复
    #[error("字段重复: {0}")]
    DuplicateField(String),

    /// 字段不存在或不允许追加
    #[error("无效字段: {0}")]
    InvalidField(String),

    /// JSON 序列化失败
    #[error("序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),
}
