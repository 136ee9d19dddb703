//! 错误类型定义
//!
//! 这个模块定义了消费者中使用的所有错误类型，使用 thiserror 提供丰富的错误信息。
//! 每种错误都对应一个进程退出码，见 [`ConsumerError::exit_code`]。

use crate::checkpoint::RotationStep;
use crate::delivery::TransportError;
use crate::gelf::GelfError;
use std::path::PathBuf;

/// 消费者的结果类型
pub type Result<T> = std::result::Result<T, ConsumerError>;

/// 正常退出
pub const EXIT_OK: i32 = 0;
/// 一般错误
pub const EXIT_GENERIC: i32 = 1;
/// 配置无效
pub const EXIT_CONFIG: i32 = 2;
/// 操作系统层面的错误（无法打开源日志、检查点或锁文件）
pub const EXIT_OS: i32 = 3;

/// 消费者错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 启动阶段的操作系统错误
    #[error("系统错误: {context}: {source}")]
    Os {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// 运行期间的 IO 错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// 检查点文件最后一行无法解析
    #[error("检查点损坏 ({}): {line:?}", path.display())]
    MalformedCheckpoint { path: PathBuf, line: String },

    /// 检查点轮转失败，需要人工介入
    #[error("检查点轮转失败 (已完成步骤: {step}): {source}")]
    Rotation {
        step: RotationStep,
        #[source]
        source: std::io::Error,
    },

    /// GELF 消息构造错误
    #[error("GELF错误: {0}")]
    Gelf(#[from] GelfError),

    /// 传输错误
    #[error("传输错误: {0}")]
    Transport(#[from] TransportError),

    /// TOML 配置文件解析错误
    #[error("配置文件解析错误: {0}")]
    Toml(#[from] toml::de::Error),

    /// 日志错误（仅在启用 logging feature 时可用）
    #[cfg(feature = "logging")]
    #[error("日志错误: {0}")]
    Log(#[from] crate::logging::LogError),

    /// 其他错误
    #[error("未知错误: {0}")]
    Other(String),
}

impl ConsumerError {
    /// 创建一个配置错误
    pub fn config<S: Into<String>>(message: S) -> Self {
        let message = message.into();
        tracing::error!("配置错误: {}", message);
        Self::Config(message)
    }

    /// 创建一个带上下文的系统错误
    pub fn os<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        let context = context.into();
        tracing::error!("系统错误: {}: {}", context, source);
        Self::Os { context, source }
    }

    /// 创建一个检查点损坏错误
    pub fn malformed_checkpoint<P: Into<PathBuf>, S: Into<String>>(
        path: P,
        line: S,
    ) -> Self {
        let path = path.into();
        let line = line.into();
        tracing::error!("检查点 {} 最后一行无法解析: {:?}", path.display(), line);
        Self::MalformedCheckpoint { path, line }
    }

    /// 创建一个其他类型错误
    pub fn other<S: Into<String>>(message: S) -> Self {
        let message = message.into();
        tracing::error!("未知错误: {}", message);
        Self::Other(message)
    }

    /// 错误对应的进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Toml(_) => EXIT_CONFIG,
            Self::Os { .. }
            | Self::MalformedCheckpoint { .. }
            | Self::Rotation { .. } => EXIT_OS,
            _ => EXIT_GENERIC,
        }
    }

    /// 检查是否为配置错误
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Toml(_))
    }

    /// 检查是否为系统错误
    pub fn is_os_error(&self) -> bool {
        matches!(self, Self::Os { .. })
    }

    /// 检查是否为检查点损坏
    pub fn is_malformed_checkpoint(&self) -> bool {
        matches!(self, Self::MalformedCheckpoint { .. })
    }

    /// 检查是否为轮转失败
    pub fn is_rotation_error(&self) -> bool {
        matches!(self, Self::Rotation { .. })
    }
}
