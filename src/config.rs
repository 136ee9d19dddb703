//! 配置管理模块
//!
//! 提供统一的配置文件读取和校验功能。配置在启动时构造一次，之后以不可变引用
//! 传递给各个组件，组件之间不共享任何可变的默认容器。

use crate::error::{ConsumerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 默认检查点文件
pub const DEFAULT_CHECKPOINT_PATH: &str = "/var/mariadb-to-graylog/logs/events.log";
/// 默认锁文件目录
pub const DEFAULT_LOCK_DIR: &str = "/var/run/mariadb-to-graylog";
/// GELF 默认端口
pub const DEFAULT_GELF_PORT: u16 = 12201;

/// 要消费的日志类型
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    /// 错误日志
    Error,
    /// 慢查询日志
    Slow,
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogType::Error => write!(f, "error"),
            LogType::Slow => write!(f, "slow"),
        }
    }
}

/// 读到文件末尾或达到条数上限时的停止策略
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum StopPolicy {
    /// 读到文件末尾即停止
    Eof,
    /// 达到条数上限才停止，文件末尾时等待
    Limit,
    /// 永不停止，持续跟踪
    #[default]
    Never,
}

impl StopPolicy {
    /// 在文件末尾时是否结束
    pub fn stops_at_eof(self) -> bool {
        matches!(self, StopPolicy::Eof)
    }
}

/// 主配置结构体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 源日志配置
    #[serde(default)]
    pub source: SourceConfig,
    /// 运行实例配置
    #[serde(default)]
    pub run: RunConfig,
    /// 检查点配置
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    /// GELF 消息配置
    #[serde(default)]
    pub gelf: GelfConfig,
    /// 查询指纹化配置
    #[serde(default)]
    pub fingerprint: FingerprintConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogSettings,
    /// 传输配置
    #[serde(default)]
    pub transports: TransportsConfig,
}

/// 源日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// 日志类型
    pub log_type: LogType,
    /// 源日志路径
    pub path: PathBuf,
    /// 最多处理的条目数
    pub limit: Option<u64>,
    /// 开头跳过的条目数
    pub skip: u64,
    /// 停止策略
    pub stop: StopPolicy,
    /// 文件末尾等待间隔（毫秒）
    pub eof_wait_ms: u64,
    /// 两次读取之间的节流间隔（毫秒）
    pub pacing_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            log_type: LogType::Error,
            path: PathBuf::new(),
            limit: None,
            skip: 0,
            stop: StopPolicy::Never,
            eof_wait_ms: 1000,
            pacing_ms: 0,
        }
    }
}

impl SourceConfig {
    pub fn eof_wait(&self) -> Duration {
        Duration::from_millis(self.eof_wait_ms)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    /// 实际生效的停止策略：设置了上限时，达到上限总会停止
    pub fn effective_stop(&self) -> StopPolicy {
        match (self.stop, self.limit) {
            (StopPolicy::Never, Some(_)) => StopPolicy::Limit,
            (stop, _) => stop,
        }
    }
}

/// 运行实例配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// 实例标签，默认为日志类型
    pub label: Option<String>,
    /// 跳过单实例检查
    pub force_run: bool,
    /// 锁文件目录
    pub lock_dir: PathBuf,
    /// 发送给 Graylog 的主机名，为空时取系统主机名
    pub hostname: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            label: None,
            force_run: false,
            lock_dir: PathBuf::from(DEFAULT_LOCK_DIR),
            hostname: None,
        }
    }
}

/// 检查点配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// 检查点文件路径
    pub path: PathBuf,
    /// 启动时清空检查点
    pub truncate: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self { path: PathBuf::from(DEFAULT_CHECKPOINT_PATH), truncate: false }
    }
}

/// GELF 消息配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GelfConfig {
    /// short_message 中正文截取的字符数
    pub short_message_len: usize,
}

impl Default for GelfConfig {
    fn default() -> Self {
        Self { short_message_len: 20 }
    }
}

/// 查询指纹化配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// 外部指纹化程序，为空时原样使用查询文本
    pub command: Option<String>,
    /// 附加参数
    pub args: Vec<String>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// 是否启用控制台输出
    pub enable_stdout: bool,
    /// 日志输出目录，为空时不写文件
    pub log_dir: Option<PathBuf>,
    /// 日志级别 (trace, debug, info, warn, error)
    pub level: String,
    /// 调试模式：打印每条 GELF 消息，并且不拦截主循环中的 panic
    pub debug: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            enable_stdout: true,
            log_dir: None,
            level: "info".to_string(),
            debug: false,
        }
    }
}

/// 传输配置，按 UDP → TCP → HTTP 的优先级尝试
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportsConfig {
    pub udp: Option<UdpConfig>,
    pub tcp: Option<TcpConfig>,
    pub http: Option<HttpConfig>,
}

impl TransportsConfig {
    pub fn is_empty(&self) -> bool {
        self.udp.is_none() && self.tcp.is_none() && self.http.is_none()
    }
}

/// UDP 传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpConfig {
    pub host: String,
    #[serde(default = "default_gelf_port")]
    pub port: u16,
}

/// TCP 传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    pub host: String,
    #[serde(default = "default_gelf_port")]
    pub port: u16,
    /// 连接、发送、接收超时（毫秒）
    #[serde(default = "default_tcp_timeout_ms")]
    pub timeout_ms: u64,
    /// 每条消息后追加 NUL 结束符
    #[serde(default = "default_true")]
    pub null_terminate: bool,
    /// 确认应答最多读取的字节数
    #[serde(default = "default_reply_size")]
    pub reply_size: usize,
    /// 连接断开后发送前的重连次数，0 表示不重连
    #[serde(default)]
    pub reconnect_attempts: u32,
}

/// HTTP 传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// 基础 URL，例如 `https://graylog.local:12201`
    pub url: String,
    /// 连接池空闲超时（毫秒）
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// 单次请求的硬超时（毫秒）
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
    /// 最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 指数退避因子（秒）
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_gelf_port() -> u16 {
    DEFAULT_GELF_PORT
}
fn default_tcp_timeout_ms() -> u64 {
    5000
}
fn default_true() -> bool {
    true
}
fn default_reply_size() -> usize {
    1024
}
fn default_idle_timeout_ms() -> u64 {
    30_000
}
fn default_http_timeout_ms() -> u64 {
    10_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_factor() -> f64 {
    0.5
}

impl TcpConfig {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout_ms: default_tcp_timeout_ms(),
            null_terminate: true,
            reply_size: default_reply_size(),
            reconnect_attempts: 0,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl HttpConfig {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            idle_timeout_ms: default_idle_timeout_ms(),
            timeout_ms: default_http_timeout_ms(),
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// 以源日志类型和路径构造一份默认配置
    pub fn new<P: Into<PathBuf>>(log_type: LogType, path: P) -> Self {
        let mut config = Self::default();
        config.source.log_type = log_type;
        config.source.path = path.into();
        config
    }

    /// 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConsumerError::config(format!(
                "无法读取配置文件 {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&content)
    }

    /// 从字符串加载配置（不做校验，命令行参数还可能覆盖其中的值）
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// 实例标签：未设置时使用日志类型
    pub fn label(&self) -> String {
        self.run
            .label
            .clone()
            .unwrap_or_else(|| self.source.log_type.to_string())
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.source.path.as_os_str().is_empty() {
            return Err(ConsumerError::config("未指定源日志路径"));
        }

        if self.source.stop == StopPolicy::Limit && self.source.limit.is_none()
        {
            return Err(ConsumerError::config(
                "停止策略为 limit 时必须设置 limit",
            ));
        }

        if self.source.limit == Some(0) {
            return Err(ConsumerError::config("limit 不能为0"));
        }

        if self.gelf.short_message_len == 0 {
            return Err(ConsumerError::config("short_message_len 不能为0"));
        }

        if self.run.label.as_deref().is_some_and(|l| l.trim().is_empty()) {
            return Err(ConsumerError::config("实例标签不能为空"));
        }

        match self.log.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConsumerError::config(format!(
                    "无效的日志级别: {}",
                    self.log.level
                )));
            }
        }

        if let Some(udp) = &self.transports.udp {
            validate_endpoint("udp", &udp.host, udp.port)?;
        }
        if let Some(tcp) = &self.transports.tcp {
            validate_endpoint("tcp", &tcp.host, tcp.port)?;
            if tcp.reply_size == 0 {
                return Err(ConsumerError::config("tcp reply_size 不能为0"));
            }
        }
        if let Some(http) = &self.transports.http {
            if !(http.url.starts_with("http://")
                || http.url.starts_with("https://"))
            {
                return Err(ConsumerError::config(format!(
                    "无效的 HTTP 地址: {}",
                    http.url
                )));
            }
            if http.backoff_factor.is_nan() || http.backoff_factor < 0.0 {
                return Err(ConsumerError::config("backoff_factor 不能为负数"));
            }
        }

        if self.transports.is_empty() {
            tracing::warn!("没有配置任何传输方式，消息只会被记录到检查点");
        }

        Ok(())
    }
}

fn validate_endpoint(kind: &str, host: &str, port: u16) -> Result<()> {
    if host.trim().is_empty() {
        return Err(ConsumerError::config(format!("{kind} 主机名不能为空")));
    }
    if port == 0 {
        return Err(ConsumerError::config(format!("{kind} 端口不能为0")));
    }
    Ok(())
}
