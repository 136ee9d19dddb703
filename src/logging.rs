//! 日志初始化和配置模块
//!
//! 这个模块提供了统一的日志初始化功能，使用 tracing 库。
//! 默认输出到标准错误；配置了日志目录时，额外写入按天轮转的日志文件。

use std::io;
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::SystemTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// 日志配置结构体
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别
    pub level: Level,
    /// 是否输出到控制台
    pub enable_stdout: bool,
    /// 日志文件目录
    pub log_dir: Option<PathBuf>,
}

impl LogConfig {
    /// 创建新的日志配置，使用默认级别
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置日志级别
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// 设置日志文件目录
    pub fn log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.log_dir = dir;
        self
    }

    /// 设置是否输出到控制台
    pub fn enable_stdout(mut self, enable: bool) -> Self {
        self.enable_stdout = enable;
        self
    }

    /// 从配置文件中的日志设置构造
    pub fn from_settings(settings: &crate::config::LogSettings) -> LogResult<Self> {
        let level = if settings.debug {
            Level::DEBUG
        } else {
            parse_level(&settings.level)?
        };
        Ok(Self {
            level,
            enable_stdout: settings.enable_stdout,
            log_dir: settings.log_dir.clone(),
        })
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: Level::INFO, enable_stdout: true, log_dir: None }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("IO错误: {0}")]
    Io(#[from] io::Error),
    #[error("日志配置错误: {0}")]
    Config(String),
    #[error("日志初始化错误: {0}")]
    Init(String),
}

/// 日志初始化结果
pub type LogResult<T> = Result<T, LogError>;

/// 解析日志级别字符串
pub fn parse_level(level: &str) -> LogResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(LogError::Config(format!("无效的日志级别: {other}"))),
    }
}

/// 初始化日志系统
///
/// 返回文件输出的 guard（如果有）。调用方需要在进程退出前一直持有它，
/// 否则缓冲中的日志可能丢失。
///
/// # Examples
///
/// ```no_run
/// use mariadb_log_consumer::logging::{init_logging, LogConfig};
/// use tracing::Level;
///
/// let _guard = init_logging(LogConfig::new().level(Level::DEBUG)).unwrap();
/// ```
pub fn init_logging(config: LogConfig) -> LogResult<Option<WorkerGuard>> {
    // RUST_LOG 优先于配置的级别
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let console_layer = config.enable_stdout.then(|| {
        fmt::layer()
            .with_writer(io::stderr)
            .with_timer(SystemTime)
            .with_target(true)
            .with_ansi(true)
            .boxed()
    });

    let mut guard = None;
    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender =
                tracing_appender::rolling::daily(dir, "mariadb-log-consumer");
            let (non_blocking, worker_guard) =
                tracing_appender::non_blocking(file_appender);
            guard = Some(worker_guard);
            Some(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_timer(SystemTime)
                    .with_target(true)
                    .with_ansi(false)
                    .boxed(),
            )
        }
        None => None,
    };

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LogError::Init(e.to_string()))?;

    tracing::debug!("日志系统初始化完成，级别: {}", config.level);
    Ok(guard)
}
