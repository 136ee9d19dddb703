//! 命令行参数
//!
//! 命令行参数覆盖配置文件中的同名项。没有配置文件时 `--log-type` 和 `--log` 必须给出。

use crate::config::{Config, HttpConfig, LogType, StopPolicy, TcpConfig, UdpConfig};
use crate::error::{ConsumerError, Result};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "mariadb-log-consumer",
    version,
    about = "消费 MariaDB 错误日志或慢查询日志，以 GELF 格式发送到 Graylog"
)]
pub struct Cli {
    /// 配置文件（TOML）
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// 要消费的日志类型
    #[arg(short = 't', long, value_enum, required_unless_present = "config")]
    pub log_type: Option<LogType>,

    /// 源日志路径
    #[arg(short = 'l', long = "log", value_name = "FILE", required_unless_present = "config")]
    pub log: Option<PathBuf>,

    /// 最多处理的条目数
    #[arg(long)]
    pub limit: Option<u64>,

    /// 开头跳过的条目数
    #[arg(long)]
    pub skip: Option<u64>,

    /// 停止策略
    #[arg(long, value_enum)]
    pub stop: Option<StopPolicy>,

    /// 文件末尾等待间隔（毫秒）
    #[arg(long, value_name = "MS")]
    pub eof_wait: Option<u64>,

    /// 两次读取之间的节流间隔（毫秒）
    #[arg(long, value_name = "MS")]
    pub pacing: Option<u64>,

    /// 实例标签，默认为日志类型
    #[arg(long)]
    pub label: Option<String>,

    /// 跳过单实例检查
    #[arg(long)]
    pub force_run: bool,

    /// 锁文件目录
    #[arg(long, value_name = "DIR")]
    pub lock_dir: Option<PathBuf>,

    /// 发送给 Graylog 的主机名
    #[arg(short = 'n', long)]
    pub hostname: Option<String>,

    /// 检查点文件
    #[arg(long, value_name = "FILE")]
    pub checkpoint: Option<PathBuf>,

    /// 启动时清空检查点，从头开始读取
    #[arg(long)]
    pub truncate_checkpoint: bool,

    /// short_message 中正文截取的字符数
    #[arg(long)]
    pub short_message_len: Option<usize>,

    /// 外部指纹化程序（慢查询日志）
    #[arg(long, value_name = "PROGRAM")]
    pub fingerprint_cmd: Option<String>,

    /// Graylog UDP 主机
    #[arg(short = 'H', long, visible_alias = "graylog-host")]
    pub udp_host: Option<String>,

    /// Graylog UDP 端口
    #[arg(short = 'P', long, visible_alias = "graylog-port")]
    pub udp_port: Option<u16>,

    /// Graylog TCP 主机
    #[arg(long)]
    pub tcp_host: Option<String>,

    /// Graylog TCP 端口
    #[arg(long)]
    pub tcp_port: Option<u16>,

    /// TCP 超时（毫秒）
    #[arg(long, value_name = "MS")]
    pub tcp_timeout: Option<u64>,

    /// 不在每条 TCP 消息后追加 NUL
    #[arg(long)]
    pub tcp_no_null: bool,

    /// TCP 确认应答最多读取的字节数
    #[arg(long)]
    pub tcp_reply_size: Option<usize>,

    /// TCP 连接断开后的重连次数
    #[arg(long, value_name = "N")]
    pub tcp_reconnect: Option<u32>,

    /// Graylog HTTP 基础地址，消息发送到 <URL>/gelf
    #[arg(long, value_name = "URL")]
    pub http_url: Option<String>,

    /// HTTP 请求超时（毫秒）
    #[arg(long, value_name = "MS")]
    pub http_timeout: Option<u64>,

    /// HTTP 连接池空闲超时（毫秒）
    #[arg(long, value_name = "MS")]
    pub http_idle_timeout: Option<u64>,

    /// HTTP 最大重试次数
    #[arg(long, value_name = "N")]
    pub http_retries: Option<u32>,

    /// HTTP 指数退避因子（秒）
    #[arg(long)]
    pub http_backoff: Option<f64>,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// 日志文件目录
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// 调试模式
    #[arg(long)]
    pub debug: bool,
}

/// 主机和端口必须成对出现
fn endpoint(
    kind: &str,
    host: Option<String>,
    port: Option<u16>,
) -> Result<Option<(String, u16)>> {
    match (host.filter(|h| !h.trim().is_empty()), port) {
        (Some(host), Some(port)) => Ok(Some((host, port))),
        (None, None) => Ok(None),
        _ => Err(ConsumerError::config(format!(
            "--{kind}-host 和 --{kind}-port 必须同时设置，或者都不设置"
        ))),
    }
}

impl Cli {
    /// 读取配置文件（如果有）并应用命令行覆盖
    pub fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        let source = &mut config.source;
        if let Some(log_type) = self.log_type {
            source.log_type = log_type;
        }
        if let Some(path) = self.log {
            source.path = path;
        }
        if self.limit.is_some() {
            source.limit = self.limit;
        }
        if let Some(skip) = self.skip {
            source.skip = skip;
        }
        if let Some(stop) = self.stop {
            source.stop = stop;
        }
        if let Some(ms) = self.eof_wait {
            source.eof_wait_ms = ms;
        }
        if let Some(ms) = self.pacing {
            source.pacing_ms = ms;
        }

        if self.label.is_some() {
            config.run.label = self.label;
        }
        config.run.force_run |= self.force_run;
        if let Some(dir) = self.lock_dir {
            config.run.lock_dir = dir;
        }
        if self.hostname.is_some() {
            config.run.hostname = self.hostname;
        }

        if let Some(path) = self.checkpoint {
            config.checkpoint.path = path;
        }
        config.checkpoint.truncate |= self.truncate_checkpoint;

        if let Some(len) = self.short_message_len {
            config.gelf.short_message_len = len;
        }
        if self.fingerprint_cmd.is_some() {
            config.fingerprint.command = self.fingerprint_cmd;
        }

        let transports = &mut config.transports;
        if let Some((host, port)) = endpoint("udp", self.udp_host, self.udp_port)? {
            transports.udp = Some(UdpConfig { host, port });
        }

        if let Some((host, port)) = endpoint("tcp", self.tcp_host, self.tcp_port)? {
            let tcp = transports
                .tcp
                .get_or_insert_with(|| TcpConfig::new(host.clone(), port));
            tcp.host = host;
            tcp.port = port;
        }
        let tcp_tuning = self.tcp_timeout.is_some()
            || self.tcp_no_null
            || self.tcp_reply_size.is_some()
            || self.tcp_reconnect.is_some();
        match transports.tcp.as_mut() {
            Some(tcp) => {
                if let Some(ms) = self.tcp_timeout {
                    tcp.timeout_ms = ms;
                }
                if self.tcp_no_null {
                    tcp.null_terminate = false;
                }
                if let Some(size) = self.tcp_reply_size {
                    tcp.reply_size = size;
                }
                if let Some(attempts) = self.tcp_reconnect {
                    tcp.reconnect_attempts = attempts;
                }
            }
            None if tcp_tuning => {
                tracing::warn!("未配置 TCP 传输，忽略 TCP 相关参数");
            }
            None => {}
        }

        if let Some(url) = self.http_url {
            let http = transports
                .http
                .get_or_insert_with(|| HttpConfig::new(url.clone()));
            http.url = url;
        }
        let http_tuning = self.http_timeout.is_some()
            || self.http_idle_timeout.is_some()
            || self.http_retries.is_some()
            || self.http_backoff.is_some();
        match transports.http.as_mut() {
            Some(http) => {
                if let Some(ms) = self.http_timeout {
                    http.timeout_ms = ms;
                }
                if let Some(ms) = self.http_idle_timeout {
                    http.idle_timeout_ms = ms;
                }
                if let Some(retries) = self.http_retries {
                    http.max_retries = retries;
                }
                if let Some(factor) = self.http_backoff {
                    http.backoff_factor = factor;
                }
            }
            None if http_tuning => {
                tracing::warn!("未配置 HTTP 传输，忽略 HTTP 相关参数");
            }
            None => {}
        }

        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        if self.log_dir.is_some() {
            config.log.log_dir = self.log_dir;
        }
        config.log.debug |= self.debug;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["mariadb-log-consumer"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_minimal_arguments() {
        let config = parse(&["-t", "slow", "-l", "/var/log/mysql/slow.log"])
            .into_config()
            .unwrap();
        assert_eq!(config.source.log_type, LogType::Slow);
        assert_eq!(config.source.path, PathBuf::from("/var/log/mysql/slow.log"));
        assert!(config.transports.is_empty());
        assert_eq!(config.label(), "slow");
    }

    #[test]
    fn test_log_arguments_required_without_config() {
        assert!(Cli::try_parse_from(["mariadb-log-consumer", "-t", "error"]).is_err());
        assert!(Cli::try_parse_from(["mariadb-log-consumer", "-t", "nope", "-l", "x"]).is_err());
    }

    #[test]
    fn test_graylog_aliases() {
        let config = parse(&[
            "-t",
            "error",
            "-l",
            "error.log",
            "--graylog-host",
            "graylog.local",
            "--graylog-port",
            "12202",
        ])
        .into_config()
        .unwrap();
        let udp = config.transports.udp.unwrap();
        assert_eq!(udp.host, "graylog.local");
        assert_eq!(udp.port, 12202);
    }

    #[test]
    fn test_host_without_port_is_config_error() {
        let err = parse(&["-t", "error", "-l", "error.log", "-H", "graylog.local"])
            .into_config()
            .unwrap_err();
        assert!(err.is_config_error());

        let err = parse(&["-t", "error", "-l", "error.log", "--tcp-port", "12201"])
            .into_config()
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_transport_tuning() {
        let config = parse(&[
            "-t",
            "error",
            "-l",
            "error.log",
            "--tcp-host",
            "g",
            "--tcp-port",
            "12201",
            "--tcp-no-null",
            "--tcp-reconnect",
            "2",
            "--http-url",
            "https://graylog.local:12201",
            "--http-retries",
            "0",
        ])
        .into_config()
        .unwrap();

        let tcp = config.transports.tcp.unwrap();
        assert!(!tcp.null_terminate);
        assert_eq!(tcp.reconnect_attempts, 2);
        assert_eq!(tcp.timeout_ms, 5000);

        let http = config.transports.http.unwrap();
        assert_eq!(http.url, "https://graylog.local:12201");
        assert_eq!(http.max_retries, 0);
    }

    #[test]
    fn test_source_overrides() {
        let config = parse(&[
            "-t",
            "error",
            "-l",
            "error.log",
            "--limit",
            "10",
            "--skip",
            "2",
            "--stop",
            "eof",
            "--label",
            "primary",
            "--force-run",
            "--debug",
        ])
        .into_config()
        .unwrap();
        assert_eq!(config.source.limit, Some(10));
        assert_eq!(config.source.skip, 2);
        assert_eq!(config.source.stop, StopPolicy::Eof);
        assert_eq!(config.label(), "primary");
        assert!(config.run.force_run);
        assert!(config.log.debug);
    }
}
