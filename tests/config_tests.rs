//! 配置文件与命令行的集成测试

mod common;

use clap::Parser;
use mariadb_log_consumer::cli::Cli;
use mariadb_log_consumer::config::{Config, LogType, StopPolicy};
use tempfile::TempDir;

const CONFIG_TOML: &str = r#"
[source]
log_type = "slow"
path = "/var/log/mysql/slow.log"
limit = 100
eof_wait_ms = 500

[run]
label = "replica-slow"
hostname = "db-replica-1"

[checkpoint]
path = "/tmp/consumer/events.log"

[gelf]
short_message_len = 40

[fingerprint]
command = "pt-fingerprint"

[log]
level = "debug"

[transports.udp]
host = "graylog.local"

[transports.http]
url = "https://graylog.local:12201"
max_retries = 5
"#;

#[test]
fn test_load_from_toml() {
    let config = Config::from_toml(CONFIG_TOML).unwrap();
    config.validate().unwrap();

    assert_eq!(config.source.log_type, LogType::Slow);
    assert_eq!(config.source.effective_stop(), StopPolicy::Limit);
    assert_eq!(config.label(), "replica-slow");
    assert_eq!(config.gelf.short_message_len, 40);
    assert_eq!(config.fingerprint.command.as_deref(), Some("pt-fingerprint"));

    let udp = config.transports.udp.as_ref().unwrap();
    assert_eq!(udp.port, 12201);
    let http = config.transports.http.as_ref().unwrap();
    assert_eq!(http.max_retries, 5);
    assert_eq!(http.idle_timeout_ms, 30_000);
    assert!(config.transports.tcp.is_none());
}

#[test]
fn test_defaults() {
    let config = Config::new(LogType::Error, "/var/log/mysql/error.log");
    assert_eq!(config.source.stop, StopPolicy::Never);
    assert_eq!(config.source.eof_wait_ms, 1000);
    assert_eq!(config.gelf.short_message_len, 20);
    assert_eq!(
        config.checkpoint.path.to_str(),
        Some("/var/mariadb-to-graylog/logs/events.log")
    );
    assert_eq!(config.run.lock_dir.to_str(), Some("/var/run/mariadb-to-graylog"));
    config.validate().unwrap();
}

#[test]
fn test_invalid_configs() {
    let mut config = Config::new(LogType::Error, "error.log");
    config.source.stop = StopPolicy::Limit;
    assert!(config.validate().unwrap_err().is_config_error());

    let mut config = Config::new(LogType::Error, "error.log");
    config.gelf.short_message_len = 0;
    assert_eq!(config.validate().unwrap_err().exit_code(), 2);

    let bad = CONFIG_TOML.replace("https://graylog.local:12201", "ftp://graylog.local");
    let config = Config::from_toml(&bad).unwrap();
    assert!(config.validate().is_err());

    assert!(Config::from_toml("[source]\nlog_type = \"general\"\n").is_err());
}

#[test]
fn test_cli_overrides_file() {
    let dir = TempDir::new().unwrap();
    let path = common::create_log_file(&dir, "consumer.toml", CONFIG_TOML);

    let cli = Cli::try_parse_from([
        "mariadb-log-consumer",
        "--config",
        path.to_str().unwrap(),
        "--log",
        "/data/slow.log",
        "--limit",
        "5",
        "--http-retries",
        "1",
        "--http-url",
        "https://graylog2.local:12201",
        "-P",
        "12299",
        "-H",
        "graylog2.local",
    ])
    .unwrap();
    let config = cli.into_config().unwrap();

    assert_eq!(config.source.log_type, LogType::Slow);
    assert_eq!(config.source.path.to_str(), Some("/data/slow.log"));
    assert_eq!(config.source.limit, Some(5));
    assert_eq!(config.source.eof_wait_ms, 500);
    let http = config.transports.http.as_ref().unwrap();
    assert_eq!(http.url, "https://graylog2.local:12201");
    assert_eq!(http.max_retries, 1);
    assert_eq!(http.idle_timeout_ms, 30_000);
    let udp = config.transports.udp.as_ref().unwrap();
    assert_eq!(udp.host, "graylog2.local");
    assert_eq!(udp.port, 12299);
}

#[test]
fn test_missing_config_file() {
    let cli = Cli::try_parse_from([
        "mariadb-log-consumer",
        "--config",
        "/nonexistent/consumer.toml",
    ])
    .unwrap();
    assert!(cli.into_config().unwrap_err().is_config_error());
}
