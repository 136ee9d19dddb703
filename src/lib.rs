//! MariaDB 日志消费者
//!
//! 持续读取 MariaDB 的错误日志或慢查询日志，把每个条目转换为 GELF 消息，
//! 依次尝试 UDP、TCP、HTTP 发送到 Graylog，并把已处理的位置写入检查点，
//! 重启后从上次的位置继续。

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod delivery;
pub mod error;
pub mod gelf;
pub mod instance_lock;
pub mod parser;
pub mod signals;
pub mod tailer;

// 日志初始化 - 需要 logging 功能
#[cfg(feature = "logging")]
pub mod logging;

pub use config::Config;
pub use consumer::{Consumer, RunSummary, StopReason};
pub use error::{ConsumerError, Result};
