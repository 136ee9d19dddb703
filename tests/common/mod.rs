//! 集成测试公共模块

use mariadb_log_consumer::checkpoint::CheckpointStore;
use mariadb_log_consumer::config::{Config, LogType, StopPolicy, UdpConfig};
use mariadb_log_consumer::consumer::{Components, build_parser};
use mariadb_log_consumer::delivery::DeliveryClient;
use mariadb_log_consumer::gelf::FixedClock;
use mariadb_log_consumer::signals::{RequestCounters, SignalCoordinator};
use std::fs;
use std::net::UdpSocket;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// 测试时钟的时间戳
#[allow(dead_code)]
pub const FIXED_NOW: i64 = 1_700_000_000;

/// 五个条目的错误日志，其中第二个条目带两行续行，第四个条目是旧版时间格式
#[allow(dead_code)]
pub const ERROR_LOG_SAMPLE: &str = "\
2019-11-01 16:10:48 0 [Note] InnoDB: Starting crash recovery from checkpoint LSN=1234
2019-11-01 16:10:49 0 [ERROR] mysqld got signal 11 ;
This could be because you hit a bug.
Attempting backtrace.
2019-11-01 16:10:50 3 [Warning] Aborted connection 3 to db: 'test' user: 'app'
201030 12:40:21 [ERROR] Plugin 'InnoDB' init function returned error.
2019-11-01 16:10:52 0 [Note] Server socket created on IP: '::'.
";

/// 两个条目的慢查询日志，带文件头
#[allow(dead_code)]
pub const SLOW_LOG_SAMPLE: &str = "\
/usr/sbin/mariadbd, Version: 10.6.12-MariaDB-log (MariaDB Server). started with:
Tcp port: 3306  Unix socket: /run/mysqld/mysqld.sock
Time\t\t    Id Command\tArgument
# Time: 230722 10:00:00
# User@Host: app[app] @ localhost []
# Thread_id: 8  Schema: shop  QC_hit: No
# Query_time: 2.500134  Lock_time: 0.000021  Rows_sent: 1  Rows_examined: 100000
use shop;
SET timestamp=1690020000;
SELECT count(*)
FROM orders
WHERE status = 'open';
# Time: 230722 10:00:05
# User@Host: app[app] @ localhost []
# Query_time: 1.200000  Lock_time: 0.000010  Rows_sent: 0  Rows_examined: 5000
SET timestamp=1690020005;
update orders set status = 'closed' where id = 42;
";

/// 创建测试用的源日志文件
#[allow(dead_code)]
pub fn create_log_file(dir: &TempDir, filename: &str, content: &str) -> PathBuf {
    let file_path = dir.path().join(filename);
    fs::write(&file_path, content).expect("Failed to write test file");
    file_path
}

/// 读到文件末尾即停止的配置，检查点和锁目录都在临时目录里
#[allow(dead_code)]
pub fn test_config(dir: &TempDir, log_type: LogType, source: PathBuf) -> Config {
    let mut config = Config::new(log_type, source);
    config.source.stop = StopPolicy::Eof;
    config.source.eof_wait_ms = 10;
    config.run.hostname = Some("db1".to_string());
    config.run.lock_dir = dir.path().join("run");
    config.checkpoint.path = dir.path().join("checkpoint").join("events.log");
    config
}

/// 用固定时钟组装消费者组件
#[allow(dead_code)]
pub fn components(
    config: &Config,
    client: DeliveryClient,
    counters: &'static RequestCounters,
) -> Components {
    Components {
        parser: build_parser(config, Box::new(FixedClock(FIXED_NOW))),
        client,
        checkpoint: CheckpointStore::open(
            config.checkpoint.truncate,
            &config.checkpoint.path,
        )
        .expect("Failed to open checkpoint"),
        signals: SignalCoordinator::new(counters),
        lock: None,
    }
}

/// 本地 UDP 收集器
#[allow(dead_code)]
pub struct UdpCollector {
    socket: UdpSocket,
}

#[allow(dead_code)]
impl UdpCollector {
    pub fn bind() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind collector");
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .expect("Failed to set read timeout");
        Self { socket }
    }

    pub fn config(&self) -> UdpConfig {
        UdpConfig {
            host: "127.0.0.1".to_string(),
            port: self.socket.local_addr().expect("no local addr").port(),
        }
    }

    /// 收取所有已到达的消息，直到一段时间内没有新消息
    pub fn drain(&self) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();
        let mut buf = vec![0u8; 65536];
        while let Ok((n, _)) = self.socket.recv_from(&mut buf) {
            messages.push(
                serde_json::from_slice(&buf[..n]).expect("collector received invalid JSON"),
            );
        }
        messages
    }
}

/// 读取检查点文件中的非空行
#[allow(dead_code)]
pub fn checkpoint_lines(config: &Config) -> Vec<String> {
    fs::read_to_string(&config.checkpoint.path)
        .unwrap_or_default()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}
