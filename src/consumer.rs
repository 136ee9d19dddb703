//! 消费主循环
//!
//! 读一行、交给解析器，解析器每完成一个条目就依次执行：跳过计数、进入临界区、
//! 投递、写检查点、离开临界区、处理积压的信号请求、数量上限检查。
//!
//! 检查点偏移是条目边界：由下一条首行结束的条目记录该首行的起始偏移，
//! 在文件末尾冲刷出的条目记录当前读取位置。重启后会重新读取新条目的首行。

use crate::checkpoint::CheckpointStore;
use crate::config::{Config, LogType, StopPolicy};
use crate::delivery::DeliveryClient;
use crate::error::{ConsumerError, Result};
use crate::gelf::{Clock, GelfMessage, MessageBuilder, SystemClock, resolve_hostname};
use crate::instance_lock::InstanceLock;
use crate::parser::{ErrorLogParser, LogParser, SlowLogParser, fingerprint};
use crate::signals::{Action, SignalCoordinator};
use crate::tailer::{SourceTailer, TailEvent};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// 等待期间检查信号请求的间隔
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// 停止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 停止策略为 eof，读到了文件末尾
    EndOfFile,
    /// 处理的条目数达到上限
    LimitReached,
    /// 收到停止信号
    Requested,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EndOfFile => f.write_str("文件末尾"),
            StopReason::LimitReached => f.write_str("达到数量上限"),
            StopReason::Requested => f.write_str("收到停止请求"),
        }
    }
}

/// 一次运行的统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// 成功投递的条目数
    pub delivered: u64,
    /// 所有传输都失败（或没有配置传输）的条目数
    pub undelivered: u64,
    /// 被跳过的条目数
    pub skipped: u64,
    /// 读取的行数
    pub lines: u64,
    pub stop_reason: StopReason,
}

enum Flow {
    Continue,
    Stop(StopReason),
}

/// 消费者依赖的组件，测试时可以替换
pub struct Components {
    pub parser: Box<dyn LogParser>,
    pub client: DeliveryClient,
    pub checkpoint: CheckpointStore,
    pub signals: SignalCoordinator,
    pub lock: Option<InstanceLock>,
}

/// 根据日志类型创建解析器
pub fn build_parser(config: &Config, clock: Box<dyn Clock>) -> Box<dyn LogParser> {
    let builder = MessageBuilder::new(
        resolve_hostname(config.run.hostname.as_deref()),
        clock,
        config.gelf.short_message_len,
    );
    match config.source.log_type {
        LogType::Error => Box::new(ErrorLogParser::new(builder)),
        LogType::Slow => Box::new(SlowLogParser::new(
            builder,
            fingerprint::from_config(&config.fingerprint),
        )),
    }
}

pub struct Consumer {
    stop: StopPolicy,
    limit: Option<u64>,
    skip: u64,
    eof_wait: Duration,
    debug: bool,
    source_path: String,
    tailer: SourceTailer,
    parser: Box<dyn LogParser>,
    client: DeliveryClient,
    checkpoint: CheckpointStore,
    signals: SignalCoordinator,
    lock: Option<InstanceLock>,
    entries: u64,
    processed: u64,
    delivered: u64,
    undelivered: u64,
    skipped: u64,
    lines: u64,
}

impl Consumer {
    /// 按配置获取实例锁、打开检查点和源日志、建立传输
    pub fn start(config: &Config) -> Result<Self> {
        let lock = if config.run.force_run {
            tracing::warn!("已跳过单实例检查");
            None
        } else {
            Some(InstanceLock::acquire(&config.run.lock_dir, &config.label())?)
        };

        let checkpoint =
            CheckpointStore::open(config.checkpoint.truncate, &config.checkpoint.path)?;
        let client = DeliveryClient::from_config(&config.transports)?;
        let parser = build_parser(config, Box::new(SystemClock));

        Self::with_components(
            config,
            Components {
                parser,
                client,
                checkpoint,
                signals: SignalCoordinator::for_process(),
                lock,
            },
        )
    }

    /// 用给定的组件创建消费者，源日志从检查点恢复的偏移开始读取
    pub fn with_components(config: &Config, components: Components) -> Result<Self> {
        let stop = config.source.effective_stop();
        let source_path = config.source.path.to_string_lossy().into_owned();

        if let Some(record) = components.checkpoint.last_record() {
            if record.source_path != source_path {
                tracing::warn!(
                    "检查点记录的源日志 {} 与当前源日志 {} 不同，仍使用偏移 {}",
                    record.source_path,
                    source_path,
                    record.offset
                );
            }
        }

        let tailer = SourceTailer::open(
            &config.source.path,
            components.checkpoint.get_offset(),
            config.source.pacing(),
            stop.stops_at_eof(),
        )?;

        tracing::info!(
            "开始消费 {} 日志 {} (停止策略: {:?}, 上限: {:?}, 跳过: {})",
            config.source.log_type,
            source_path,
            stop,
            config.source.limit,
            config.source.skip
        );

        Ok(Self {
            stop,
            limit: config.source.limit,
            skip: config.source.skip,
            eof_wait: config.source.eof_wait(),
            debug: config.log.debug,
            source_path,
            tailer,
            parser: components.parser,
            client: components.client,
            checkpoint: components.checkpoint,
            signals: components.signals,
            lock: components.lock,
            entries: 0,
            processed: 0,
            delivered: 0,
            undelivered: 0,
            skipped: 0,
            lines: 0,
        })
    }

    /// 运行直到停止；无论如何退出都会关闭传输、检查点并释放实例锁
    pub fn run(mut self) -> Result<RunSummary> {
        let started = Instant::now();

        let result = if self.debug {
            self.consume()
        } else {
            match panic::catch_unwind(AssertUnwindSafe(|| self.consume())) {
                Ok(result) => result,
                Err(payload) => Err(ConsumerError::other(format!(
                    "消费过程中发生内部错误: {}",
                    panic_message(payload.as_ref())
                ))),
            }
        };

        let closed = self.shutdown();
        let summary = result?;
        closed?;

        tracing::info!(
            "消费结束（{}）：投递 {} 条，未送达 {} 条，跳过 {} 条，读取 {} 行，耗时 {:.2?}",
            summary.stop_reason,
            summary.delivered,
            summary.undelivered,
            summary.skipped,
            summary.lines,
            started.elapsed()
        );
        Ok(summary)
    }

    fn consume(&mut self) -> Result<RunSummary> {
        let stop_reason = loop {
            if let Flow::Stop(reason) = self.step()? {
                break reason;
            }
        };
        Ok(RunSummary {
            delivered: self.delivered,
            undelivered: self.undelivered,
            skipped: self.skipped,
            lines: self.lines,
            stop_reason,
        })
    }

    fn step(&mut self) -> Result<Flow> {
        if let Flow::Stop(reason) = self.service_requests()? {
            return Ok(Flow::Stop(reason));
        }

        if let Some(delay) = self.tailer.pacing_delay() {
            if let Flow::Stop(reason) = self.idle(delay)? {
                return Ok(Flow::Stop(reason));
            }
        }

        match self.tailer.read_line()? {
            TailEvent::Line(line) => {
                self.lines += 1;
                match self.parser.feed(&line.text) {
                    Ok(Some(message)) => self.handle_message(message, line.start),
                    Ok(None) => Ok(Flow::Continue),
                    Err(e) => {
                        tracing::warn!("偏移 {} 处的条目无法生成消息，已丢弃: {}", line.start, e);
                        Ok(Flow::Continue)
                    }
                }
            }
            TailEvent::Eof => self.at_eof(),
        }
    }

    fn at_eof(&mut self) -> Result<Flow> {
        let terminating = self.stop.stops_at_eof();
        let position = self.tailer.position();

        match self.parser.finish(terminating) {
            Ok(Some(message)) => {
                if let Flow::Stop(reason) = self.handle_message(message, position)? {
                    return Ok(Flow::Stop(reason));
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("文件末尾的条目无法生成消息，已丢弃: {}", e),
        }

        if terminating {
            self.tailer.terminate();
            return Ok(Flow::Stop(StopReason::EndOfFile));
        }

        tracing::trace!("已到文件末尾，等待 {:?}", self.eof_wait);
        self.idle(self.eof_wait)
    }

    /// 处理一个完整条目，`offset` 是写入检查点的条目边界
    fn handle_message(&mut self, message: GelfMessage, offset: u64) -> Result<Flow> {
        self.entries += 1;
        if self.entries <= self.skip {
            self.skipped += 1;
            tracing::debug!("跳过第 {} 个条目", self.entries);
            return Ok(Flow::Continue);
        }

        self.signals.enter_critical();
        let outcome = self.client.deliver(&message);
        let appended = self.checkpoint.append(offset, &self.source_path);
        self.signals.leave_critical();
        appended?;

        if outcome.is_delivered() {
            self.delivered += 1;
        } else {
            self.undelivered += 1;
        }
        self.processed += 1;

        if let Flow::Stop(reason) = self.service_requests()? {
            return Ok(Flow::Stop(reason));
        }

        if self.limit.is_some_and(|limit| self.processed >= limit) {
            tracing::info!("已处理 {} 个条目，达到上限", self.processed);
            return Ok(Flow::Stop(StopReason::LimitReached));
        }
        Ok(Flow::Continue)
    }

    /// 执行积压的信号请求
    fn service_requests(&mut self) -> Result<Flow> {
        match self.signals.take_pending() {
            Some(Action::Stop) => {
                tracing::info!("收到停止请求，准备退出");
                Ok(Flow::Stop(StopReason::Requested))
            }
            Some(Action::Rotate) => {
                self.checkpoint.rotate()?;
                Ok(Flow::Continue)
            }
            None => Ok(Flow::Continue),
        }
    }

    /// 分片等待，每片之间检查信号请求
    fn idle(&mut self, duration: Duration) -> Result<Flow> {
        let deadline = Instant::now() + duration;
        loop {
            if let Flow::Stop(reason) = self.service_requests()? {
                return Ok(Flow::Stop(reason));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Flow::Continue);
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        self.client.close();
        let closed = self.checkpoint.close();
        let released = match self.lock.as_mut() {
            Some(lock) => lock.release(),
            None => Ok(()),
        };
        closed?;
        released
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知错误".to_string()
    }
}
