//! 检查点（事件日志）
//!
//! 检查点文件只追加写入，每行一条记录：
//!
//! ```text
//! <offset>:<source_path>
//! ```
//!
//! 启动时读取最后一条记录恢复源日志的读取位置。最后一行无法解析时直接报错，
//! 绝不退回到偏移量 0。

use crate::error::{ConsumerError, Result};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// 同一行中字段之间的分隔符
pub const FIELD_SEPARATOR: char = ':';
/// 轮转时临时文件的后缀
pub const ROTATION_SUFFIX: &str = "tmp";

/// 一条检查点记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub offset: u64,
    pub source_path: String,
}

impl CheckpointRecord {
    /// 解析一行记录。只要求开头的整数合法，路径中允许出现分隔符。
    pub fn parse(line: &str) -> Option<Self> {
        let (offset, source_path) = line.split_once(FIELD_SEPARATOR)?;
        let offset = offset.trim().parse::<u64>().ok()?;
        Some(Self { offset, source_path: source_path.to_string() })
    }
}

impl fmt::Display for CheckpointRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.offset, FIELD_SEPARATOR, self.source_path)
    }
}

/// 轮转过程中最后完成的步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStep {
    /// 一步都没有完成
    Nothing,
    /// 只关闭了句柄
    Closed,
    /// 已改名为临时文件，原路径下没有文件
    Renamed,
    /// 已重新打开原路径，但临时文件仍然存在
    Reopened,
}

impl fmt::Display for RotationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RotationStep::Nothing => "nothing",
            RotationStep::Closed => "closed-only",
            RotationStep::Renamed => "renamed-only",
            RotationStep::Reopened => "reopened-only",
        };
        f.write_str(s)
    }
}

/// 检查点存储
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    handle: Option<File>,
    recovered: Option<u64>,
    last: Option<CheckpointRecord>,
}

impl CheckpointStore {
    /// 打开检查点文件
    ///
    /// `truncate` 为 true 时清空文件；否则读取最后一条记录作为恢复的偏移量。
    pub fn open<P: AsRef<Path>>(truncate: bool, path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) =
            path.parent().filter(|p| !p.as_os_str().is_empty())
        {
            fs::create_dir_all(parent).map_err(|e| {
                ConsumerError::os(
                    format!("无法创建检查点目录 {}", parent.display()),
                    e,
                )
            })?;
        }

        let last = if truncate {
            File::create(&path).map_err(|e| {
                ConsumerError::os(
                    format!("无法清空检查点 {}", path.display()),
                    e,
                )
            })?;
            tracing::info!("检查点已清空: {}", path.display());
            None
        } else {
            Self::recover(&path)?
        };

        let handle = Self::open_append(&path).map_err(|e| {
            ConsumerError::os(format!("无法打开检查点 {}", path.display()), e)
        })?;

        if let Some(record) = &last {
            tracing::info!(
                "从检查点恢复读取位置: {} ({})",
                record.offset,
                record.source_path
            );
        }

        Ok(Self {
            path,
            handle: Some(handle),
            recovered: last.as_ref().map(|r| r.offset),
            last,
        })
    }

    fn open_append(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    /// 读取文件中最后一个非空行并解析
    fn recover(path: &Path) -> Result<Option<CheckpointRecord>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConsumerError::os(
                    format!("无法读取检查点 {}", path.display()),
                    e,
                ));
            }
        };

        let mut last_line: Option<String> = None;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| {
                ConsumerError::os(
                    format!("无法读取检查点 {}", path.display()),
                    e,
                )
            })?;
            if !line.trim().is_empty() {
                last_line = Some(line);
            }
        }

        match last_line {
            None => Ok(None),
            Some(line) => CheckpointRecord::parse(&line)
                .map(Some)
                .ok_or_else(|| ConsumerError::malformed_checkpoint(path, line)),
        }
    }

    /// 恢复的偏移量；全新的检查点返回 `None`
    pub fn get_offset(&self) -> Option<u64> {
        self.recovered
    }

    /// 最近一次写入（或恢复）的记录
    pub fn last_record(&self) -> Option<&CheckpointRecord> {
        self.last.as_ref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一条记录，写入后立即刷新
    pub fn append(&mut self, offset: u64, source_path: &str) -> Result<()> {
        let record =
            CheckpointRecord { offset, source_path: source_path.to_string() };
        let handle = self.handle.as_mut().ok_or_else(|| {
            ConsumerError::other("检查点已关闭，无法写入")
        })?;
        write_record(handle, &record)?;
        tracing::trace!("检查点写入: {}", record);
        self.last = Some(record);
        Ok(())
    }

    /// 临时文件路径：`<path>.tmp`
    pub fn rotation_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".");
        name.push(ROTATION_SUFFIX);
        PathBuf::from(name)
    }

    /// 轮转检查点文件
    ///
    /// 依次执行：关闭句柄 → 改名为临时文件 → 在原路径打开新文件 → 删除临时文件。
    /// 新文件中会立即写入最后一条记录，保证轮转后重启仍能恢复读取位置。
    /// 任何一步失败都返回 [`ConsumerError::Rotation`]，并带上最后完成的步骤。
    pub fn rotate(&mut self) -> Result<()> {
        let tmp = self.rotation_path();
        let mut step = RotationStep::Nothing;

        let fail = |step: RotationStep, source: io::Error| {
            tracing::error!(
                "检查点轮转失败，已完成步骤: {}，错误: {}",
                step,
                source
            );
            ConsumerError::Rotation { step, source }
        };

        if let Some(mut handle) = self.handle.take() {
            handle.flush().map_err(|e| fail(step, e))?;
        }
        step = RotationStep::Closed;

        // 上次轮转残留的临时文件
        match fs::remove_file(&tmp) {
            Ok(()) => tracing::warn!("删除残留的临时检查点: {}", tmp.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(fail(step, e)),
        }

        fs::rename(&self.path, &tmp).map_err(|e| fail(step, e))?;
        step = RotationStep::Renamed;

        let mut handle =
            Self::open_append(&self.path).map_err(|e| fail(step, e))?;
        if let Some(record) = &self.last {
            write_record(&mut handle, record).map_err(|e| fail(step, e))?;
        }
        self.handle = Some(handle);
        step = RotationStep::Reopened;

        fs::remove_file(&tmp).map_err(|e| fail(step, e))?;

        tracing::info!("检查点已轮转: {}", self.path.display());
        Ok(())
    }

    /// 刷新并释放文件句柄
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut handle) = self.handle.take() {
            handle.flush()?;
            handle.sync_all()?;
            tracing::debug!("检查点已关闭: {}", self.path.display());
        }
        Ok(())
    }
}

fn write_record(handle: &mut File, record: &CheckpointRecord) -> io::Result<()> {
    // 整行一次写出，避免读者看到半行
    let line = format!("{record}\n");
    handle.write_all(line.as_bytes())?;
    handle.flush()
}
