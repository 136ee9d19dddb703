//! 源日志跟踪读取
//!
//! 顺序读取源日志，每一行都带上起止字节偏移，方便调用方把条目边界写入检查点。
//! 到达文件末尾时报告 [`TailEvent::Eof`]，是否等待由调用方的停止策略决定。

use crate::error::{ConsumerError, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 跟踪状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailerState {
    /// 有行可读
    Reading,
    /// 已到文件末尾，等待新内容
    Waiting,
    /// 已结束
    Terminated,
}

/// 源日志中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// 去掉行尾换行符后的内容
    pub text: String,
    /// 行首偏移
    pub start: u64,
    /// 下一行的偏移
    pub end: u64,
}

/// 一次读取的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    Line(SourceLine),
    Eof,
}

/// 源日志读取器
#[derive(Debug)]
pub struct SourceTailer {
    path: PathBuf,
    reader: BufReader<File>,
    position: u64,
    pacing: Duration,
    reads: u64,
    accept_partial: bool,
    state: TailerState,
}

impl SourceTailer {
    /// 打开源日志；`resume` 为恢复的偏移量
    ///
    /// `accept_partial` 为 true 时，文件末尾没有换行符的半行也会被当作完整的一行返回，
    /// 适用于读到末尾即停止的场景。
    pub fn open<P: AsRef<Path>>(
        path: P,
        resume: Option<u64>,
        pacing: Duration,
        accept_partial: bool,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            ConsumerError::os(format!("无法打开源日志 {}", path.display()), e)
        })?;
        let mut reader = BufReader::new(file);

        let position = match resume {
            Some(offset) => {
                reader.seek(SeekFrom::Start(offset)).map_err(|e| {
                    ConsumerError::os(
                        format!("无法定位源日志 {} 到 {offset}", path.display()),
                        e,
                    )
                })?;
                tracing::info!("从偏移 {} 继续读取 {}", offset, path.display());
                offset
            }
            None => 0,
        };

        Ok(Self {
            path,
            reader,
            position,
            pacing,
            reads: 0,
            accept_partial,
            state: TailerState::Reading,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 下一次读取的起始偏移
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn state(&self) -> TailerState {
        self.state
    }

    /// 本次读取前需要等待的时间；第一次读取之前从不等待
    pub fn pacing_delay(&self) -> Option<Duration> {
        (self.reads > 0 && !self.pacing.is_zero()).then_some(self.pacing)
    }

    pub fn terminate(&mut self) {
        self.state = TailerState::Terminated;
    }

    /// 读取下一行
    pub fn read_line(&mut self) -> Result<TailEvent> {
        if self.state == TailerState::Terminated {
            return Ok(TailEvent::Eof);
        }
        self.reads += 1;

        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf)?;

        if n == 0 {
            self.check_rotation()?;
            self.state = TailerState::Waiting;
            return Ok(TailEvent::Eof);
        }

        if buf.last() != Some(&b'\n') && !self.accept_partial {
            // 写入方还没写完这一行，回到行首等下一轮
            self.reader.seek(SeekFrom::Start(self.position))?;
            self.state = TailerState::Waiting;
            return Ok(TailEvent::Eof);
        }

        let start = self.position;
        self.position += n as u64;
        self.state = TailerState::Reading;

        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        let text = match String::from_utf8(buf) {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!("第 {} 字节处的行不是合法 UTF-8", start);
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };

        Ok(TailEvent::Line(SourceLine { text, start, end: self.position }))
    }

    /// 文件被截断或被替换（logrotate）时从头开始读取
    fn check_rotation(&mut self) -> io::Result<()> {
        let current = self.reader.get_ref().metadata()?;

        if current.len() < self.position {
            tracing::warn!(
                "源日志 {} 被截断（{} < {}），从头开始读取",
                self.path.display(),
                current.len(),
                self.position
            );
            self.reader.seek(SeekFrom::Start(0))?;
            self.position = 0;
            return Ok(());
        }

        match std::fs::metadata(&self.path) {
            Ok(on_disk)
                if on_disk.ino() != current.ino()
                    || on_disk.dev() != current.dev() =>
            {
                let file = File::open(&self.path)?;
                tracing::warn!(
                    "源日志 {} 已被替换，重新打开并从头读取",
                    self.path.display()
                );
                self.reader = BufReader::new(file);
                self.position = 0;
            }
            Ok(_) => {}
            // 旧文件已被移走、新文件还没创建，继续等待
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use tempfile::TempDir;

    fn line(event: TailEvent) -> SourceLine {
        match event {
            TailEvent::Line(line) => line,
            TailEvent::Eof => panic!("expected a line"),
        }
    }

    #[test]
    fn test_read_lines_with_offsets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("error.log");
        fs::write(&path, "first\r\nsecond\n").unwrap();

        let mut tailer =
            SourceTailer::open(&path, None, Duration::ZERO, false).unwrap();
        let first = line(tailer.read_line().unwrap());
        assert_eq!(first, SourceLine { text: "first".into(), start: 0, end: 7 });
        let second = line(tailer.read_line().unwrap());
        assert_eq!(second.start, 7);
        assert_eq!(second.end, 14);
        assert_eq!(tailer.read_line().unwrap(), TailEvent::Eof);
        assert_eq!(tailer.state(), TailerState::Waiting);
    }

    #[test]
    fn test_resume_from_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("error.log");
        fs::write(&path, "first\nsecond\n").unwrap();

        let mut tailer =
            SourceTailer::open(&path, Some(6), Duration::ZERO, false).unwrap();
        assert_eq!(line(tailer.read_line().unwrap()).text, "second");
    }

    #[test]
    fn test_partial_line_waits_for_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("slow.log");
        fs::write(&path, "complete\nhalf").unwrap();

        let mut tailer =
            SourceTailer::open(&path, None, Duration::ZERO, false).unwrap();
        line(tailer.read_line().unwrap());
        assert_eq!(tailer.read_line().unwrap(), TailEvent::Eof);
        assert_eq!(tailer.position(), 9);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b" done\n").unwrap();
        let rest = line(tailer.read_line().unwrap());
        assert_eq!(rest.text, "half done");
        assert_eq!(rest.start, 9);
    }

    #[test]
    fn test_partial_line_accepted_when_terminating() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("slow.log");
        fs::write(&path, "no newline").unwrap();

        let mut tailer =
            SourceTailer::open(&path, None, Duration::ZERO, true).unwrap();
        assert_eq!(line(tailer.read_line().unwrap()).text, "no newline");
    }

    #[test]
    fn test_truncation_restarts_from_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("error.log");
        fs::write(&path, "aaaa\nbbbb\n").unwrap();

        let mut tailer =
            SourceTailer::open(&path, Some(10), Duration::ZERO, false).unwrap();
        fs::write(&path, "cc\n").unwrap();
        assert_eq!(tailer.read_line().unwrap(), TailEvent::Eof);
        assert_eq!(tailer.position(), 0);
        assert_eq!(line(tailer.read_line().unwrap()).text, "cc");
    }

    #[test]
    fn test_pacing_never_before_first_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("error.log");
        fs::write(&path, "a\nb\n").unwrap();

        let pacing = Duration::from_millis(5);
        let mut tailer = SourceTailer::open(&path, None, pacing, false).unwrap();
        assert_eq!(tailer.pacing_delay(), None);
        tailer.read_line().unwrap();
        assert_eq!(tailer.pacing_delay(), Some(pacing));
    }

    #[test]
    fn test_missing_source_is_os_error() {
        let dir = TempDir::new().unwrap();
        let err = SourceTailer::open(
            dir.path().join("missing.log"),
            None,
            Duration::ZERO,
            false,
        )
        .unwrap_err();
        assert!(err.is_os_error());
    }
}
