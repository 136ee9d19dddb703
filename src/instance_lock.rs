//! 单实例保护
//!
//! 以实例标签为名在锁目录下独占创建 `<label>.lock`，文件已存在时立即失败。
//! 正常退出时删除；进程崩溃留下的锁文件需要人工清理，这里不做过期检测。

use crate::error::{ConsumerError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// 已持有的实例锁，drop 时释放
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    released: bool,
}

impl InstanceLock {
    /// 锁文件路径
    pub fn lock_path<P: AsRef<Path>>(dir: P, label: &str) -> PathBuf {
        dir.as_ref().join(format!("{label}.lock"))
    }

    /// 独占创建锁文件，并写入当前进程号
    pub fn acquire<P: AsRef<Path>>(dir: P, label: &str) -> Result<Self> {
        Self::acquire_with(dir.as_ref(), label, |file| {
            writeln!(file, "{}", std::process::id())
        })
    }

    /// 创建锁文件后由 `mark` 写入内容；写入失败时删除已创建的锁文件
    fn acquire_with<F>(dir: &Path, label: &str, mark: F) -> Result<Self>
    where
        F: FnOnce(&mut File) -> io::Result<()>,
    {
        fs::create_dir_all(dir).map_err(|e| {
            ConsumerError::os(format!("无法创建锁目录 {}", dir.display()), e)
        })?;

        let path = Self::lock_path(dir, label);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                let context = if e.kind() == io::ErrorKind::AlreadyExists {
                    format!(
                        "实例 '{label}' 已在运行（锁文件 {} 已存在，若上次异常退出请手动删除）",
                        path.display()
                    )
                } else {
                    format!("无法创建锁文件 {}", path.display())
                };
                ConsumerError::os(context, e)
            })?;
        let lock = Self { path, released: false };
        if let Err(e) = mark(&mut file) {
            let context = format!("无法写入锁文件 {}", lock.path.display());
            // lock 在这里 drop，锁文件随之删除
            return Err(ConsumerError::os(context, e));
        }

        tracing::debug!("获得实例锁: {}", lock.path.display());
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 删除锁文件
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!("释放实例锁: {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("释放实例锁失败 {}: {}", self.path.display(), e);
        }
    }
}
