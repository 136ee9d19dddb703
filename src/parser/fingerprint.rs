//! 查询指纹化
//!
//! 把 SQL 中的字面量归一化成占位符，得到可比较的查询形态。实际工作交给外部程序
//! （例如 `pt-fingerprint`），这里只定义接口：输入原始查询文本，输出归一化文本。

use crate::config::FingerprintConfig;
use std::io::Write;
use std::process::{Command, Stdio};

/// 指纹化失败
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("无法启动指纹化程序 {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("指纹化程序 {program} 退出码 {status}: {stderr}")]
    Failed { program: String, status: String, stderr: String },

    #[error("指纹化程序 {0} 没有输出")]
    EmptyOutput(String),
}

/// 指纹化能力
pub trait Fingerprint: Send {
    fn fingerprint(&self, query: &str) -> Result<String, FingerprintError>;
}

/// 原样返回查询文本
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityFingerprinter;

impl Fingerprint for IdentityFingerprinter {
    fn fingerprint(&self, query: &str) -> Result<String, FingerprintError> {
        Ok(query.to_string())
    }
}

/// 调用外部程序：查询文本写入标准输入，从标准输出读取结果
#[derive(Debug, Clone)]
pub struct CommandFingerprinter {
    program: String,
    args: Vec<String>,
}

impl CommandFingerprinter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

impl Fingerprint for CommandFingerprinter {
    fn fingerprint(&self, query: &str) -> Result<String, FingerprintError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| FingerprintError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // 大查询可能写满管道，输入放到单独的线程里写
        let stdin = child.stdin.take();
        let output = std::thread::scope(|scope| {
            if let Some(mut stdin) = stdin {
                scope.spawn(move || {
                    if let Err(e) = stdin.write_all(query.as_bytes()) {
                        tracing::debug!("写入指纹化程序标准输入失败: {}", e);
                    }
                });
            }
            child.wait_with_output()
        })
        .map_err(|source| FingerprintError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(FingerprintError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr)
                    .trim()
                    .to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(FingerprintError::EmptyOutput(self.program.clone()));
        }
        Ok(text)
    }
}

/// 根据配置选择实现
pub fn from_config(config: &FingerprintConfig) -> Box<dyn Fingerprint> {
    match config.command.as_deref().filter(|c| !c.trim().is_empty()) {
        Some(program) => {
            tracing::debug!("使用外部指纹化程序: {}", program);
            Box::new(CommandFingerprinter::new(program, config.args.clone()))
        }
        None => Box::new(IdentityFingerprinter),
    }
}
