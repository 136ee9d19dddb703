//! 日志解析模块
//!
//! 两种日志各有一个增量解析器，逐行输入，条目完整时输出一条 GELF 消息：
//!
//! - [`error_log::ErrorLogParser`]：错误日志，支持两种时间格式和多行续行
//! - [`slow_log::SlowLogParser`]：慢查询日志，HEADER / META / SQL 三状态机

pub mod error_log;
pub mod fingerprint;
pub mod slow_log;

pub use error_log::ErrorLogParser;
pub use fingerprint::{
    CommandFingerprinter, Fingerprint, FingerprintError, IdentityFingerprinter,
};
pub use slow_log::SlowLogParser;

use crate::gelf::{GelfError, GelfMessage};

/// 增量解析器
pub trait LogParser {
    /// 处理一行（不含行尾换行符），若因此结束了一个条目则返回对应的消息
    fn feed(&mut self, line: &str) -> Result<Option<GelfMessage>, GelfError>;

    /// 输入暂时或永久结束时取出仍未完成的条目
    ///
    /// `terminating` 为 true 表示之后不会再有输入。
    fn finish(
        &mut self,
        terminating: bool,
    ) -> Result<Option<GelfMessage>, GelfError>;
}

/// 取出下一个以空白分隔的单词，返回 (单词, 剩余部分)
pub fn next_word(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    Some((&s[..end], &s[end..]))
}

/// 首个单词首字母大写、其余字母小写，单词之后的内容保持不变
pub fn capitalize_first_word(s: &str) -> String {
    let start = s.len() - s.trim_start().len();
    let rest = &s[start..];
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let word = &rest[..end];

    let mut out = String::with_capacity(s.len());
    out.push_str(&s[..start]);
    let mut chars = word.chars();
    if let Some(first) = chars.next() {
        out.extend(first.to_uppercase());
        out.push_str(&chars.as_str().to_lowercase());
    }
    out.push_str(&rest[end..]);
    out
}
