//! 错误日志解析器
//!
//! 每一行依次尝试两种首行格式：
//!
//! ```text
//! 格式 A: 2019-11-01 16:10:48 0 [Note] WSREP: hello        (日期 时间 线程 [级别] 正文)
//! 格式 B: 201030 12:40:21 [ERROR] mysqld got signal 6 ;     (日期 时间 [级别] 正文)
//! ```
//!
//! 时间的时、分、秒先补零再解析（旧版本会写成 ` 9:05:03`）。两种格式都不匹配的行
//! 是当前消息的续行，追加到 `_text` 字段；还没有打开的消息时直接丢弃。

use crate::gelf::{GelfError, GelfMessage, MessageBuilder, normalize_level};
use crate::parser::{LogParser, next_word};
use chrono::NaiveDateTime;

/// 续行追加到的自定义字段
pub const TEXT_FIELD: &str = "text";

/// 解析出的首行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorHeader<'a> {
    pub date: &'a str,
    /// 补零后的时间
    pub time: String,
    /// 格式 B 没有线程字段
    pub thread: Option<&'a str>,
    pub level: &'a str,
    pub body: &'a str,
}

/// 把 `H:M:S` 的每一段补齐到两位
fn pad_time(time: &str) -> Option<String> {
    let parts: Vec<&str> = time.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let mut padded = Vec::with_capacity(3);
    for part in parts {
        if part.is_empty()
            || part.len() > 2
            || !part.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        padded.push(format!("{part:0>2}"));
    }
    Some(padded.join(":"))
}

fn is_bracketed(word: &str) -> bool {
    word.len() >= 2 && word.starts_with('[') && word.ends_with(']')
}

/// 格式 A：`YYYY-MM-DD HH:MM:SS <thread> [Level] text`
fn parse_format_a(line: &str) -> Option<ErrorHeader<'_>> {
    let (date, rest) = next_word(line)?;
    let (time, rest) = next_word(rest)?;
    let (thread, rest) = next_word(rest)?;
    let (level, rest) = next_word(rest)?;
    if !is_bracketed(level) {
        return None;
    }
    let time = pad_time(time)?;
    NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S")
        .ok()?;
    Some(ErrorHeader { date, time, thread: Some(thread), level, body: rest.trim() })
}

/// 格式 B：`YYMMDD HH:MM:SS [Level] text`
fn parse_format_b(line: &str) -> Option<ErrorHeader<'_>> {
    let (date, rest) = next_word(line)?;
    let (time, rest) = next_word(rest)?;
    let (level, rest) = next_word(rest)?;
    if !is_bracketed(level) {
        return None;
    }
    let time = pad_time(time)?;
    NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%y%m%d %H:%M:%S")
        .ok()?;
    Some(ErrorHeader { date, time, thread: None, level, body: rest.trim() })
}

/// 尝试把一行解析为首行
pub fn parse_header(line: &str) -> Option<ErrorHeader<'_>> {
    parse_format_a(line).or_else(|| parse_format_b(line))
}

/// 错误日志解析器
#[derive(Debug)]
pub struct ErrorLogParser {
    builder: MessageBuilder,
    open: Option<GelfMessage>,
}

impl ErrorLogParser {
    pub fn new(builder: MessageBuilder) -> Self {
        Self { builder, open: None }
    }

    /// 是否有尚未发送的消息
    pub fn has_open_message(&self) -> bool {
        self.open.is_some()
    }

    fn build(&self, header: &ErrorHeader<'_>) -> Result<GelfMessage, GelfError> {
        let (token, level) = normalize_level(header.level);
        let slice = self.builder.leading_slice(header.body);
        let short_message = if slice.is_empty() {
            token.clone()
        } else {
            format!("{token} {slice}")
        };

        let mut custom: Vec<(&str, String)> = vec![
            ("log_type", "error".to_string()),
            ("log_date", header.date.to_string()),
            ("log_time", header.time.clone()),
        ];
        if let Some(thread) = header.thread {
            custom.push(("thread", thread.to_string()));
        }
        custom.push(("message", header.body.to_string()));
        custom.push((TEXT_FIELD, String::new()));

        self.builder.build(short_message, level, None, custom)
    }
}

impl LogParser for ErrorLogParser {
    fn feed(&mut self, line: &str) -> Result<Option<GelfMessage>, GelfError> {
        match parse_header(line) {
            Some(header) => {
                let message = self.build(&header)?;
                tracing::trace!("错误日志首行: {:?}", header);
                Ok(self.open.replace(message))
            }
            None => {
                match self.open.as_mut() {
                    Some(message) => message.append(TEXT_FIELD, line)?,
                    None => tracing::trace!("丢弃首条消息之前的行: {}", line),
                }
                Ok(None)
            }
        }
    }

    fn finish(
        &mut self,
        _terminating: bool,
    ) -> Result<Option<GelfMessage>, GelfError> {
        Ok(self.open.take())
    }
}
