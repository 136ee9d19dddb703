//! 慢查询日志解析器
//!
//! 慢查询日志的行本身并不能说明自己的含义，同样以 `#` 开头的行在不同状态下意义不同，
//! 所以这里用一个不向前看的三状态机逐行分类：
//!
//! ```text
//!            "# Time:"                  非 "# " 行
//! HEADER ─────────────▶ META ───────────────────────▶ SQL
//!                        ▲  ╰─ "# " 行：元数据          │ "# " 行：SQL 注释
//!                        ╰──────── "# Time:" ──────────╯ 其他行：查询文本
//! ```
//!
//! 新条目的标记只有 `# Time:` 一种。遇到标记时，如果上一个条目已经积累了查询文本，
//! 先把它结束（指纹化、首词大写、生成消息），再为新条目清空累加器。
//!
//! SQL 段的第一行若是 `use <schema>;`，或者第一行（或紧跟在被跳过的 `use` 之后）是
//! `SET timestamp=<整数>;`，都属于结构行，不进入查询文本。

use crate::gelf::{GelfError, GelfMessage, MessageBuilder};
use crate::parser::fingerprint::Fingerprint;
use crate::parser::{LogParser, capitalize_first_word};
use lazy_static::lazy_static;
use regex::Regex;

/// 标记新条目的元数据行
pub const ENTRY_MARKER: &str = "# Time:";

/// 慢查询日志 GELF 级别（Informational）
pub const SLOW_LOG_LEVEL: &str = "6";

lazy_static! {
    static ref USE_RE: Regex = Regex::new(r"^use\s+(.+);$").unwrap();
    static ref SET_TIMESTAMP_RE: Regex =
        Regex::new(r"^SET timestamp=(\d+);$").unwrap();
    static ref META_KEY_RE: Regex =
        Regex::new(r"(?:^|\s)([A-Za-z][A-Za-z0-9_@.\-]*):(?:\s|$)").unwrap();
}

/// 解析器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlowState {
    /// 还没有遇到任何条目
    Header,
    /// 正在读取 `#` 元数据行
    Meta,
    /// 正在读取查询文本
    Sql,
}

/// 生成消息时保留的字段名，同名的元数据会被忽略
const RESERVED_FIELDS: [&str; 3] = ["log_type", "query", "query_lines"];

/// 元数据名规范化：小写，非 `[a-z0-9_.-]` 的字符替换为 `_`
pub fn normalize_metric_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// 从一行元数据（去掉 `# ` 之后的内容）中解析 `Name: value` 对
pub fn parse_meta_pairs(content: &str) -> Vec<(String, String)> {
    let keys: Vec<(usize, usize, &str)> = META_KEY_RE
        .captures_iter(content)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?;
            Some((name.start(), whole.end(), name.as_str()))
        })
        .collect();

    keys.iter()
        .enumerate()
        .map(|(i, &(_, value_start, name))| {
            let value_end =
                keys.get(i + 1).map_or(content.len(), |&(next, _, _)| next);
            let value = content[value_start..value_end].trim();
            (normalize_metric_name(name), value.to_string())
        })
        .collect()
}

/// 慢查询日志解析器
pub struct SlowLogParser {
    builder: MessageBuilder,
    fingerprinter: Box<dyn Fingerprint>,
    state: SlowState,
    query_text: String,
    query_line_count: usize,
    use_skipped: bool,
    timestamp_skipped: bool,
    metrics: Vec<(String, String)>,
}

impl SlowLogParser {
    pub fn new(builder: MessageBuilder, fingerprinter: Box<dyn Fingerprint>) -> Self {
        Self {
            builder,
            fingerprinter,
            state: SlowState::Header,
            query_text: String::new(),
            query_line_count: 0,
            use_skipped: false,
            timestamp_skipped: false,
            metrics: Vec::new(),
        }
    }

    pub fn state(&self) -> SlowState {
        self.state
    }

    pub fn query_text(&self) -> &str {
        &self.query_text
    }

    pub fn query_line_count(&self) -> usize {
        self.query_line_count
    }

    /// 进入查询文本的行数：总行数减去 `use` 和 `SET timestamp` 两种结构行
    pub fn query_text_lines(&self) -> usize {
        self.query_line_count
            - usize::from(self.use_skipped)
            - usize::from(self.timestamp_skipped)
    }

    /// 当前条目已收集的元数据
    pub fn metric(&self, name: &str) -> Option<&str> {
        self.metrics
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn set_metric(&mut self, name: String, value: String) {
        match self.metrics.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) => *v = value,
            None => self.metrics.push((name, value)),
        }
    }

    fn reset_entry(&mut self) {
        self.query_text.clear();
        self.query_line_count = 0;
        self.use_skipped = false;
        self.timestamp_skipped = false;
        self.metrics.clear();
    }

    fn record_meta(&mut self, line: &str) {
        let content = line.strip_prefix("# ").unwrap_or(line);
        for (name, value) in parse_meta_pairs(content) {
            self.set_metric(name, value);
        }
    }

    fn push_sql(&mut self, line: &str) {
        let first = self.query_line_count == 0;

        if first {
            if let Some(caps) = USE_RE.captures(line) {
                if self.metric("schema").is_none() {
                    self.set_metric("schema".to_string(), caps[1].trim().to_string());
                }
                self.use_skipped = true;
                self.query_line_count += 1;
                return;
            }
        }

        let after_use = self.query_line_count == 1 && self.use_skipped;
        if first || after_use {
            if let Some(caps) = SET_TIMESTAMP_RE.captures(line) {
                self.set_metric("timestamp".to_string(), caps[1].to_string());
                self.timestamp_skipped = true;
                self.query_line_count += 1;
                return;
            }
        }

        // 空行同样占一行
        if self.query_text_lines() > 0 {
            self.query_text.push('\n');
        }
        self.query_text.push_str(line);
        self.query_line_count += 1;
    }

    /// 结束当前条目并生成消息，随后清空元数据
    fn finalize(&mut self) -> Result<GelfMessage, GelfError> {
        let query_lines = self.query_text_lines().to_string();
        let raw = std::mem::take(&mut self.query_text);
        let normalized = match self.fingerprinter.fingerprint(&raw) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("查询指纹化失败，使用原始查询: {}", e);
                raw.clone()
            }
        };
        let canonical = capitalize_first_word(&normalized);
        let metrics = std::mem::take(&mut self.metrics);

        let timestamp = metrics
            .iter()
            .find(|(k, _)| k == "timestamp")
            .and_then(|(_, v)| v.parse::<i64>().ok());
        let short_message = self.builder.leading_slice(&canonical).to_string();

        let mut custom: Vec<(String, String)> = vec![
            ("log_type".to_string(), "slow".to_string()),
            ("query".to_string(), canonical),
            ("query_lines".to_string(), query_lines.clone()),
        ];
        custom.extend(
            metrics
                .into_iter()
                .filter(|(k, _)| !RESERVED_FIELDS.contains(&k.as_str())),
        );

        tracing::trace!(
            "慢查询条目结束，共 {} 行，其中查询文本 {} 行",
            self.query_line_count,
            query_lines
        );
        self.builder.build(short_message, SLOW_LOG_LEVEL, timestamp, custom)
    }
}

impl LogParser for SlowLogParser {
    fn feed(&mut self, line: &str) -> Result<Option<GelfMessage>, GelfError> {
        if line.starts_with("# ") {
            if line.starts_with(ENTRY_MARKER) {
                let finished = if self.query_text.is_empty() {
                    None
                } else {
                    Some(self.finalize()?)
                };
                self.reset_entry();
                self.state = SlowState::Meta;
                self.record_meta(line);
                return Ok(finished);
            }
            match self.state {
                SlowState::Header => {
                    tracing::trace!("忽略文件头注释: {}", line)
                }
                SlowState::Meta => self.record_meta(line),
                SlowState::Sql => self.push_sql(line),
            }
            return Ok(None);
        }

        match self.state {
            SlowState::Header => tracing::trace!("忽略文件头: {}", line),
            SlowState::Meta => {
                self.state = SlowState::Sql;
                self.push_sql(line);
            }
            SlowState::Sql => self.push_sql(line),
        }
        Ok(None)
    }

    fn finish(
        &mut self,
        terminating: bool,
    ) -> Result<Option<GelfMessage>, GelfError> {
        // 持续跟踪时，末尾的条目可能还在写入，留到下一个标记再结束
        if !terminating || self.query_text.is_empty() {
            return Ok(None);
        }
        let message = self.finalize()?;
        self.reset_entry();
        Ok(Some(message))
    }
}

impl std::fmt::Debug for SlowLogParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlowLogParser")
            .field("state", &self.state)
            .field("query_line_count", &self.query_line_count)
            .field("metrics", &self.metrics)
            .finish()
    }
}
