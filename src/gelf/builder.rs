use crate::gelf::{GelfError, GelfMessage, Mandatory};

/// 时间来源，测试中可以替换为固定时钟
pub trait Clock: Send {
    /// 当前 UNIX 时间戳（秒）
    fn now(&self) -> i64;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// 固定时钟
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0
    }
}

/// 发送给 Graylog 的主机名：优先使用配置值，否则取系统主机名
pub fn resolve_hostname(configured: Option<&str>) -> String {
    if let Some(name) = configured.filter(|n| !n.trim().is_empty()) {
        return name.to_string();
    }
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            tracing::warn!("无法获取系统主机名: {}", e);
            "localhost".to_string()
        }
    }
}

/// 规范化日志级别
///
/// 去掉方括号并转为大写，返回 (级别名, GELF 级别)。
/// 级别与 syslog 一致：3=Error, 4=Warning, 6=Informational，无法识别时为 `UNKNOWN`。
pub fn normalize_level(raw: &str) -> (String, &'static str) {
    let token = raw.trim_matches(|c| c == '[' || c == ']').to_uppercase();
    let level = match token.as_str() {
        "ERROR" => "3",
        "WARNING" => "4",
        "NOTE" => "6",
        _ => "UNKNOWN",
    };
    (token, level)
}

/// 消息构造器
///
/// 持有主机名、时钟和 short_message 截取长度，解析器在条目完成时用它生成消息。
pub struct MessageBuilder {
    host: String,
    clock: Box<dyn Clock>,
    short_message_len: usize,
}

impl MessageBuilder {
    pub fn new(
        host: impl Into<String>,
        clock: Box<dyn Clock>,
        short_message_len: usize,
    ) -> Self {
        Self { host: host.into(), clock, short_message_len }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    /// 截取正文开头的若干个字符
    pub fn leading_slice<'a>(&self, body: &'a str) -> &'a str {
        match body.char_indices().nth(self.short_message_len) {
            Some((idx, _)) => &body[..idx],
            None => body,
        }
    }

    /// 构造消息；`timestamp` 为空时使用时钟
    pub fn build<K, V, I>(
        &self,
        short_message: String,
        level: &str,
        timestamp: Option<i64>,
        custom: I,
    ) -> Result<GelfMessage, GelfError>
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let timestamp = timestamp.unwrap_or_else(|| self.clock.now());
        GelfMessage::compose(
            Mandatory {
                host: Some(self.host.clone()),
                short_message: Some(short_message),
                timestamp: Some(timestamp.to_string()),
                level: Some(level.to_string()),
            },
            custom,
        )
    }
}

impl std::fmt::Debug for MessageBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBuilder")
            .field("host", &self.host)
            .field("short_message_len", &self.short_message_len)
            .finish()
    }
}
