//! HTTP 传输
//!
//! 阻塞客户端，带连接池。消息以 `application/json` POST 到 `<base>/gelf`。
//! 连接错误和 502/503/504 按指数退避重试，第 n 次重试前等待
//! `backoff_factor * 2^(n-1)` 秒。

use super::{Transport, TransportError};
use crate::config::HttpConfig;
use crate::error::{ConsumerError, Result};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use std::time::Duration;

const NAME: &str = "http";
const GELF_PATH: &str = "/gelf";

/// 固定的 User-Agent
pub const USER_AGENT: &str = concat!("mariadb-log-consumer/", env!("CARGO_PKG_VERSION"));

/// 会重试的状态码
const RETRY_STATUS: [u16; 3] = [502, 503, 504];

#[derive(Debug)]
pub struct HttpTransport {
    client: Option<Client>,
    url: String,
    max_retries: u32,
    backoff_factor: f64,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .pool_idle_timeout(config.idle_timeout())
            .redirect(Policy::none())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ConsumerError::config(format!("无法创建HTTP客户端: {e}")))?;

        Ok(Self {
            client: Some(client),
            url: format!("{}{}", config.url.trim_end_matches('/'), GELF_PATH),
            max_retries: config.max_retries,
            backoff_factor: config.backoff_factor,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 第 `retry` 次重试（从 1 开始）前的等待时间
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(30) as i32;
        Duration::try_from_secs_f64(self.backoff_factor * 2f64.powi(exponent))
            .unwrap_or(Duration::ZERO)
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    fn send(&mut self, payload: &[u8]) -> std::result::Result<(), TransportError> {
        let Some(client) = self.client.as_ref() else {
            return Err(TransportError::Disconnected(NAME));
        };

        let mut last_err = TransportError::Disconnected(NAME);
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                tracing::debug!("HTTP 第 {} 次重试，等待 {:?}", attempt, delay);
                std::thread::sleep(delay);
            }

            let response = client
                .post(&self.url)
                .header(CONTENT_TYPE, "application/json")
                .body(payload.to_vec())
                .send();

            match response {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if !RETRY_STATUS.contains(&status) {
                        return Err(TransportError::Status(status));
                    }
                    last_err = TransportError::Status(status);
                }
                Err(e) => last_err = TransportError::Http(e.to_string()),
            }
        }

        Err(last_err)
    }

    fn close(&mut self) {
        self.client = None;
    }
}
