//! 慢查询日志解析的集成测试

mod common;

use common::{FIXED_NOW, SLOW_LOG_SAMPLE};
use mariadb_log_consumer::gelf::{FixedClock, GelfMessage, MessageBuilder};
use mariadb_log_consumer::parser::fingerprint::{Fingerprint, FingerprintError};
use mariadb_log_consumer::parser::{IdentityFingerprinter, LogParser, SlowLogParser};

fn parser_with(fingerprinter: Box<dyn Fingerprint>) -> SlowLogParser {
    SlowLogParser::new(
        MessageBuilder::new("db1", Box::new(FixedClock(FIXED_NOW)), 20),
        fingerprinter,
    )
}

fn parse_all(parser: &mut SlowLogParser, input: &str) -> Vec<GelfMessage> {
    let mut messages: Vec<GelfMessage> = input
        .lines()
        .filter_map(|line| parser.feed(line).unwrap())
        .collect();
    messages.extend(parser.finish(true).unwrap());
    messages
}

/// 把数字替换为 `?` 的简单指纹化
struct DigitsFingerprinter;

impl Fingerprint for DigitsFingerprinter {
    fn fingerprint(&self, query: &str) -> Result<String, FingerprintError> {
        Ok(query
            .chars()
            .map(|c| if c.is_ascii_digit() { '?' } else { c })
            .collect())
    }
}

struct BrokenFingerprinter;

impl Fingerprint for BrokenFingerprinter {
    fn fingerprint(&self, _query: &str) -> Result<String, FingerprintError> {
        Err(FingerprintError::EmptyOutput("broken".to_string()))
    }
}

#[test]
fn test_sample_entries() {
    let mut parser = parser_with(Box::new(IdentityFingerprinter));
    let messages = parse_all(&mut parser, SLOW_LOG_SAMPLE);
    assert_eq!(messages.len(), 2);

    let first = &messages[0];
    assert_eq!(first.get("level"), Some("6"));
    assert_eq!(first.get("timestamp"), Some("1690020000"));
    assert_eq!(
        first.get("_query"),
        Some("Select count(*)\nFROM orders\nWHERE status = 'open';")
    );
    assert_eq!(first.get("short_message"), Some("Select count(*)\nFROM"));
    assert_eq!(first.get("_query_lines"), Some("3"));
    assert_eq!(first.get("_query_time"), Some("2.500134"));
    assert_eq!(first.get("_rows_examined"), Some("100000"));
    assert_eq!(first.get("_schema"), Some("shop"));
    assert_eq!(first.get("_thread_id"), Some("8"));
    assert_eq!(first.get("_log_type"), Some("slow"));

    let second = &messages[1];
    assert_eq!(second.get("timestamp"), Some("1690020005"));
    assert_eq!(second.get("_schema"), None);
    assert_eq!(second.get("_query_lines"), Some("1"));
}

#[test]
fn test_missing_set_timestamp_uses_clock() {
    let mut parser = parser_with(Box::new(IdentityFingerprinter));
    let messages = parse_all(&mut parser, "# Time: 230722 10:00:00\nselect 1;\n");
    assert_eq!(messages[0].get("timestamp"), Some("1700000000"));
}

#[test]
fn test_fingerprint_applied() {
    let mut parser = parser_with(Box::new(DigitsFingerprinter));
    let messages = parse_all(
        &mut parser,
        "# Time: 230722 10:00:00\nSELECT * FROM t WHERE id = 42;\n",
    );
    assert_eq!(messages[0].get("_query"), Some("Select * FROM t WHERE id = ??;"));
}

#[test]
fn test_fingerprint_failure_falls_back_to_raw_query() {
    let mut parser = parser_with(Box::new(BrokenFingerprinter));
    let messages = parse_all(
        &mut parser,
        "# Time: 230722 10:00:00\nselect 42;\n",
    );
    assert_eq!(messages[0].get("_query"), Some("Select 42;"));
}

#[test]
fn test_following_mode_holds_last_entry() {
    let mut parser = parser_with(Box::new(IdentityFingerprinter));
    let emitted: Vec<GelfMessage> = SLOW_LOG_SAMPLE
        .lines()
        .filter_map(|line| parser.feed(line).unwrap())
        .collect();
    assert_eq!(emitted.len(), 1);
    assert!(parser.finish(false).unwrap().is_none());
    assert!(parser.finish(true).unwrap().is_some());
}
