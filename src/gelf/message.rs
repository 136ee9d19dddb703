use crate::gelf::{GELF_VERSION, GelfError};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashSet;

/// 必填字段。`version` 固定为 [`GELF_VERSION`]，不需要调用方提供。
#[derive(Debug, Clone, Default)]
pub struct Mandatory {
    pub host: Option<String>,
    pub short_message: Option<String>,
    pub timestamp: Option<String>,
    pub level: Option<String>,
}

/// 一条 GELF 消息：字段名唯一，按插入顺序保存
///
/// 自定义字段以 `_` 开头，创建后仍可追加内容（换行拼接）；其他字段只能写一次。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GelfMessage {
    fields: Vec<(String, String)>,
    /// 已经追加过内容的字段，之后的追加总是带换行
    appended: HashSet<String>,
}

impl GelfMessage {
    /// 由必填字段和自定义字段构造消息
    ///
    /// 自定义字段名会自动加上 `_` 前缀。
    pub fn compose<K, V, I>(
        mandatory: Mandatory,
        custom: I,
    ) -> Result<Self, GelfError>
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let Mandatory { host, short_message, timestamp, level } = mandatory;
        let mut message = Self { fields: Vec::new(), appended: HashSet::new() };
        message.insert("version", GELF_VERSION.to_string())?;
        message.insert("host", host.ok_or(GelfError::MissingField("host"))?)?;
        message.insert(
            "short_message",
            short_message.ok_or(GelfError::MissingField("short_message"))?,
        )?;
        message.insert(
            "timestamp",
            timestamp.ok_or(GelfError::MissingField("timestamp"))?,
        )?;
        message
            .insert("level", level.ok_or(GelfError::MissingField("level"))?)?;
        for (key, value) in custom {
            message.add_custom(key.as_ref(), value)?;
        }
        Ok(message)
    }

    fn insert(&mut self, name: &str, value: String) -> Result<(), GelfError> {
        if self.get(name).is_some() {
            return Err(GelfError::DuplicateField(name.to_string()));
        }
        self.fields.push((name.to_string(), value));
        Ok(())
    }

    /// 自定义字段的完整名称
    pub fn custom_name(key: &str) -> String {
        if key.starts_with('_') { key.to_string() } else { format!("_{key}") }
    }

    /// 新增一个自定义字段
    pub fn add_custom<V: Into<String>>(
        &mut self,
        key: &str,
        value: V,
    ) -> Result<(), GelfError> {
        self.insert(&Self::custom_name(key), value.into())
    }

    /// 向已有的自定义字段追加一行
    ///
    /// 初始值为空的字段，第一次追加直接写入，之后每行以换行分隔；空行同样计入。
    pub fn append(&mut self, key: &str, text: &str) -> Result<(), GelfError> {
        let name = Self::custom_name(key);
        let Some((_, value)) = self.fields.iter_mut().find(|(k, _)| *k == name)
        else {
            return Err(GelfError::InvalidField(name));
        };
        let first = self.appended.insert(name);
        if !first || !value.is_empty() {
            value.push('\n');
        }
        value.push_str(text);
        Ok(())
    }

    /// 按名称取字段值；自定义字段需要带 `_` 前缀
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 序列化为 JSON 对象，字段顺序与插入顺序一致
    pub fn to_json(&self) -> Result<String, GelfError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Serialize for GelfMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
