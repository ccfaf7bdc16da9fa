use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Success,
    Info,
    Error,
}

/// Body for `POST /sws/v1/logs`.
#[derive(Debug, Clone, Serialize)]
pub struct LogWrite {
    pub log: String,
    pub level: LogLevel,
    pub context: Value,
}

mod wp_datetime {
    use chrono::NaiveDateTime;
    use serde::{self, Deserialize, Deserializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        match s {
            Some(s) if !s.is_empty() => NaiveDateTime::parse_from_str(&s, FORMAT)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    #[serde(with = "wp_datetime", default)]
    pub timestamp: Option<NaiveDateTime>,
    pub log: String,
    #[serde(default)]
    pub level: Option<LogLevel>,
    #[serde(default)]
    pub context: Value,
}

impl LogEntry {
    pub fn is_error(&self) -> bool {
        self.level == Some(LogLevel::Error)
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsResponse {
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}
