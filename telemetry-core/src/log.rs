//! Log data structures shared by the live stream and historical queries

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Number of message characters that take part in the dedup identity key
const IDENTITY_PREFIX_CHARS: usize = 50;

/// Default page size for historical queries
pub const DEFAULT_QUERY_LIMIT: u32 = 1000;

/// A single application log line as produced by the trading bot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO-8601 timestamp, kept verbatim from the server
    pub timestamp: String,
    pub level: String,
    pub logger: String,
    pub module: String,
    pub line: u32,
    pub message: String,
}

impl LogEntry {
    /// Composite key used to detect duplicate deliveries
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey {
            timestamp: self.timestamp.clone(),
            message_prefix: self.message.chars().take(IDENTITY_PREFIX_CHARS).collect(),
        }
    }

    /// Case-insensitive substring match against message, logger or module.
    ///
    /// `needle_lower` must already be lowercased.
    pub fn matches_search(&self, needle_lower: &str) -> bool {
        if needle_lower.is_empty() {
            return true;
        }
        [&self.message, &self.logger, &self.module]
            .iter()
            .any(|field| field.to_lowercase().contains(needle_lower))
    }
}

/// `(timestamp, first 50 chars of message)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub timestamp: String,
    pub message_prefix: String,
}

/// Log severity levels understood by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.as_str().to_string()
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// Descriptor of an available historical log source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFile {
    /// ISO date (YYYY-MM-DD)
    pub date: String,
    #[serde(rename = "type")]
    pub log_type: String,
    /// Size in bytes
    pub size: u64,
}

/// File count and byte size for one grouping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeBucket {
    #[serde(default)]
    pub files: u64,
    #[serde(default)]
    pub size: u64,
}

/// Aggregate counts and sizes grouped by type and date
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStats {
    #[serde(default)]
    pub total_files: u64,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub by_type: BTreeMap<String, SizeBucket>,
    #[serde(default)]
    pub by_date: BTreeMap<String, SizeBucket>,
}

impl LogStats {
    /// Rebuild stats from a file listing
    pub fn from_files(files: &[LogFile]) -> Self {
        let mut stats = LogStats::default();
        for file in files {
            stats.total_files += 1;
            stats.total_size += file.size;

            let by_type = stats.by_type.entry(file.log_type.clone()).or_default();
            by_type.files += 1;
            by_type.size += file.size;

            let by_date = stats.by_date.entry(file.date.clone()).or_default();
            by_date.files += 1;
            by_date.size += file.size;
        }
        stats
    }
}

/// Response of the overview endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogOverview {
    #[serde(default)]
    pub files: Vec<LogFile>,
    #[serde(default)]
    pub stats: LogStats,
}

impl LogOverview {
    /// Whether any log file exists for the given date (and type, when set)
    pub fn has_file(&self, date: &str, log_type: Option<&str>) -> bool {
        self.files
            .iter()
            .any(|f| f.date == date && log_type.map_or(true, |t| f.log_type == t))
    }
}

/// Parameters of a historical log query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub date: String,
    pub log_type: Option<String>,
    pub level: Option<String>,
    pub search: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl LogQuery {
    pub fn new(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            log_type: None,
            level: None,
            search: None,
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
        }
    }

    pub fn with_log_type(mut self, log_type: impl Into<String>) -> Self {
        self.log_type = Some(log_type.into());
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Query string pairs; empty optional values are omitted
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("date", self.date.clone()),
            ("limit", self.limit.to_string()),
            ("offset", self.offset.to_string()),
        ];
        if let Some(t) = non_empty(&self.log_type) {
            params.push(("log_type", t.to_string()));
        }
        if let Some(l) = non_empty(&self.level) {
            params.push(("level", l.to_string()));
        }
        if let Some(s) = non_empty(&self.search) {
            params.push(("search", s.to_string()));
        }
        params
    }
}

impl Default for LogQuery {
    fn default() -> Self {
        Self::new(String::new())
    }
}

/// A downloaded log payload ready to be written to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogExport {
    pub file_name: String,
    pub body: String,
}

impl LogExport {
    /// File name derived from the date (and type, when filtered)
    pub fn file_name_for(date: &str, log_type: Option<&str>) -> String {
        match log_type.filter(|t| !t.is_empty()) {
            Some(t) => format!("logs_{}_{}.txt", date, t),
            None => format!("logs_{}.txt", date),
        }
    }
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            timestamp: "2024-03-01T10:00:00".to_string(),
            level: "INFO".to_string(),
            logger: "broker.zerodha".to_string(),
            module: "orders".to_string(),
            line: 42,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_identity_key_uses_message_prefix() {
        let long = "x".repeat(80);
        let mut other = long.clone();
        other.push_str("tail that differs");

        let a = entry(&long).identity_key();
        let b = entry(&other).identity_key();
        assert_eq!(a, b);
        assert_eq!(a.message_prefix.chars().count(), 50);
    }

    #[test]
    fn test_identity_key_does_not_split_multibyte_chars() {
        let msg = "₹".repeat(60);
        let key = entry(&msg).identity_key();
        assert_eq!(key.message_prefix.chars().count(), 50);
    }

    #[test]
    fn test_search_matches_any_field_case_insensitive() {
        let e = entry("Connection TIMEOUT on broker X");
        assert!(e.matches_search("timeout"));
        assert!(e.matches_search("zerodha"));
        assert!(e.matches_search("ORDERS".to_lowercase().as_str()));
        assert!(!e.matches_search("filled"));
        assert!(e.matches_search(""));
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("Error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert!("verbose".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Critical.to_string(), "CRITICAL");
    }

    #[test]
    fn test_log_level_into_wire_string() {
        let level: String = " warning ".parse::<LogLevel>().unwrap().into();
        assert_eq!(level, "WARNING");

        let query = LogQuery::new("2024-03-01").with_level(LogLevel::Debug);
        assert_eq!(query.level.as_deref(), Some("DEBUG"));
    }

    #[test]
    fn test_query_params_skip_empty_filters() {
        let query = LogQuery::new("2024-03-01")
            .with_level(LogLevel::Error)
            .with_search("");
        let params = query.to_params();
        assert!(params.contains(&("date", "2024-03-01".to_string())));
        assert!(params.contains(&("limit", "1000".to_string())));
        assert!(params.contains(&("offset", "0".to_string())));
        assert!(params.contains(&("level", "ERROR".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "search"));
        assert!(!params.iter().any(|(k, _)| *k == "log_type"));
    }

    #[test]
    fn test_stats_from_files() {
        let files = vec![
            LogFile { date: "2024-03-01".into(), log_type: "app".into(), size: 100 },
            LogFile { date: "2024-03-01".into(), log_type: "error".into(), size: 20 },
            LogFile { date: "2024-03-02".into(), log_type: "app".into(), size: 50 },
        ];
        let stats = LogStats::from_files(&files);
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.total_size, 170);
        assert_eq!(stats.by_type["app"], SizeBucket { files: 2, size: 150 });
        assert_eq!(stats.by_date["2024-03-01"].size, 120);
    }

    #[test]
    fn test_overview_deserializes_type_field() {
        let json = r#"{"files":[{"date":"2024-03-01","type":"app","size":12}],"stats":{"total_files":1}}"#;
        let overview: LogOverview = serde_json::from_str(json).unwrap();
        assert!(overview.has_file("2024-03-01", None));
        assert!(overview.has_file("2024-03-01", Some("app")));
        assert!(!overview.has_file("2024-03-01", Some("error")));
        assert!(!overview.has_file("2024-02-28", None));
        assert_eq!(overview.stats.total_files, 1);
    }

    #[test]
    fn test_export_file_name() {
        assert_eq!(LogExport::file_name_for("2024-03-01", None), "logs_2024-03-01.txt");
        assert_eq!(
            LogExport::file_name_for("2024-03-01", Some("error")),
            "logs_2024-03-01_error.txt"
        );
        assert_eq!(LogExport::file_name_for("2024-03-01", Some("")), "logs_2024-03-01.txt");
    }
}
