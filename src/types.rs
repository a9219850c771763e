use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// On-disk format of the fingerprint history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryFormat {
    #[default]
    Csv,
    Sqlite,
}

impl HistoryFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryFormat::Csv => "csv",
            HistoryFormat::Sqlite => "sqlite",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_filters() {
        assert_eq!(LogLevel::Debug.as_filter(), "debug");
        assert_eq!(LogLevel::Warn.as_filter(), "warn");
    }

    #[test]
    fn test_history_format_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: HistoryFormat,
        }
        let w: Wrapper = toml::from_str("format = \"sqlite\"").unwrap();
        assert_eq!(w.format, HistoryFormat::Sqlite);
        assert_eq!(HistoryFormat::default(), HistoryFormat::Csv);
    }
}
