//! Logging Setup
//!
//! Installs `env_logger` as the `log` backend. `RUST_LOG` still takes
//! precedence over the configured level.

use std::io::Write;

use chrono::{SecondsFormat, Utc};
use log::LevelFilter;
use serde_json::json;

use crate::config::LogConfig;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Parses a format name, falling back to text.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Parses a level name, falling back to info.
pub fn parse_level(name: &str) -> LevelFilter {
    match name.trim().to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

/// Renders one JSON log line.
fn json_line(level: log::Level, target: &str, message: &str) -> String {
    json!({
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "level": level.as_str(),
        "target": target,
        "message": message,
    })
    .to_string()
}

/// Configures the global logger.
///
/// `verbose` forces the debug level. Calling this twice is harmless;
/// the second installation attempt is ignored.
pub fn setup_logging(config: &LogConfig, verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        parse_level(&config.level)
    };
    let format = LogFormat::parse(&config.format);

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level.as_str().to_ascii_lowercase()),
    );

    match format {
        LogFormat::Json => {
            builder.format(|buf, record| {
                let line = json_line(record.level(), record.target(), &record.args().to_string());
                writeln!(buf, "{}", line)
            });
        }
        LogFormat::Text => {
            builder.format(|buf, record| {
                writeln!(
                    buf,
                    "{} [{}] {}: {}",
                    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                    record.level(),
                    record.target(),
                    record.args()
                )
            });
        }
    }

    let _ = builder.try_init();
}
