//! Structured logging bootstrap (spec §6's ambient stack), identical
//! construction to `shard::logging` since every binary shares the same
//! `slog`/`sloggers` setup (spec §1.1).

use serde_derive::{Deserialize, Serialize};
use slog::Logger;
use sloggers::{Config, LoggerConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> LogConfig {
        LogConfig {
            level: "info".to_string(),
        }
    }
}

pub fn init(cfg: &LogConfig, override_level: Option<&str>) -> Logger {
    let level = override_level.unwrap_or(&cfg.level);
    let toml = format!(
        "type = \"terminal\"\nlevel = \"{}\"\ndestination = \"stderr\"\n",
        level
    );
    let config: LoggerConfig = serdeconv::from_toml_str(&toml).expect("invalid logging configuration");
    config.build_logger().expect("failed to build logger")
}
