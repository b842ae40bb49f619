use crate::logging::LogConfig;
use atlasnet_health::HealthConfig;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 29400;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub listen_port: u16,
    pub discovery_endpoint: String,
}

impl Default for NetworkConfig {
    fn default() -> NetworkConfig {
        NetworkConfig {
            listen_port: DEFAULT_PORT,
            discovery_endpoint: "127.0.0.1:6379".to_string(),
        }
    }
}

/// Pacing for the cartograph's own loop: how often it re-polls the
/// bulletin's telemetry tables and re-renders the cluster snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartographTiming {
    pub poll_interval_ms: u64,
}

impl Default for CartographTiming {
    fn default() -> CartographTiming {
        CartographTiming {
            poll_interval_ms: 1_000,
        }
    }
}

impl CartographTiming {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartographConfig {
    pub network: NetworkConfig,
    pub timing: CartographTiming,
    pub health: HealthConfig,
    pub logging: LogConfig,
}

impl Default for CartographConfig {
    fn default() -> CartographConfig {
        CartographConfig {
            network: NetworkConfig::default(),
            timing: CartographTiming::default(),
            health: HealthConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl CartographConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> CartographConfig {
        serdeconv::from_toml_file(path).expect("error loading cartograph configuration file")
    }
}
