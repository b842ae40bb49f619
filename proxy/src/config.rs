use crate::logging::LogConfig;
use atlasnet_health::HealthConfig;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 29200;

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

/// Pacing for the proxy's own loop: how often the client-proxy assignment
/// table gets republished for each bound client (spec §4.12's discovery
/// lookup the Server-State Bus relies on).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyTiming {
    pub assignment_publish_interval_ms: u64,
}

impl Default for ProxyTiming {
    fn default() -> ProxyTiming {
        ProxyTiming {
            assignment_publish_interval_ms: 1_000,
        }
    }
}

impl ProxyTiming {
    pub fn assignment_publish_interval(&self) -> Duration {
        Duration::from_millis(self.assignment_publish_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub network: NetworkConfig,
    pub timing: ProxyTiming,
    pub health: HealthConfig,
    pub logging: LogConfig,
}

impl Default for ProxyConfig {
    fn default() -> ProxyConfig {
        ProxyConfig {
            network: NetworkConfig::default(),
            timing: ProxyTiming::default(),
            health: HealthConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl ProxyConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> ProxyConfig {
        serdeconv::from_toml_file(path).expect("error loading proxy configuration file")
    }
}
