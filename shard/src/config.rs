use crate::logging::LogConfig;
use atlasnet_health::HealthConfig;
use serde_derive::{Deserialize, Serialize};
use serdeconv;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 29100;

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

/// Pacing for the shard's own loops: ledger sweep, bound-lease attempts, and
/// authority telemetry publication (spec §4.7, §4.9, §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardTiming {
    pub sweep_interval_ms: u64,
    pub lease_interval_ms: u64,
    pub telemetry_interval_ms: u64,
}

impl Default for ShardTiming {
    fn default() -> ShardTiming {
        ShardTiming {
            sweep_interval_ms: 100,
            lease_interval_ms: 500,
            telemetry_interval_ms: 1_000,
        }
    }
}

impl ShardTiming {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn lease_interval(&self) -> Duration {
        Duration::from_millis(self.lease_interval_ms)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms)
    }
}

/// The debug orbit simulator (spec §4.10, §8-S3): off by default, since it
/// only exists to exercise the transfer pipeline without a real client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    pub orbit_enabled: bool,
    pub orbit_radius: f32,
    pub orbit_period_secs: f32,
}

impl Default for DebugConfig {
    fn default() -> DebugConfig {
        DebugConfig {
            orbit_enabled: false,
            orbit_radius: 12.0,
            orbit_period_secs: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    pub network: NetworkConfig,
    pub timing: ShardTiming,
    pub health: HealthConfig,
    pub logging: LogConfig,
    pub debug: DebugConfig,
}

impl Default for ShardConfig {
    fn default() -> ShardConfig {
        ShardConfig {
            network: NetworkConfig::default(),
            timing: ShardTiming::default(),
            health: HealthConfig::default(),
            logging: LogConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

impl ShardConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> ShardConfig {
        serdeconv::from_toml_file(path).expect("error loading shard configuration file")
    }
}
