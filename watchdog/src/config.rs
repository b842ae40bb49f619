use crate::logging::LogConfig;
use atlasnet_health::HealthConfig;
use atlasnet_spatial::GridHeuristicConfig;
use glam::Vec3;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 29300;

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

/// Plain, serializable mirror of `atlasnet_spatial::GridHeuristicConfig`
/// (which only derives `Debug`/`Clone`, not `serde`, since it lives in a
/// crate with no config-file concerns of its own).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridConfig {
    pub origin_x: f32,
    pub origin_y: f32,
    pub origin_z: f32,
    pub half_extent: f32,
}

impl Default for GridConfig {
    fn default() -> GridConfig {
        let d = GridHeuristicConfig::default();
        GridConfig {
            origin_x: d.origin.x,
            origin_y: d.origin.y,
            origin_z: d.origin.z,
            half_extent: d.half_extent,
        }
    }
}

impl GridConfig {
    pub fn to_heuristic_config(self) -> GridHeuristicConfig {
        GridHeuristicConfig {
            origin: Vec3::new(self.origin_x, self.origin_y, self.origin_z),
            half_extent: self.half_extent,
        }
    }
}

/// Pacing for the watchdog's own loop: how often it reconciles the computed
/// partition against `bounds_pending`/`bounds_claimed`, republishing any
/// bound that has fallen out of both (spec §4.6, §4.7's "Rebound" note).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogTiming {
    pub reconcile_interval_ms: u64,
}

impl Default for WatchdogTiming {
    fn default() -> WatchdogTiming {
        WatchdogTiming {
            reconcile_interval_ms: 2_000,
        }
    }
}

impl WatchdogTiming {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    pub network: NetworkConfig,
    pub timing: WatchdogTiming,
    pub grid: GridConfig,
    pub health: HealthConfig,
    pub logging: LogConfig,
}

impl Default for WatchdogConfig {
    fn default() -> WatchdogConfig {
        WatchdogConfig {
            network: NetworkConfig::default(),
            timing: WatchdogTiming::default(),
            grid: GridConfig::default(),
            health: HealthConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl WatchdogConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> WatchdogConfig {
        serdeconv::from_toml_file(path).expect("error loading watchdog configuration file")
    }
}
