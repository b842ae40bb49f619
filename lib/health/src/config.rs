use std::time::Duration;

/// Pacing for the ping/check pair (spec §4.13). Kept as plain `u64`
/// milliseconds rather than `Duration` at the config boundary since these
/// values round-trip through TOML and the discovery bulletin's own
/// millisecond timestamps.
#[derive(Debug, Clone, Copy, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct HealthConfig {
    pub ping_interval_ms: u64,
    pub ping_lifetime_ms: u64,
    pub check_interval_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            ping_interval_ms: 2_000,
            ping_lifetime_ms: 6_000,
            check_interval_ms: 1_000,
        }
    }
}

impl HealthConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}
