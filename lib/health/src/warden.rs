use crate::config::HealthConfig;
use atlasnet_discovery::{Bulletin, DiscoveryResult};
use atlasnet_ident::NodeIdentity;
use slog::{o, warn, Logger};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use atlasnet_core::tables::HEALTH_PINGS as HEALTH_PINGS_TABLE;

fn encode_identity(id: NodeIdentity) -> String {
    id.canonical()
}

/// Publishes `health_pings[self] = now + ping_lifetime_ms` on a timer (spec
/// §4.13). One call per tick; `run` wraps this in a background thread.
pub fn ping_once(bulletin: &dyn Bulletin, self_identity: NodeIdentity, cfg: &HealthConfig) -> DiscoveryResult<()> {
    let now = bulletin.server_time_now()?;
    let expiry = now + cfg.ping_lifetime_ms;
    bulletin.hset(
        HEALTH_PINGS_TABLE,
        &encode_identity(self_identity),
        &expiry.to_be_bytes(),
    )
}

/// Scans `health_pings` for entries whose expiry has passed, invoking
/// `on_expired` for each and removing the entry (spec §4.13). Returns the
/// list of peers found expired this pass.
pub fn check_once<F: FnMut(&str)>(
    bulletin: &dyn Bulletin,
    mut on_expired: F,
) -> DiscoveryResult<Vec<String>> {
    let now = bulletin.server_time_now()?;
    let table = bulletin.hgetall(HEALTH_PINGS_TABLE)?;

    let mut expired = Vec::new();
    for (peer, expiry_bytes) in table {
        let expiry = expiry_bytes
            .get(..8)
            .map(|b| u64::from_be_bytes(b.try_into().expect("slice is exactly 8 bytes")))
            .unwrap_or(0);

        if expiry <= now {
            bulletin.hdel(HEALTH_PINGS_TABLE, &peer)?;
            on_expired(&peer);
            expired.push(peer);
        }
    }

    Ok(expired)
}

/// Owns the ping and check loops for one process (spec §4.13, §5's "Health
/// warden pair" thread). `on_peer_failure` runs on the check thread and is
/// responsible for downstream cleanup (closing Interlink connections,
/// cancelling in-flight transfers, releasing bulletin locks named by the
/// failed peer) — the warden itself only detects expiry.
pub struct HealthWarden {
    stop: Arc<AtomicBool>,
    ping_handle: Option<JoinHandle<()>>,
    check_handle: Option<JoinHandle<()>>,
}

impl HealthWarden {
    /// Spawns the ping and check threads. Both check `stop` once per
    /// iteration (spec §5 cancellation model).
    pub fn spawn<B, F>(
        bulletin: Arc<B>,
        self_identity: NodeIdentity,
        cfg: HealthConfig,
        mut on_peer_failure: F,
        log: &Logger,
    ) -> HealthWarden
    where
        B: Bulletin + 'static,
        F: FnMut(&str) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));

        let ping_stop = Arc::clone(&stop);
        let ping_bulletin = Arc::clone(&bulletin);
        let ping_log = log.new(o!("loop" => "health-ping"));
        let ping_handle = thread::spawn(move || {
            while !ping_stop.load(Ordering::Relaxed) {
                if let Err(e) = ping_once(ping_bulletin.as_ref(), self_identity, &cfg) {
                    warn!(ping_log, "health ping failed"; "error" => %e);
                }
                thread::sleep(cfg.ping_interval());
            }
        });

        let check_stop = Arc::clone(&stop);
        let check_bulletin = Arc::clone(&bulletin);
        let check_log = log.new(o!("loop" => "health-check"));
        let check_handle = thread::spawn(move || {
            while !check_stop.load(Ordering::Relaxed) {
                let result = check_once(check_bulletin.as_ref(), |peer| on_peer_failure(peer));
                if let Err(e) = result {
                    warn!(check_log, "health check failed"; "error" => %e);
                }
                thread::sleep(cfg.check_interval());
            }
        });

        HealthWarden {
            stop,
            ping_handle: Some(ping_handle),
            check_handle: Some(check_handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.ping_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.check_handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for HealthWarden {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasnet_discovery::MemoryBulletin;
    use atlasnet_ident::Role;

    #[test]
    fn ping_then_check_does_not_expire_a_fresh_entry() {
        let bulletin = MemoryBulletin::new();
        let id = NodeIdentity::singleton(Role::Watchdog);
        let cfg = HealthConfig::default();

        ping_once(&bulletin, id, &cfg).unwrap();
        let expired = check_once(&bulletin, |_| {}).unwrap();
        assert!(expired.is_empty());
    }

    #[test]
    fn check_expires_a_stale_entry_and_removes_it() {
        let bulletin = MemoryBulletin::new();
        let id = NodeIdentity::singleton(Role::Watchdog);

        // Ping with a lifetime of 0 so it is already expired by the time we check.
        let cfg = HealthConfig {
            ping_lifetime_ms: 0,
            ..HealthConfig::default()
        };
        ping_once(&bulletin, id, &cfg).unwrap();

        let mut seen = Vec::new();
        let expired = check_once(&bulletin, |peer| seen.push(peer.to_string())).unwrap();

        assert_eq!(expired.len(), 1);
        assert_eq!(seen.len(), 1);
        assert!(!bulletin.hexists(HEALTH_PINGS_TABLE, &id.canonical()).unwrap());
    }
}
