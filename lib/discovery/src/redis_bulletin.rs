use crate::bulletin::Bulletin;
use crate::error::{DiscoveryError, DiscoveryResult};
use redis::{Client, Commands, RedisError, Script};
use slog::{debug, Logger};
use std::collections::HashMap;
use std::sync::Mutex;

/// Lua script mirroring the claim-one-field semantics `BoundLeaser` needs:
/// `HRANDFIELD` + `HGET` + `HDEL` as a single atomic step so two shards can
/// race `pop_one` on the same pending-bounds table without both winning.
const POP_ONE_SCRIPT: &str = r#"
local field = redis.call('HRANDFIELD', KEYS[1])
if not field then
    return false
end
local value = redis.call('HGET', KEYS[1], field)
redis.call('HDEL', KEYS[1], field)
return {field, value}
"#;

fn map_err(e: RedisError) -> DiscoveryError {
    DiscoveryError::Unavailable(e.to_string())
}

/// `Bulletin` backed by a real Redis (or Redis Cluster-compatible) server,
/// grounded on `RedisConnection`'s GET/SET/EXPIRE/TTL/HSET/HGET/HGETALL/
/// HDEL/HEXISTS/HINCRBY surface.
pub struct RedisBulletin {
    client: Client,
    conn: Mutex<redis::Connection>,
    pop_one_script: Script,
    log: Logger,
}

impl RedisBulletin {
    pub fn connect(address: &str, log: Logger) -> DiscoveryResult<RedisBulletin> {
        let client = Client::open(address).map_err(map_err)?;
        let conn = client.get_connection().map_err(map_err)?;
        Ok(RedisBulletin {
            client,
            conn: Mutex::new(conn),
            pop_one_script: Script::new(POP_ONE_SCRIPT),
            log,
        })
    }

    /// Reconnects if the cached connection has gone bad. Redis's `Connection`
    /// has no health check of its own; we find out the hard way on the next
    /// command and recover for the one after it.
    fn with_connection<F, T>(&self, f: F) -> DiscoveryResult<T>
    where
        F: FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    {
        let mut guard = self.conn.lock().expect("redis connection mutex poisoned");
        match f(&mut guard) {
            Ok(v) => Ok(v),
            Err(e) if e.is_io_error() => {
                debug!(self.log, "reconnecting to discovery bulletin"; "error" => %e);
                *guard = self.client.get_connection().map_err(map_err)?;
                f(&mut guard).map_err(map_err)
            }
            Err(e) => Err(map_err(e)),
        }
    }
}

impl Bulletin for RedisBulletin {
    fn get(&self, key: &str) -> DiscoveryResult<Option<Vec<u8>>> {
        self.with_connection(|c| c.get(key))
    }

    fn set(&self, key: &str, value: &[u8]) -> DiscoveryResult<()> {
        self.with_connection(|c| c.set(key, value))
    }

    fn del(&self, key: &str) -> DiscoveryResult<bool> {
        let removed: i64 = self.with_connection(|c| c.del(key))?;
        Ok(removed > 0)
    }

    fn expire(&self, key: &str, ttl_secs: u64) -> DiscoveryResult<bool> {
        self.with_connection(|c| c.expire(key, ttl_secs as i64))
    }

    fn ttl(&self, key: &str) -> DiscoveryResult<Option<i64>> {
        let ttl: i64 = self.with_connection(|c| c.ttl(key))?;
        Ok(if ttl < 0 { None } else { Some(ttl) })
    }

    fn exists(&self, key: &str) -> DiscoveryResult<bool> {
        self.with_connection(|c| c.exists(key))
    }

    fn hset(&self, key: &str, field: &str, value: &[u8]) -> DiscoveryResult<()> {
        self.with_connection(|c| c.hset(key, field, value))
    }

    fn hget(&self, key: &str, field: &str) -> DiscoveryResult<Option<Vec<u8>>> {
        self.with_connection(|c| c.hget(key, field))
    }

    fn hgetall(&self, key: &str) -> DiscoveryResult<HashMap<String, Vec<u8>>> {
        self.with_connection(|c| c.hgetall(key))
    }

    fn hdel(&self, key: &str, field: &str) -> DiscoveryResult<bool> {
        let removed: i64 = self.with_connection(|c| c.hdel(key, field))?;
        Ok(removed > 0)
    }

    fn hexists(&self, key: &str, field: &str) -> DiscoveryResult<bool> {
        self.with_connection(|c| c.hexists(key, field))
    }

    fn hincrby(&self, key: &str, field: &str, delta: i64) -> DiscoveryResult<i64> {
        self.with_connection(|c| c.hincr(key, field, delta))
    }

    fn server_time_now(&self) -> DiscoveryResult<u64> {
        let (secs, micros): (u64, u64) = self.with_connection(|c| redis::cmd("TIME").query(c))?;
        Ok(secs * 1000 + micros / 1000)
    }

    fn pop_one(&self, key: &str) -> DiscoveryResult<Option<(String, Vec<u8>)>> {
        let mut guard = self.conn.lock().expect("redis connection mutex poisoned");
        let result: Option<(String, Vec<u8>)> = self
            .pop_one_script
            .key(key)
            .invoke(&mut *guard)
            .map_err(map_err)?;
        Ok(result)
    }
}
