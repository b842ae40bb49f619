use crate::bulletin::Bulletin;
use crate::error::DiscoveryResult;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn fresh(value: Vec<u8>) -> Entry {
        Entry {
            value,
            expires_at: None,
        }
    }

    fn is_live(&self) -> bool {
        match self.expires_at {
            Some(at) => at > Instant::now(),
            None => true,
        }
    }
}

#[derive(Default)]
struct State {
    keys: HashMap<String, Entry>,
    hashes: HashMap<String, HashMap<String, Vec<u8>>>,
}

/// In-process `Bulletin` test double: a plain `Mutex`-guarded map standing in
/// for Redis. Used by integration tests and the debug simulator so they
/// don't need a live Redis instance (spec §8's test-tooling expectations).
#[derive(Default)]
pub struct MemoryBulletin {
    state: Mutex<State>,
}

impl MemoryBulletin {
    pub fn new() -> MemoryBulletin {
        MemoryBulletin::default()
    }
}

impl Bulletin for MemoryBulletin {
    fn get(&self, key: &str) -> DiscoveryResult<Option<Vec<u8>>> {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.keys.get(key) {
            if !entry.is_live() {
                state.keys.remove(key);
                return Ok(None);
            }
        }
        Ok(state.keys.get(key).map(|e| e.value.clone()))
    }

    fn set(&self, key: &str, value: &[u8]) -> DiscoveryResult<()> {
        let mut state = self.state.lock().unwrap();
        state.keys.insert(key.to_string(), Entry::fresh(value.to_vec()));
        Ok(())
    }

    fn del(&self, key: &str) -> DiscoveryResult<bool> {
        let mut state = self.state.lock().unwrap();
        Ok(state.keys.remove(key).is_some())
    }

    fn expire(&self, key: &str, ttl_secs: u64) -> DiscoveryResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.keys.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn ttl(&self, key: &str) -> DiscoveryResult<Option<i64>> {
        let state = self.state.lock().unwrap();
        Ok(state.keys.get(key).and_then(|e| e.expires_at).map(|at| {
            at.saturating_duration_since(Instant::now()).as_secs() as i64
        }))
    }

    fn exists(&self, key: &str) -> DiscoveryResult<bool> {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.keys.get(key) {
            if !entry.is_live() {
                state.keys.remove(key);
            }
        }
        Ok(state.keys.contains_key(key))
    }

    fn hset(&self, key: &str, field: &str, value: &[u8]) -> DiscoveryResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_vec());
        Ok(())
    }

    fn hget(&self, key: &str, field: &str) -> DiscoveryResult<Option<Vec<u8>>> {
        let state = self.state.lock().unwrap();
        Ok(state.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    fn hgetall(&self, key: &str) -> DiscoveryResult<HashMap<String, Vec<u8>>> {
        let state = self.state.lock().unwrap();
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    fn hdel(&self, key: &str, field: &str) -> DiscoveryResult<bool> {
        let mut state = self.state.lock().unwrap();
        Ok(state
            .hashes
            .get_mut(key)
            .map(|h| h.remove(field).is_some())
            .unwrap_or(false))
    }

    fn hexists(&self, key: &str, field: &str) -> DiscoveryResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.hashes.get(key).map(|h| h.contains_key(field)).unwrap_or(false))
    }

    fn hincrby(&self, key: &str, field: &str, delta: i64) -> DiscoveryResult<i64> {
        let mut state = self.state.lock().unwrap();
        let table = state.hashes.entry(key.to_string()).or_default();
        let current = table
            .get(field)
            .map(|v| std::str::from_utf8(v).unwrap_or("0").parse::<i64>().unwrap_or(0))
            .unwrap_or(0);
        let next = current + delta;
        table.insert(field.to_string(), next.to_string().into_bytes());
        Ok(next)
    }

    fn server_time_now(&self) -> DiscoveryResult<u64> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Ok(now.as_millis() as u64)
    }

    fn pop_one(&self, key: &str) -> DiscoveryResult<Option<(String, Vec<u8>)>> {
        let mut state = self.state.lock().unwrap();
        let table = match state.hashes.get_mut(key) {
            Some(t) => t,
            None => return Ok(None),
        };
        let field = match table.keys().next().cloned() {
            Some(f) => f,
            None => return Ok(None),
        };
        let value = table.remove(&field).expect("field was just observed present");
        Ok(Some((field, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let b = MemoryBulletin::new();
        b.set("k", b"v").unwrap();
        assert_eq!(b.get("k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn expire_makes_key_disappear() {
        let b = MemoryBulletin::new();
        b.set("k", b"v").unwrap();
        b.expire("k", 0).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(b.get("k").unwrap(), None);
        assert!(!b.exists("k").unwrap());
    }

    #[test]
    fn hincrby_creates_and_accumulates() {
        let b = MemoryBulletin::new();
        assert_eq!(b.hincrby("h", "f", 3).unwrap(), 3);
        assert_eq!(b.hincrby("h", "f", 4).unwrap(), 7);
    }

    #[test]
    fn pop_one_drains_until_empty() {
        let b = MemoryBulletin::new();
        b.hset("pending", "a", b"1").unwrap();
        b.hset("pending", "b", b"2").unwrap();

        let first = b.pop_one("pending").unwrap().unwrap();
        let second = b.pop_one("pending").unwrap().unwrap();
        assert_ne!(first.0, second.0);
        assert!(b.pop_one("pending").unwrap().is_none());
    }

    #[test]
    fn pop_one_is_exclusive_under_concurrent_claims() {
        use std::sync::Arc;
        let b = Arc::new(MemoryBulletin::new());
        for i in 0..8 {
            b.hset("pending", &i.to_string(), b"x").unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = Arc::clone(&b);
                std::thread::spawn(move || b.pop_one("pending").unwrap())
            })
            .collect();

        let mut claimed: Vec<String> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap().0)
            .collect();
        claimed.sort();
        claimed.dedup();
        assert_eq!(claimed.len(), 8, "every field must be claimed exactly once");
    }
}
