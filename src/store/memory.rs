//! In-process store implementation.
//!
//! Mirrors the observable semantics of `RedisStore` without a running Redis:
//! score-then-member ordering for ranged scans, `LRANGE`-style negative
//! indexes, and lazy TTL expiry. Used by the test suite and for local
//! development.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Store, StoreError};

#[derive(Default)]
struct MemoryInner {
    zsets: HashMap<String, HashMap<String, f64>>,
    hashes: HashMap<String, HashMap<String, String>>,
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, HashSet<String>>,
    deadlines: HashMap<String, DateTime<Utc>>,
}

impl MemoryInner {
    fn drop_key(&mut self, key: &str) {
        self.zsets.remove(key);
        self.hashes.remove(key);
        self.lists.remove(key);
        self.sets.remove(key);
        self.deadlines.remove(key);
    }

    /// Removes keys whose TTL deadline has passed.
    fn purge_expired(&mut self) {
        let now = Utc::now();
        let expired: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.drop_key(&key);
        }
    }

    fn all_keys(&self) -> HashSet<String> {
        self.zsets
            .keys()
            .chain(self.hashes.keys())
            .chain(self.lists.keys())
            .chain(self.sets.keys())
            .cloned()
            .collect()
    }
}

/// In-memory store with Redis-equivalent semantics.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Matches a glob pattern where `*` stands for any run of characters.
fn glob_match(pattern: &str, key: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(after) => rest = after,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }

    true
}

/// Normalizes an `LRANGE`-style index against a list length.
fn normalize_index(index: isize, len: usize) -> isize {
    if index < 0 {
        index + len as isize
    } else {
        index
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.purge_expired();
        inner
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.purge_expired();

        let mut entries: Vec<(String, f64)> = inner
            .zsets
            .get(key)
            .map(|zset| {
                zset.iter()
                    .filter(|(_, score)| **score >= min && **score <= max)
                    .map(|(member, score)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default();

        // Ties order lexicographically by member, as in Redis.
        entries.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(entries.into_iter().map(|(member, _)| member).collect())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.purge_expired();
        Ok(inner
            .zsets
            .get_mut(key)
            .map(|zset| zset.remove(member).is_some())
            .unwrap_or(false))
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.purge_expired();
        Ok(inner.zsets.get(key).map(|zset| zset.len() as u64).unwrap_or(0))
    }

    async fn hset_fields(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.purge_expired();
        let hash = inner.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.purge_expired();
        Ok(inner
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.purge_expired();
        Ok(inner.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.purge_expired();
        let hash = inner.hashes.entry(key.to_string()).or_default();
        let current: i64 = hash
            .get(field)
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.purge_expired();
        inner
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.purge_expired();
        Ok(inner
            .lists
            .get_mut(key)
            .and_then(|list| {
                list.iter()
                    .position(|item| item == value)
                    .map(|pos| list.remove(pos))
            })
            .is_some())
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.purge_expired();

        let Some(list) = inner.lists.get(key) else {
            return Ok(Vec::new());
        };

        let len = list.len();
        let start = normalize_index(start, len).max(0) as usize;
        let stop = normalize_index(stop, len).min(len as isize - 1);
        if stop < 0 || start as isize > stop {
            return Ok(Vec::new());
        }

        Ok(list
            .iter()
            .skip(start)
            .take(stop as usize - start + 1)
            .cloned()
            .collect())
    }

    async fn llen(&self, key: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.purge_expired();
        Ok(inner.lists.get(key).map(|list| list.len() as u64).unwrap_or(0))
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.purge_expired();
        inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.purge_expired();
        Ok(inner
            .sets
            .get_mut(key)
            .map(|set| set.remove(member))
            .unwrap_or(false))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.purge_expired();
        Ok(inner
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.purge_expired();
        Ok(inner.sets.get(key).map(|set| set.len() as u64).unwrap_or(0))
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.purge_expired();
        let deadline = Utc::now() + chrono::Duration::seconds(ttl_seconds as i64);
        inner.deadlines.insert(key.to_string(), deadline);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.drop_key(key);
        Ok(())
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.purge_expired();
        let mut keys: Vec<String> = inner
            .all_keys()
            .into_iter()
            .filter(|key| glob_match(pattern, key))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zrange_orders_by_score_then_member() {
        let store = MemoryStore::new();
        store.zadd("z", "b", 2.0).await.unwrap();
        store.zadd("z", "c", 1.0).await.unwrap();
        store.zadd("z", "a", 2.0).await.unwrap();

        let members = store.zrange_by_score("z", 0.0, 10.0).await.unwrap();
        assert_eq!(members, vec!["c", "a", "b"]);

        let bounded = store.zrange_by_score("z", 0.0, 1.5).await.unwrap();
        assert_eq!(bounded, vec!["c"]);
    }

    #[tokio::test]
    async fn test_zrem_reports_presence_once() {
        let store = MemoryStore::new();
        store.zadd("z", "a", 1.0).await.unwrap();

        assert!(store.zrem("z", "a").await.unwrap());
        assert!(!store.zrem("z", "a").await.unwrap());
        assert_eq!(store.zcard("z").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_push_order_and_lrem() {
        let store = MemoryStore::new();
        store.lpush("l", "first").await.unwrap();
        store.lpush("l", "second").await.unwrap();

        // LPUSH puts the newest value at the head.
        let all = store.lrange("l", 0, -1).await.unwrap();
        assert_eq!(all, vec!["second", "first"]);
        assert_eq!(store.llen("l").await.unwrap(), 2);

        assert!(store.lrem("l", "first").await.unwrap());
        assert!(!store.lrem("l", "first").await.unwrap());
        assert_eq!(store.llen("l").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lrange_bounds() {
        let store = MemoryStore::new();
        for value in ["a", "b", "c"] {
            store.lpush("l", value).await.unwrap();
        }

        // list head-to-tail is c, b, a
        assert_eq!(store.lrange("l", 0, 0).await.unwrap(), vec!["c"]);
        assert_eq!(store.lrange("l", 1, -1).await.unwrap(), vec!["b", "a"]);
        assert!(store.lrange("l", 5, 9).await.unwrap().is_empty());
        assert!(store.lrange("missing", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hincr_creates_and_accumulates() {
        let store = MemoryStore::new();
        assert_eq!(store.hincr_by("h", "count", 1).await.unwrap(), 1);
        assert_eq!(store.hincr_by("h", "count", 2).await.unwrap(), 3);
        assert_eq!(store.hget("h", "count").await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_hset_fields_and_hgetall() {
        let store = MemoryStore::new();
        store
            .hset_fields(
                "h",
                &[
                    ("a".to_string(), "1".to_string()),
                    ("b".to_string(), "2".to_string()),
                ],
            )
            .await
            .unwrap();

        let map = store.hgetall("h").await.unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("b").map(String::as_str), Some("2"));
        assert!(store.hgetall("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_membership() {
        let store = MemoryStore::new();
        store.sadd("s", "a").await.unwrap();
        store.sadd("s", "a").await.unwrap();
        store.sadd("s", "b").await.unwrap();

        assert_eq!(store.scard("s").await.unwrap(), 2);
        assert!(store.srem("s", "a").await.unwrap());
        assert!(!store.srem("s", "a").await.unwrap());
        assert_eq!(store.smembers("s").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_scan_keys_glob() {
        let store = MemoryStore::new();
        store.sadd("app:processing:w1", "t").await.unwrap();
        store.sadd("app:processing:w2", "t").await.unwrap();
        store.lpush("app:dlq", "t").await.unwrap();
        store.lpush("other:dlq", "t").await.unwrap();

        let keys = store.scan_keys("app:processing:*").await.unwrap();
        assert_eq!(keys, vec!["app:processing:w1", "app:processing:w2"]);

        let all_app = store.scan_keys("app:*").await.unwrap();
        assert_eq!(all_app.len(), 3);

        let exact = store.scan_keys("app:dlq").await.unwrap();
        assert_eq!(exact, vec!["app:dlq"]);
    }

    #[tokio::test]
    async fn test_expire_drops_key() {
        let store = MemoryStore::new();
        store.sadd("s", "a").await.unwrap();
        store.expire("s", 0).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(store.scard("s").await.unwrap(), 0);
        assert!(store.scan_keys("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_del_removes_all_types() {
        let store = MemoryStore::new();
        store.zadd("k", "m", 1.0).await.unwrap();
        store.del("k").await.unwrap();
        assert_eq!(store.zcard("k").await.unwrap(), 0);
    }
}
