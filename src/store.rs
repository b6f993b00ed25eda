//! Counter store client shared by all admission strategies.
//!
//! Every strategy coordinates exclusively through this store; no admission
//! state is held in process memory across requests. Each operation is
//! atomic at the store, sequences of operations are not.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::time;
use tracing::debug;

use crate::error::{Error, Result};

/// Abstract capability over the shared key-value store.
///
/// Implementations must make each individual call atomic at the store.
/// Compound read-modify-write sequences built on top of these calls carry
/// no cross-call atomicity guarantee.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Increments the counter at `key`, creating it at 0 first if absent.
    /// Returns the post-increment value.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Sets `key` only if it does not exist. Returns whether the value was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Deletes all keys matching a glob pattern (`*` wildcards).
    async fn delete_by_pattern(&self, pattern: &str) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

/// Builds a namespaced store key: `<prefix>:<part>:<part>...`.
///
/// Components are sanitized so that path segments and identities cannot
/// collide with the `:` namespace separator.
pub fn store_key(prefix: &str, parts: &[&str]) -> String {
    let mut key = String::from(prefix);
    for part in parts {
        key.push(':');
        key.push_str(&sanitize_component(part));
    }
    key
}

/// Replaces characters that would break key namespacing or pattern matching.
pub fn sanitize_component(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Redis-backed counter store using a multiplexed async connection.
///
/// Every call is bounded by `op_timeout` and retried up to `retries` times
/// with a fixed backoff, so a slow store degrades request latency
/// predictably instead of unboundedly.
pub struct RedisStore {
    conn: MultiplexedConnection,
    op_timeout: Duration,
    retries: u32,
    backoff: Duration,
}

impl RedisStore {
    pub async fn connect(url: &str, op_timeout: Duration, retries: u32) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = time::timeout(
            Duration::from_secs(5),
            client.get_multiplexed_tokio_connection(),
        )
        .await
        .map_err(|_| Error::StoreTimeout(Duration::from_secs(5)))??;

        Ok(Self {
            conn,
            op_timeout,
            retries: retries.max(1),
            backoff: Duration::from_millis(50),
        })
    }

    async fn run<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut conn = self.conn.clone();
            let outcome = time::timeout(self.op_timeout, cmd.query_async::<_, T>(&mut conn)).await;

            let err = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => Error::Store(e.to_string()),
                Err(_) => Error::StoreTimeout(self.op_timeout),
            };

            if attempt >= self.retries {
                return Err(err);
            }

            debug!(attempt, error = %err, "store call failed, retrying");
            time::sleep(self.backoff).await;
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.run(redis::cmd("GET").arg(key)).await
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.run::<()>(redis::cmd("SETEX").arg(key).arg(ttl_secs(ttl)).arg(value))
            .await
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.run(redis::cmd("INCR").arg(key)).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let reply: Option<String> = self
            .run(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_secs(ttl)),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.run::<()>(redis::cmd("EXPIRE").arg(key).arg(ttl_secs(ttl)))
            .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.run::<()>(redis::cmd("DEL").arg(key)).await
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<()> {
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = self
                .run(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(100),
                )
                .await?;

            if !keys.is_empty() {
                let mut del = redis::cmd("DEL");
                for key in &keys {
                    del.arg(key);
                }
                self.run::<()>(&del).await?;
            }

            if next == 0 {
                return Ok(());
            }
            cursor = next;
        }
    }

    async fn ping(&self) -> Result<()> {
        self.run::<String>(&redis::cmd("PING")).await?;
        Ok(())
    }
}

/// In-memory counter store for local-only mode and tests.
///
/// Increments are atomic under the map lock, matching the per-operation
/// atomicity of the Redis store. TTLs are honored lazily on access.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().unwrap();
        let expired = entries.get(key).map(Entry::expired);
        match expired {
            Some(true) => {
                entries.remove(key);
                Ok(None)
            }
            Some(false) => Ok(entries.get(key).map(|e| e.value.clone())),
            None => Ok(None),
        }
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut entries = self.entries.lock().unwrap();
        let fresh = match entries.get(key) {
            Some(entry) if !entry.expired() => entry
                .value
                .parse::<i64>()
                .map_err(|_| Error::Store(format!("non-integer value at {key}")))?,
            _ => 0,
        };
        let next = fresh + 1;
        let expires_at = entries
            .get(key)
            .filter(|e| !e.expired())
            .and_then(|e| e.expires_at);
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        let present = entries.get(key).is_some_and(|e| !e.expired());
        if present {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|key, _| !glob_match(pattern, key));
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Matches a key against a glob pattern where `*` matches any substring.
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
                Some(r) => rest = r,
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn store_key_namespaces_components() {
        let key = store_key("gk", &["ratelimit", "fixed", "1.2.3.4", "/api/items"]);
        assert_eq!(key, "gk:ratelimit:fixed:1.2.3.4:_api_items");
    }

    #[test]
    fn sanitize_preserves_dots_and_dashes() {
        assert_eq!(sanitize_component("10.0.0.1"), "10.0.0.1");
        assert_eq!(sanitize_component("::1"), "__1");
        assert_eq!(sanitize_component("/api/x?y=1"), "_api_x_y_1");
    }

    #[test]
    fn glob_match_wildcards() {
        assert!(glob_match("gk:cache:*", "gk:cache:_api_items:"));
        assert!(glob_match("gk:ratelimit:*:1.2.3.4*", "gk:ratelimit:fixed:1.2.3.4:_api"));
        assert!(!glob_match("gk:ratelimit:*:1.2.3.4*", "gk:ratelimit:fixed:5.6.7.8:_api"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[tokio::test]
    async fn memory_store_roundtrip_and_expiry() {
        let store = MemoryStore::new();
        store
            .set_with_expiry("k", "v", Duration::from_millis(40))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_incr_creates_then_counts() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("c").await.unwrap(), 1);
        assert_eq!(store.incr("c").await.unwrap(), 2);
        store.delete("c").await.unwrap();
        assert_eq!(store.incr("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn memory_store_incr_is_atomic_across_tasks() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.incr("shared").await.unwrap() }));
        }

        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();
        let expected: Vec<i64> = (1..=50).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn memory_store_set_if_absent() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            assert!(store
                .set_if_absent("k", "1", Duration::from_secs(10))
                .await
                .unwrap());
            assert!(!store
                .set_if_absent("k", "2", Duration::from_secs(10))
                .await
                .unwrap());
            assert_eq!(store.get("k").await.unwrap(), Some("1".to_string()));
        });
    }

    #[tokio::test]
    async fn memory_store_delete_by_pattern() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(30);
        store.set_with_expiry("gk:cache:a", "1", ttl).await.unwrap();
        store.set_with_expiry("gk:cache:b", "2", ttl).await.unwrap();
        store
            .set_with_expiry("gk:ratelimit:fixed:ip:p", "3", ttl)
            .await
            .unwrap();

        store.delete_by_pattern("gk:cache:*").await.unwrap();

        assert_eq!(store.get("gk:cache:a").await.unwrap(), None);
        assert_eq!(store.get("gk:cache:b").await.unwrap(), None);
        assert!(store.get("gk:ratelimit:fixed:ip:p").await.unwrap().is_some());
    }
}
