//! Fixed-window counting.
//!
//! The atomic increment is the sole authority for the admit decision, so
//! concurrent requests never under-count. This is the only strategy whose
//! verdict is race-free across processes.

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use super::{AdmissionStrategy, Verdict, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET};
use crate::error::Result;
use crate::store::{store_key, CounterStore};

pub struct FixedWindow {
    prefix: String,
    requests_allowed: u64,
    window: Duration,
}

impl FixedWindow {
    pub fn new(prefix: &str, requests_allowed: u64, window: Duration) -> Self {
        Self {
            prefix: prefix.to_string(),
            requests_allowed,
            window,
        }
    }

    fn counter_key(&self, identity: &str, path: &str) -> String {
        store_key(&self.prefix, &["ratelimit", "fixed", identity, path])
    }
}

#[async_trait]
impl AdmissionStrategy for FixedWindow {
    fn name(&self) -> &'static str {
        "fixed_window"
    }

    async fn admit(
        &self,
        store: &dyn CounterStore,
        identity: &str,
        path: &str,
        now_ms: u64,
    ) -> Result<Verdict> {
        let key = self.counter_key(identity, path);
        let count = store.incr(&key).await?;

        if count == 1 {
            // This call created the key. The expiry is best-effort: a crash
            // between increment and expire leaves a counter without a TTL,
            // which is accepted rather than corrected.
            if let Err(err) = store.expire(&key, self.window).await {
                warn!(key = %key, error = %err, "failed to set window expiry");
            }
        }

        let count = count.max(0) as u64;
        let remaining = self.requests_allowed.saturating_sub(count);
        let reset = (now_ms + self.window.as_millis() as u64) / 1000;

        let headers = vec![
            (HEADER_LIMIT, self.requests_allowed.to_string()),
            (HEADER_REMAINING, remaining.to_string()),
            (HEADER_RESET, reset.to_string()),
        ];

        if count <= self.requests_allowed {
            Ok(Verdict::admitted(headers))
        } else {
            Ok(Verdict::rejected(headers, Some(self.window.as_secs())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    const NOW: u64 = 1_700_000_000_000;

    #[tokio::test]
    async fn admits_up_to_limit_then_rejects() {
        let store = MemoryStore::new();
        let strategy = FixedWindow::new("t", 3, Duration::from_secs(60));

        for i in 1..=3 {
            let verdict = strategy.admit(&store, "1.2.3.4", "/api", NOW).await.unwrap();
            assert!(verdict.allowed, "request {i} should be admitted");
        }

        let verdict = strategy.admit(&store, "1.2.3.4", "/api", NOW).await.unwrap();
        assert!(!verdict.allowed);
        assert_eq!(verdict.retry_after, Some(60));
    }

    #[tokio::test]
    async fn exactly_min_n_k_admitted_under_concurrency() {
        let store = Arc::new(MemoryStore::new());
        let strategy = Arc::new(FixedWindow::new("t", 5, Duration::from_secs(60)));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            let strategy = strategy.clone();
            handles.push(tokio::spawn(async move {
                strategy
                    .admit(store.as_ref(), "1.2.3.4", "/api", NOW)
                    .await
                    .unwrap()
                    .allowed
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn remaining_header_counts_down_and_floors_at_zero() {
        let store = MemoryStore::new();
        let strategy = FixedWindow::new("t", 2, Duration::from_secs(60));

        let first = strategy.admit(&store, "ip", "/p", NOW).await.unwrap();
        let remaining = first
            .headers
            .iter()
            .find(|(name, _)| *name == HEADER_REMAINING)
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(remaining, "1");

        strategy.admit(&store, "ip", "/p", NOW).await.unwrap();
        let third = strategy.admit(&store, "ip", "/p", NOW).await.unwrap();
        let remaining = third
            .headers
            .iter()
            .find(|(name, _)| *name == HEADER_REMAINING)
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(remaining, "0");
    }

    #[tokio::test]
    async fn window_elapse_resets_the_count() {
        let store = MemoryStore::new();
        let strategy = FixedWindow::new("t", 1, Duration::from_millis(80));

        assert!(strategy.admit(&store, "ip", "/p", NOW).await.unwrap().allowed);
        assert!(!strategy.admit(&store, "ip", "/p", NOW).await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(120)).await;

        let verdict = strategy.admit(&store, "ip", "/p", NOW).await.unwrap();
        assert!(verdict.allowed, "fresh window should admit again");
    }

    #[tokio::test]
    async fn identities_are_counted_separately() {
        let store = MemoryStore::new();
        let strategy = FixedWindow::new("t", 1, Duration::from_secs(60));

        assert!(strategy.admit(&store, "a", "/p", NOW).await.unwrap().allowed);
        assert!(!strategy.admit(&store, "a", "/p", NOW).await.unwrap().allowed);
        assert!(strategy.admit(&store, "b", "/p", NOW).await.unwrap().allowed);
    }
}
