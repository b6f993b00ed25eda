//! Sliding-window approximation.
//!
//! Tracks a counter plus the instant of the last window reset in two
//! separate keys. The rollover (read timestamp, delete counter, rewrite
//! timestamp) is not atomic across the two keys: concurrent requests
//! straddling the boundary can each observe an expired window and each
//! reset it, temporarily under-counting. This is an approximate window,
//! not a strict sliding log, and the gap is bounded by one window.

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use super::{
    decode_int, AdmissionStrategy, Verdict, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET,
};
use crate::error::Result;
use crate::store::{store_key, CounterStore};

pub struct SlidingWindow {
    prefix: String,
    requests_allowed: u64,
    window: Duration,
}

impl SlidingWindow {
    pub fn new(prefix: &str, requests_allowed: u64, window: Duration) -> Self {
        Self {
            prefix: prefix.to_string(),
            requests_allowed,
            window,
        }
    }

    fn count_key(&self, identity: &str, path: &str) -> String {
        store_key(&self.prefix, &["ratelimit", "sliding", identity, path, "count"])
    }

    fn ts_key(&self, identity: &str, path: &str) -> String {
        store_key(&self.prefix, &["ratelimit", "sliding", identity, path, "ts"])
    }
}

#[async_trait]
impl AdmissionStrategy for SlidingWindow {
    fn name(&self) -> &'static str {
        "sliding_window"
    }

    async fn admit(
        &self,
        store: &dyn CounterStore,
        identity: &str,
        path: &str,
        now_ms: u64,
    ) -> Result<Verdict> {
        let window_ms = self.window.as_millis() as u64;
        let count_key = self.count_key(identity, path);
        let ts_key = self.ts_key(identity, path);

        let last_reset = match decode_int(store.get(&ts_key).await?, &ts_key) {
            Some(ts) => ts.max(0) as u64,
            None => {
                store
                    .set_with_expiry(&ts_key, &now_ms.to_string(), self.window)
                    .await?;
                now_ms
            }
        };

        // Window rollover: two writes on two keys, no cross-key atomicity.
        let last_reset = if now_ms.saturating_sub(last_reset) > window_ms {
            store.delete(&count_key).await?;
            store
                .set_with_expiry(&ts_key, &now_ms.to_string(), self.window)
                .await?;
            now_ms
        } else {
            last_reset
        };

        let count = store.incr(&count_key).await?;
        if count == 1 {
            if let Err(err) = store.expire(&count_key, self.window).await {
                warn!(key = %count_key, error = %err, "failed to set window expiry");
            }
        }

        let count = count.max(0) as u64;
        let remaining_ms = window_ms.saturating_sub(now_ms.saturating_sub(last_reset));
        let reset = (now_ms + remaining_ms) / 1000;

        let headers = vec![
            (HEADER_LIMIT, self.requests_allowed.to_string()),
            (
                HEADER_REMAINING,
                self.requests_allowed.saturating_sub(count).to_string(),
            ),
            (HEADER_RESET, reset.to_string()),
        ];

        if count <= self.requests_allowed {
            Ok(Verdict::admitted(headers))
        } else {
            Ok(Verdict::rejected(headers, Some(remaining_ms / 1000)))
        }
    }
}
