//! Token-bucket burst control.
//!
//! Each identity holds a capped pool of tokens that refills in whole
//! intervals. The read-compute-write sequence spans two keys and is not
//! atomic: concurrent requests from the same identity can read the same
//! pre-decrement token count and jointly over-consume. Suitable for soft
//! burst shaping, not hard quota enforcement.

use async_trait::async_trait;
use std::time::Duration;

use super::{decode_int, AdmissionStrategy, Verdict, HEADER_LIMIT, HEADER_REMAINING};
use crate::error::Result;
use crate::store::{store_key, CounterStore};

/// Safety net TTL so abandoned identities eventually vacate the store.
/// Refreshed on every write.
const SAFETY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct TokenBucket {
    prefix: String,
    burst_capacity: i64,
    refill_rate: i64,
    refill_interval: Duration,
}

impl TokenBucket {
    pub fn new(prefix: &str, burst_capacity: i64, refill_rate: i64, refill_interval: Duration) -> Self {
        Self {
            prefix: prefix.to_string(),
            burst_capacity,
            refill_rate,
            refill_interval,
        }
    }

    fn tokens_key(&self, identity: &str) -> String {
        store_key(&self.prefix, &["ratelimit", "bucket", identity, "tokens"])
    }

    fn refill_key(&self, identity: &str) -> String {
        store_key(&self.prefix, &["ratelimit", "bucket", identity, "refill"])
    }
}

#[async_trait]
impl AdmissionStrategy for TokenBucket {
    fn name(&self) -> &'static str {
        "token_bucket"
    }

    async fn admit(
        &self,
        store: &dyn CounterStore,
        identity: &str,
        _path: &str,
        now_ms: u64,
    ) -> Result<Verdict> {
        let tokens_key = self.tokens_key(identity);
        let refill_key = self.refill_key(identity);

        let mut tokens = match decode_int(store.get(&tokens_key).await?, &tokens_key) {
            Some(tokens) => tokens,
            None => {
                // Lazy creation: a new identity starts with a full bucket.
                store
                    .set_with_expiry(&tokens_key, &self.burst_capacity.to_string(), SAFETY_TTL)
                    .await?;
                self.burst_capacity
            }
        };

        let last_refill = match decode_int(store.get(&refill_key).await?, &refill_key) {
            Some(ts) => ts.max(0) as u64,
            None => {
                store
                    .set_with_expiry(&refill_key, &now_ms.to_string(), SAFETY_TTL)
                    .await?;
                now_ms
            }
        };

        let interval_ms = (self.refill_interval.as_millis() as u64).max(1);
        let intervals_elapsed = now_ms.saturating_sub(last_refill) / interval_ms;

        if intervals_elapsed > 0 {
            let refilled = tokens.saturating_add(intervals_elapsed as i64 * self.refill_rate);
            tokens = refilled.min(self.burst_capacity);
            store
                .set_with_expiry(&tokens_key, &tokens.to_string(), SAFETY_TTL)
                .await?;
            store
                .set_with_expiry(&refill_key, &now_ms.to_string(), SAFETY_TTL)
                .await?;
        }

        if tokens <= 0 {
            let headers = vec![
                (HEADER_LIMIT, self.burst_capacity.to_string()),
                (HEADER_REMAINING, "0".to_string()),
            ];
            return Ok(Verdict::rejected(
                headers,
                Some(self.refill_interval.as_secs()),
            ));
        }

        tokens -= 1;
        store
            .set_with_expiry(&tokens_key, &tokens.to_string(), SAFETY_TTL)
            .await?;

        let headers = vec![
            (HEADER_LIMIT, self.burst_capacity.to_string()),
            (HEADER_REMAINING, tokens.to_string()),
        ];
        Ok(Verdict::admitted(headers))
    }
}
