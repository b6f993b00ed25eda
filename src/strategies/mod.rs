//! Admission strategies.
//!
//! Each strategy is a decision function over (identity key, store state,
//! policy parameters, current time). All state lives in the shared counter
//! store; the current time is an explicit input so decisions are testable
//! without sleeping.
//!
//! Correctness varies by strategy and is part of each one's contract:
//! fixed-window decisions ride on a single atomic increment and are
//! race-free, while sliding-window, token-bucket, and cost-budget use
//! multi-step read-modify-write sequences and are best-effort under
//! concurrent access from multiple processes.

pub mod cost_budget;
pub mod fixed_window;
pub mod sliding_window;
pub mod token_bucket;

pub use cost_budget::CostBudget;
pub use fixed_window::FixedWindow;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;
use crate::store::CounterStore;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_BUDGET: &str = "x-ratelimit-budget";
pub const HEADER_USED: &str = "x-ratelimit-used";
pub const HEADER_COST: &str = "x-ratelimit-cost";

/// Outcome of an admission check.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub allowed: bool,
    /// Informational headers attached whether the request is admitted or not.
    pub headers: Vec<(&'static str, String)>,
    /// Seconds until a retry may succeed, set on rejection when known.
    pub retry_after: Option<u64>,
}

impl Verdict {
    pub fn admitted(headers: Vec<(&'static str, String)>) -> Self {
        Self {
            allowed: true,
            headers,
            retry_after: None,
        }
    }

    pub fn rejected(headers: Vec<(&'static str, String)>, retry_after: Option<u64>) -> Self {
        Self {
            allowed: false,
            headers,
            retry_after,
        }
    }
}

/// A per-endpoint admission algorithm consulting the shared counter store.
#[async_trait]
pub trait AdmissionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decides whether to admit one request for `identity` on `path`,
    /// mutating counter state in the store as a side effect.
    async fn admit(
        &self,
        store: &dyn CounterStore,
        identity: &str,
        path: &str,
        now_ms: u64,
    ) -> Result<Verdict>;
}

/// Decodes a stored integer value. Malformed values are logged and treated
/// as absent so state self-heals on the next write.
pub(crate) fn decode_int(raw: Option<String>, key: &str) -> Option<i64> {
    let raw = raw?;
    match raw.trim().parse::<i64>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "malformed stored counter value, treating as absent");
            None
        }
    }
}
