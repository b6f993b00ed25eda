//! Cost-weighted budget.
//!
//! Each request consumes a path-dependent amount of a shared numeric
//! allowance. Unlike the window strategies, the budget is charged only on
//! admission: a rejected request leaves `used` untouched. The read-then-
//! write of `used` is not atomic, so concurrent same-identity requests can
//! jointly overspend the budget; documented best-effort.

use async_trait::async_trait;
use std::time::Duration;

use super::{
    decode_int, AdmissionStrategy, Verdict, HEADER_BUDGET, HEADER_COST, HEADER_REMAINING,
    HEADER_USED,
};
use crate::error::Result;
use crate::policy::CostTable;
use crate::store::{store_key, CounterStore};

pub struct CostBudget {
    prefix: String,
    budget: u64,
    window: Duration,
    costs: CostTable,
}

impl CostBudget {
    pub fn new(prefix: &str, budget: u64, window: Duration, costs: CostTable) -> Self {
        Self {
            prefix: prefix.to_string(),
            budget,
            window,
            costs,
        }
    }

    fn budget_key(&self, identity: &str) -> String {
        store_key(&self.prefix, &["ratelimit", "cost", identity])
    }
}

#[async_trait]
impl AdmissionStrategy for CostBudget {
    fn name(&self) -> &'static str {
        "cost_budget"
    }

    async fn admit(
        &self,
        store: &dyn CounterStore,
        identity: &str,
        path: &str,
        _now_ms: u64,
    ) -> Result<Verdict> {
        let key = self.budget_key(identity);

        let used = match decode_int(store.get(&key).await?, &key) {
            Some(used) => used.max(0) as u64,
            None => {
                store.set_with_expiry(&key, "0", self.window).await?;
                0
            }
        };

        let cost = self.costs.cost_for(path);

        if used + cost > self.budget {
            let headers = vec![
                (HEADER_BUDGET, self.budget.to_string()),
                (HEADER_USED, used.to_string()),
                (HEADER_COST, cost.to_string()),
            ];
            return Ok(Verdict::rejected(headers, None));
        }

        let used = used + cost;
        store
            .set_with_expiry(&key, &used.to_string(), self.window)
            .await?;

        let headers = vec![
            (HEADER_BUDGET, self.budget.to_string()),
            (HEADER_USED, used.to_string()),
            (HEADER_REMAINING, (self.budget - used).to_string()),
        ];
        Ok(Verdict::admitted(headers))
    }
}
