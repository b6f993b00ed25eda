//! Admission policy configuration.
//!
//! Policies are immutable once loaded. Misconfigured policies are rejected
//! at load time, never at request time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// A set of endpoint rules, typically decoded from a JSON policy file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySet {
    pub endpoints: Vec<EndpointRule>,
}

/// Maps a path pattern (regex) to an admission policy.
///
/// When `methods` is omitted the rule gates read methods (GET, HEAD) only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointRule {
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
    #[serde(flatten)]
    pub policy: Policy,
}

/// Parameters for one admission strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Policy {
    FixedWindow {
        requests_allowed: u64,
        #[serde(with = "humantime_serde")]
        window: Duration,
    },
    SlidingWindow {
        requests_allowed: u64,
        #[serde(with = "humantime_serde")]
        window: Duration,
    },
    TokenBucket {
        burst_capacity: i64,
        refill_rate: i64,
        #[serde(with = "humantime_serde")]
        refill_interval: Duration,
    },
    CostBudget {
        budget: u64,
        #[serde(with = "humantime_serde")]
        window: Duration,
        #[serde(default)]
        costs: HashMap<String, u64>,
        #[serde(default = "default_cost")]
        default_cost: u64,
    },
}

fn default_cost() -> u64 {
    1
}

impl Policy {
    pub fn strategy_name(&self) -> &'static str {
        match self {
            Policy::FixedWindow { .. } => "fixed_window",
            Policy::SlidingWindow { .. } => "sliding_window",
            Policy::TokenBucket { .. } => "token_bucket",
            Policy::CostBudget { .. } => "cost_budget",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Policy::FixedWindow {
                requests_allowed,
                window,
            }
            | Policy::SlidingWindow {
                requests_allowed,
                window,
            } => {
                if *requests_allowed == 0 {
                    return Err(Error::Policy("requests_allowed must be greater than 0".into()));
                }
                if window.is_zero() {
                    return Err(Error::Policy("window must be greater than 0".into()));
                }
            }
            Policy::TokenBucket {
                burst_capacity,
                refill_rate,
                refill_interval,
            } => {
                if *burst_capacity <= 0 {
                    return Err(Error::Policy("burst_capacity must be greater than 0".into()));
                }
                if *refill_rate <= 0 {
                    return Err(Error::Policy("refill_rate must be greater than 0".into()));
                }
                if refill_interval.is_zero() {
                    return Err(Error::Policy("refill_interval must be greater than 0".into()));
                }
            }
            Policy::CostBudget {
                budget,
                window,
                costs,
                default_cost,
            } => {
                if *budget == 0 {
                    return Err(Error::Policy("budget must be greater than 0".into()));
                }
                if window.is_zero() {
                    return Err(Error::Policy("window must be greater than 0".into()));
                }
                if *default_cost == 0 {
                    return Err(Error::Policy("default_cost must be greater than 0".into()));
                }
                if costs.values().any(|&c| c == 0) {
                    return Err(Error::Policy("cost table entries must be greater than 0".into()));
                }
            }
        }
        Ok(())
    }
}

impl PolicySet {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read policy file {}: {e}", path.display())))?;
        let set: PolicySet = serde_json::from_str(&raw)?;
        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> Result<()> {
        for rule in &self.endpoints {
            rule.policy.validate()?;
        }
        Ok(())
    }

    /// Built-in demo policies used when no policy file is configured.
    pub fn sample() -> Self {
        let mut report_costs = HashMap::new();
        report_costs.insert("/api/reports/heavy".to_string(), 30);

        Self {
            endpoints: vec![
                EndpointRule {
                    pattern: "^/api/items$".to_string(),
                    methods: None,
                    policy: Policy::FixedWindow {
                        requests_allowed: 100,
                        window: Duration::from_secs(60),
                    },
                },
                EndpointRule {
                    pattern: "^/api/search".to_string(),
                    methods: None,
                    policy: Policy::SlidingWindow {
                        requests_allowed: 30,
                        window: Duration::from_secs(30),
                    },
                },
                EndpointRule {
                    pattern: "^/api/items$".to_string(),
                    methods: Some(vec!["POST".to_string()]),
                    policy: Policy::TokenBucket {
                        burst_capacity: 10,
                        refill_rate: 2,
                        refill_interval: Duration::from_secs(5),
                    },
                },
                EndpointRule {
                    pattern: "^/api/reports".to_string(),
                    methods: None,
                    policy: Policy::CostBudget {
                        budget: 100,
                        window: Duration::from_secs(60),
                        costs: report_costs,
                        default_cost: 1,
                    },
                },
            ],
        }
    }
}

/// Path-prefix weight table backing the cost-budget strategy.
///
/// Lookup picks the longest matching prefix, falling back to the default.
#[derive(Debug, Clone)]
pub struct CostTable {
    costs: Vec<(String, u64)>,
    default_cost: u64,
}

impl CostTable {
    pub fn new(costs: &HashMap<String, u64>, default_cost: u64) -> Self {
        let mut costs: Vec<(String, u64)> = costs.iter().map(|(k, v)| (k.clone(), *v)).collect();
        costs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { costs, default_cost }
    }

    pub fn cost_for(&self, path: &str) -> u64 {
        self.costs
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, cost)| *cost)
            .unwrap_or(self.default_cost)
    }
}
