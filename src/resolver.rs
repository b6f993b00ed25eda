//! Endpoint policy resolver.
//!
//! Compiles the static policy configuration into per-rule strategy values
//! and answers, per request, which strategy (if any) gates it. First
//! matching rule wins. Rules without an explicit method list gate read
//! methods only.

use axum::http::Method;
use regex::Regex;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::policy::{CostTable, Policy, PolicySet};
use crate::strategies::{AdmissionStrategy, CostBudget, FixedWindow, SlidingWindow, TokenBucket};

pub struct PolicyResolver {
    routes: Vec<Route>,
}

pub struct Route {
    pattern: Regex,
    methods: Option<Vec<Method>>,
    strategy: Arc<dyn AdmissionStrategy>,
}

impl Route {
    pub fn strategy(&self) -> &dyn AdmissionStrategy {
        self.strategy.as_ref()
    }

    fn gates(&self, method: &Method) -> bool {
        match &self.methods {
            Some(methods) => methods.contains(method),
            None => matches!(*method, Method::GET | Method::HEAD),
        }
    }
}

impl PolicyResolver {
    pub fn from_policy_set(prefix: &str, set: &PolicySet) -> Result<Self> {
        let mut routes = Vec::with_capacity(set.endpoints.len());

        for rule in &set.endpoints {
            rule.policy.validate()?;

            let pattern = Regex::new(&rule.pattern).map_err(|e| {
                Error::Config(format!("invalid endpoint pattern {:?}: {e}", rule.pattern))
            })?;

            let methods = match &rule.methods {
                Some(names) => {
                    let mut methods = Vec::with_capacity(names.len());
                    for name in names {
                        let method = name.parse::<Method>().map_err(|_| {
                            Error::Config(format!("invalid HTTP method {name:?}"))
                        })?;
                        methods.push(method);
                    }
                    Some(methods)
                }
                None => None,
            };

            let strategy: Arc<dyn AdmissionStrategy> = match &rule.policy {
                Policy::FixedWindow {
                    requests_allowed,
                    window,
                } => Arc::new(FixedWindow::new(prefix, *requests_allowed, *window)),
                Policy::SlidingWindow {
                    requests_allowed,
                    window,
                } => Arc::new(SlidingWindow::new(prefix, *requests_allowed, *window)),
                Policy::TokenBucket {
                    burst_capacity,
                    refill_rate,
                    refill_interval,
                } => Arc::new(TokenBucket::new(
                    prefix,
                    *burst_capacity,
                    *refill_rate,
                    *refill_interval,
                )),
                Policy::CostBudget {
                    budget,
                    window,
                    costs,
                    default_cost,
                } => Arc::new(CostBudget::new(
                    prefix,
                    *budget,
                    *window,
                    CostTable::new(costs, *default_cost),
                )),
            };

            routes.push(Route {
                pattern,
                methods,
                strategy,
            });
        }

        Ok(Self { routes })
    }

    /// Finds the first rule gating this method and path, if any.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|route| route.gates(method) && route.pattern.is_match(path))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::EndpointRule;
    use std::time::Duration;

    fn fixed_rule(pattern: &str, methods: Option<Vec<String>>) -> EndpointRule {
        EndpointRule {
            pattern: pattern.to_string(),
            methods,
            policy: Policy::FixedWindow {
                requests_allowed: 10,
                window: Duration::from_secs(60),
            },
        }
    }

    #[test]
    fn resolves_matching_path_for_read_methods_by_default() {
        let set = PolicySet {
            endpoints: vec![fixed_rule("^/api/items$", None)],
        };
        let resolver = PolicyResolver::from_policy_set("t", &set).unwrap();

        assert!(resolver.resolve(&Method::GET, "/api/items").is_some());
        assert!(resolver.resolve(&Method::HEAD, "/api/items").is_some());
        assert!(resolver.resolve(&Method::POST, "/api/items").is_none());
        assert!(resolver.resolve(&Method::GET, "/api/other").is_none());
    }

    #[test]
    fn explicit_method_list_overrides_the_default() {
        let set = PolicySet {
            endpoints: vec![fixed_rule("^/api/items$", Some(vec!["POST".to_string()]))],
        };
        let resolver = PolicyResolver::from_policy_set("t", &set).unwrap();

        assert!(resolver.resolve(&Method::POST, "/api/items").is_some());
        assert!(resolver.resolve(&Method::GET, "/api/items").is_none());
    }

    #[test]
    fn first_matching_rule_wins() {
        let set = PolicySet {
            endpoints: vec![
                fixed_rule("^/api/items$", None),
                EndpointRule {
                    pattern: "^/api/".to_string(),
                    methods: None,
                    policy: Policy::SlidingWindow {
                        requests_allowed: 5,
                        window: Duration::from_secs(30),
                    },
                },
            ],
        };
        let resolver = PolicyResolver::from_policy_set("t", &set).unwrap();

        let route = resolver.resolve(&Method::GET, "/api/items").unwrap();
        assert_eq!(route.strategy().name(), "fixed_window");

        let route = resolver.resolve(&Method::GET, "/api/search").unwrap();
        assert_eq!(route.strategy().name(), "sliding_window");
    }

    #[test]
    fn invalid_pattern_rejected_at_load() {
        let set = PolicySet {
            endpoints: vec![fixed_rule("^/api/(items$", None)],
        };
        assert!(PolicyResolver::from_policy_set("t", &set).is_err());
    }

    #[test]
    fn invalid_method_rejected_at_load() {
        let set = PolicySet {
            endpoints: vec![fixed_rule("^/api/items$", Some(vec!["NOT A METHOD".to_string()]))],
        };
        assert!(PolicyResolver::from_policy_set("t", &set).is_err());
    }

    #[test]
    fn invalid_policy_rejected_at_load() {
        let set = PolicySet {
            endpoints: vec![EndpointRule {
                pattern: "^/api/".to_string(),
                methods: None,
                policy: Policy::FixedWindow {
                    requests_allowed: 0,
                    window: Duration::from_secs(60),
                },
            }],
        };
        assert!(PolicyResolver::from_policy_set("t", &set).is_err());
    }

    #[test]
    fn sample_policy_set_compiles() {
        let resolver = PolicyResolver::from_policy_set("t", &PolicySet::sample()).unwrap();
        assert!(!resolver.is_empty());
    }
}
