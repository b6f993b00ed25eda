use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Body returned when a request is throttled or the decision cannot be made.
#[derive(Debug, Serialize)]
pub struct RejectionBody {
    pub error: &'static str,
    pub message: &'static str,
}

impl RejectionBody {
    pub fn rate_limited() -> Self {
        Self {
            error: "rate_limit_exceeded",
            message: "Rate limit exceeded. Please try again later.",
        }
    }

    pub fn admission_failed() -> Self {
        Self {
            error: "admission_check_failed",
            message: "Unable to evaluate the rate limit for this request.",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub timestamp: u64,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub store: StoreStatus,
}

#[derive(Debug, Serialize)]
pub struct StoreStatus {
    pub status: &'static str,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthBody {
    pub fn new(uptime_seconds: u64, store: StoreStatus) -> Self {
        let status = if store.status == "healthy" {
            "healthy"
        } else {
            "degraded"
        };

        Self {
            status,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION"),
            uptime_seconds,
            store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_when_store_is_down() {
        let body = HealthBody::new(
            10,
            StoreStatus {
                status: "unavailable",
                response_time_ms: 3,
                error: Some("connection refused".to_string()),
            },
        );
        assert_eq!(body.status, "degraded");

        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("unavailable"));
        assert!(json.contains("connection refused"));
    }

    #[test]
    fn healthy_store_omits_error_field() {
        let body = HealthBody::new(
            10,
            StoreStatus {
                status: "healthy",
                response_time_ms: 1,
                error: None,
            },
        );
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(body.status, "healthy");
        assert!(!json.contains("error"));
    }
}
