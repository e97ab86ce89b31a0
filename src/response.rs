use crate::admission::Decision;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Body returned for an admission check.
#[derive(Debug, Serialize)]
pub struct RateLimitResponse {
    pub allowed: bool,
    pub limit: u32,
    pub reset_time: Option<u64>,
    pub retry_after: Option<u64>,
}

impl RateLimitResponse {
    pub fn from_decision(decision: &Decision) -> Self {
        let retry_after = decision.retry_after.map(|wait| wait.as_secs());
        Self {
            allowed: decision.allowed,
            limit: decision.limit,
            reset_time: retry_after.map(|secs| unix_now() + secs),
            retry_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_denied_response_carries_retry_hint() {
        let decision = Decision {
            allowed: false,
            limit: 3,
            retry_after: Some(Duration::from_secs(42)),
        };
        let response = RateLimitResponse::from_decision(&decision);
        assert!(!response.allowed);
        assert_eq!(response.retry_after, Some(42));
        assert!(response.reset_time.unwrap() >= unix_now() + 41);
    }
}
