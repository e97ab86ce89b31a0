use crate::error::AdmissionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Capacity and refill window for one endpoint class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub capacity: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl RateLimitPolicy {
    /// Create a validated policy.
    pub fn new(capacity: u32, window: Duration) -> Result<Self, AdmissionError> {
        let policy = Self { capacity, window };
        policy.validate()?;
        Ok(policy)
    }

    /// Policy with `capacity` requests per `window_secs` seconds.
    pub fn per_seconds(capacity: u32, window_secs: u64) -> Result<Self, AdmissionError> {
        Self::new(capacity, Duration::from_secs(window_secs))
    }

    pub fn validate(&self) -> Result<(), AdmissionError> {
        if self.capacity == 0 {
            return Err(AdmissionError::InvalidPolicy(
                "capacity must be greater than 0".to_string(),
            ));
        }
        if self.window.as_millis() == 0 {
            return Err(AdmissionError::InvalidPolicy(
                "window must be at least one millisecond".to_string(),
            ));
        }
        Ok(())
    }

    pub fn window_millis(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Read-only prefix table mapping endpoints to policies.
///
/// Resolution is a longest-prefix match; anything that matches no prefix,
/// including the empty string, gets the default policy.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    // Sorted by prefix length, longest first.
    rules: Vec<(String, RateLimitPolicy)>,
    default_policy: RateLimitPolicy,
}

impl PolicyTable {
    /// Build a table, rejecting any non-positive policy.
    pub fn new(
        rules: impl IntoIterator<Item = (String, RateLimitPolicy)>,
        default_policy: RateLimitPolicy,
    ) -> Result<Self, AdmissionError> {
        default_policy.validate()?;

        let mut rules: Vec<(String, RateLimitPolicy)> = rules.into_iter().collect();
        for (prefix, policy) in &rules {
            if prefix.is_empty() {
                return Err(AdmissionError::InvalidPolicy(
                    "endpoint prefix cannot be empty".to_string(),
                ));
            }
            policy.validate().map_err(|e| {
                AdmissionError::InvalidPolicy(format!("{} (prefix '{}')", e, prefix))
            })?;
        }
        rules.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        Ok(Self {
            rules,
            default_policy,
        })
    }

    pub fn from_map(
        rules: &BTreeMap<String, RateLimitPolicy>,
        default_policy: RateLimitPolicy,
    ) -> Result<Self, AdmissionError> {
        Self::new(
            rules.iter().map(|(prefix, policy)| (prefix.clone(), *policy)),
            default_policy,
        )
    }

    /// Resolve the policy governing `endpoint`.
    pub fn resolve(&self, endpoint: &str) -> &RateLimitPolicy {
        if endpoint.is_empty() {
            return &self.default_policy;
        }
        self.rules
            .iter()
            .find(|(prefix, _)| endpoint.starts_with(prefix.as_str()))
            .map(|(_, policy)| policy)
            .unwrap_or(&self.default_policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(capacity: u32) -> RateLimitPolicy {
        RateLimitPolicy::per_seconds(capacity, 60).unwrap()
    }

    fn login_table() -> PolicyTable {
        PolicyTable::new(
            vec![
                ("/api/auth/login".to_string(), policy(5)),
                ("/api/auth".to_string(), policy(20)),
                ("/api/plaid".to_string(), policy(10)),
            ],
            policy(50),
        )
        .unwrap()
    }

    #[test]
    fn test_prefix_match() {
        let table = login_table();
        assert_eq!(table.resolve("/api/auth/login").capacity, 5);
        assert_eq!(table.resolve("/api/auth/login/extra").capacity, 5);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = login_table();
        assert_eq!(table.resolve("/api/auth/signup").capacity, 20);
        assert_eq!(table.resolve("/api/auth/login?next=/").capacity, 5);
    }

    #[test]
    fn test_fallback_to_default() {
        let table = login_table();
        assert_eq!(table.resolve("/api/unknown").capacity, 50);
        assert_eq!(table.resolve("").capacity, 50);
        assert_eq!(table.resolve("api/auth/login").capacity, 50);
    }

    #[test]
    fn test_rejects_non_positive_policies() {
        assert!(RateLimitPolicy::per_seconds(0, 60).is_err());
        assert!(RateLimitPolicy::new(10, Duration::ZERO).is_err());

        let zero_capacity = RateLimitPolicy {
            capacity: 0,
            window: Duration::from_secs(60),
        };
        assert!(PolicyTable::new(vec![("/api".to_string(), zero_capacity)], policy(1)).is_err());
        assert!(PolicyTable::new(Vec::new(), zero_capacity).is_err());
    }

    #[test]
    fn test_rejects_empty_prefix() {
        assert!(PolicyTable::new(vec![(String::new(), policy(1))], policy(1)).is_err());
    }

    #[test]
    fn test_policy_deserializes_humantime_window() {
        let parsed: RateLimitPolicy =
            serde_json::from_str(r#"{"capacity": 3, "window": "1m 30s"}"#).unwrap();
        assert_eq!(parsed.capacity, 3);
        assert_eq!(parsed.window, Duration::from_secs(90));
        assert_eq!(parsed.window_millis(), 90_000);
    }
}
