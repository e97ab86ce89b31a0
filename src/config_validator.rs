use crate::config::AdmissionConfig;
use crate::error::AdmissionError;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<(), AdmissionError> {
        if url.is_empty() {
            return Err(AdmissionError::InvalidConfig(
                "Redis URL cannot be empty".to_string(),
            ));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(AdmissionError::InvalidConfig(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates the admission engine settings and every policy in the table.
    pub fn validate_admission_config(config: &AdmissionConfig) -> Result<(), AdmissionError> {
        if config.max_cache_size == 0 {
            return Err(AdmissionError::InvalidConfig(
                "max_cache_size must be greater than 0".to_string(),
            ));
        }

        if config.cleanup_interval.is_zero() {
            return Err(AdmissionError::InvalidConfig(
                "cleanup_interval must be greater than 0".to_string(),
            ));
        }

        if config.record_ttl.as_secs() == 0 {
            return Err(AdmissionError::InvalidConfig(
                "record_ttl must be at least one second".to_string(),
            ));
        }

        if config.write_queue_capacity == 0 {
            return Err(AdmissionError::InvalidConfig(
                "write_queue_capacity must be greater than 0".to_string(),
            ));
        }

        config.policy_table().map(|_| ())
    }
}
