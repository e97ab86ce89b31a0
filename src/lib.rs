pub mod admission;
pub mod cache;
pub mod clock;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod handlers;
pub mod health;
pub mod identity;
pub mod middleware;
pub mod rate_limit_config;
pub mod redis;
pub mod response;
pub mod server;
pub mod stats;
pub mod store;
pub mod token_bucket;
pub mod write_behind;

pub use admission::{AdmissionService, Decision};
pub use config::{AdmissionConfig, ServerConfig};
pub use error::{AdmissionError, Result};
pub use rate_limit_config::{PolicyTable, RateLimitPolicy};
pub use server::create_app;
pub use store::{BucketStore, InMemoryBucketStore};
