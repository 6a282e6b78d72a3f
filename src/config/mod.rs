//! Tiered metering policy: tables, defaults, and the process-local cache.

pub mod cache;
pub mod policy;

pub use cache::{CacheStatus, DEFAULT_CACHE_TTL, PolicyCache};
pub use policy::{OperationRateLimits, QuotaConfig, RateLimitConfig, RateLimitWindow, TierQuotas};
