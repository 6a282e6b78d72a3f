//! Sliding-window rate limiting per tenant and operation.

pub mod sliding;

pub use sliding::{RATE_LIMIT_COLLECTION, RateLimitDecision, RateLimitRecord, RateLimiter};
