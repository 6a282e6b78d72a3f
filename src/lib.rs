//! # tenant-metering
//!
//! Per-tenant monthly quota and sliding-window rate-limit tracking for
//! metered SaaS operations, over a transactional document store.
//!
//! The crate is a library consumed by request handlers: before doing the
//! expensive work (bill analysis, report generation) a handler asks the
//! [`MeteringGate`] for admission and branches on the typed result. Limit
//! exhaustion is never an error; configuration or storage hiccups never
//! block traffic.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tenant_metering::{Admission, MemoryStore, MeteredOperation, MeteringGate};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tenant_metering::Error> {
//!     let store = Arc::new(MemoryStore::new());
//!     let gate = MeteringGate::new(store);
//!
//!     match gate.admit("tenant-1", MeteredOperation::BillAnalysis, false).await? {
//!         Admission::Granted { .. } => { /* run the expensive operation */ }
//!         Admission::RateLimited(decision) => {
//!             println!("try again at {}", decision.reset_at);
//!         }
//!         Admission::QuotaExceeded(quota) => {
//!             println!("{} of {} used this month", quota.current, quota.limit.as_i64());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod gate;
pub mod limiter;
pub mod quota;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use config::{
    CacheStatus, DEFAULT_CACHE_TTL, OperationRateLimits, PolicyCache, QuotaConfig,
    RateLimitConfig, RateLimitWindow, TierQuotas,
};
pub use gate::{Admission, MeteringGate};
pub use limiter::{RateLimitDecision, RateLimitRecord, RateLimiter};
pub use quota::{MonthlyUsage, QuotaResult, QuotaTracker, current_period_bounds};
pub use store::{DocumentStore, MemoryStore, StoreError, StoreResult, Tx, VersionedDoc, transact};
#[cfg(feature = "postgres")]
pub use store::PostgresStore;
pub use types::{Limit, MeteredOperation, SubscriptionTier};

/// Error type for metering operations.
///
/// Deliberately narrow: being over a limit is a typed result, not an
/// error, and configuration unavailability is absorbed by the policy
/// cache. What remains is storage failures and tenant-provisioning bugs.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The tenant document does not exist. Indicates a provisioning bug
    /// upstream, not a transient condition.
    #[error("Tenant not found: {tenant_id}")]
    TenantNotFound { tenant_id: String },

    /// Monthly usage data missing where it was expected to exist.
    #[error("Monthly usage data not initialized for tenant {tenant_id}")]
    UsageNotInitialized { tenant_id: String },

    /// Document store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error may succeed on retry (storage conflicts and
    /// backend failures, as opposed to provisioning bugs).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::TenantNotFound {
            tenant_id: "acme".to_string(),
        };
        assert!(err.to_string().contains("acme"));
    }

    #[test]
    fn test_store_error_conversion() {
        let store_err = store::StoreError::Backend {
            message: "connection refused".to_string(),
        };
        let err: Error = store_err.into();
        assert!(matches!(err, Error::Store(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_tenant_not_found_is_not_retryable() {
        let err = Error::TenantNotFound {
            tenant_id: "ghost".to_string(),
        };
        assert!(!err.is_retryable());
    }
}
