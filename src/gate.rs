//! Admission facade for metered operations.
//!
//! Composes the policy cache, the sliding-window limiter, and the monthly
//! quota tracker into the single call request handlers make before doing
//! expensive work: policy lookup, then the minute/hour/day windows in
//! order, then the monthly quota.

use std::sync::Arc;

use crate::config::{PolicyCache, RateLimitWindow};
use crate::limiter::{RateLimitDecision, RateLimiter};
use crate::quota::{QuotaResult, QuotaTracker};
use crate::store::DocumentStore;
use crate::types::{Limit, MeteredOperation};
use crate::Result;

/// Outcome of an admission check. Handlers map `RateLimited` to HTTP 429
/// and `QuotaExceeded` to 403/429 with the embedded reset metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Granted {
        /// Minute-window decision, when the policy limits that window.
        rate_limit: Option<RateLimitDecision>,
        quota: QuotaResult,
    },
    RateLimited(RateLimitDecision),
    QuotaExceeded(QuotaResult),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

/// One-stop admission control for request handlers.
pub struct MeteringGate {
    policies: Arc<PolicyCache>,
    limiter: RateLimiter,
    quotas: QuotaTracker,
}

impl MeteringGate {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let policies = Arc::new(PolicyCache::new(Arc::clone(&store)));
        Self::with_policies(store, policies)
    }

    /// Construct with a shared, pre-configured policy cache (e.g. a short
    /// TTL in tests, or one cache shared with other components).
    pub fn with_policies(store: Arc<dyn DocumentStore>, policies: Arc<PolicyCache>) -> Self {
        Self {
            limiter: RateLimiter::new(Arc::clone(&store)),
            quotas: QuotaTracker::new(store, Arc::clone(&policies)),
            policies,
        }
    }

    pub fn policies(&self) -> &Arc<PolicyCache> {
        &self.policies
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn quotas(&self) -> &QuotaTracker {
        &self.quotas
    }

    /// Decide admission for one request.
    ///
    /// The first rejecting window short-circuits before the quota counter
    /// is touched; quota denial still increments the counter (usage is
    /// tracked for observability even when enforcement rejects).
    pub async fn admit(
        &self,
        tenant_id: &str,
        operation: MeteredOperation,
        bypass: bool,
    ) -> Result<Admission> {
        let limits = self.policies.rate_limit_config(false).await;
        let op_limits = *limits.for_operation(operation);

        let mut minute_decision = None;
        for window in RateLimitWindow::ALL {
            let max = match op_limits.limit_for(window) {
                Limit::Unlimited => continue,
                Limit::Limited(max) => max,
            };
            let decision = self
                .limiter
                .check(tenant_id, operation, max, window.duration(), bypass)
                .await;
            if !decision.allowed {
                tracing::debug!(tenant_id, operation = %operation, ?window, "request rate limited");
                return Ok(Admission::RateLimited(decision));
            }
            minute_decision.get_or_insert(decision);
        }

        let quota = self.quotas.check(tenant_id, operation, bypass).await?;
        if !quota.allowed {
            tracing::debug!(tenant_id, operation = %operation, "monthly quota exceeded");
            return Ok(Admission::QuotaExceeded(quota));
        }

        Ok(Admission::Granted {
            rate_limit: minute_decision,
            quota,
        })
    }
}
