//! Monthly quota tracking per tenant.
//!
//! Counters live in the tenant document's `monthlyUsage` block; nothing
//! else in that document is ever written by this module. Period
//! reconciliation, the usage increment, and the admission decision all run
//! inside one optimistic transaction, so concurrent checks at the limit
//! boundary are serialized by the store's compare-and-swap.
//!
//! The counter is incremented even for bypassed, unlimited, and over-cap
//! requests: quota tracking is for observability as well as enforcement.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::period::current_period_bounds;
use crate::config::PolicyCache;
use crate::store::{DocumentStore, StoreError, Tx, transact};
use crate::types::{Limit, MeteredOperation, SubscriptionTier};
use crate::{Error, Result};

pub const TENANT_COLLECTION: &str = "tenants";

const USAGE_FIELD: &str = "monthlyUsage";
const TIER_FIELD: &str = "subscriptionTier";

/// Embedded per-tenant usage block for the current calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyUsage {
    pub bill_analysis_count: u64,
    pub report_generation_count: u64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub last_reset: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MonthlyUsage {
    /// Zeroed block bounded to the month containing `now`.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        let (period_start, period_end) = current_period_bounds(now);
        Self {
            bill_analysis_count: 0,
            report_generation_count: 0,
            period_start,
            period_end,
            last_reset: now,
            updated_at: now,
        }
    }

    pub fn count(&self, operation: MeteredOperation) -> u64 {
        match operation {
            MeteredOperation::BillAnalysis => self.bill_analysis_count,
            MeteredOperation::ReportGeneration => self.report_generation_count,
        }
    }

    fn count_mut(&mut self, operation: MeteredOperation) -> &mut u64 {
        match operation {
            MeteredOperation::BillAnalysis => &mut self.bill_analysis_count,
            MeteredOperation::ReportGeneration => &mut self.report_generation_count,
        }
    }
}

/// Outcome of a quota check or status read.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaResult {
    pub allowed: bool,
    /// Usage count after this call (post-increment for checks).
    pub current: u64,
    pub limit: Limit,
    pub remaining: Limit,
    pub percent_used: f64,
}

/// Calendar-month usage tracker over the tenant collection.
pub struct QuotaTracker {
    store: Arc<dyn DocumentStore>,
    policies: Arc<PolicyCache>,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn DocumentStore>, policies: Arc<PolicyCache>) -> Self {
        Self { store, policies }
    }

    /// Atomic check-and-increment for one metered operation.
    ///
    /// A missing tenant document is a provisioning bug upstream and fails
    /// loud with [`Error::TenantNotFound`]; being over cap is a normal,
    /// typed result.
    pub async fn check(
        &self,
        tenant_id: &str,
        operation: MeteredOperation,
        bypass: bool,
    ) -> Result<QuotaResult> {
        let quotas = self.policies.quota_config(false).await;
        let now = Utc::now();
        let (period_start, _) = current_period_bounds(now);

        transact::<_, Error, _>(self.store.as_ref(), TENANT_COLLECTION, tenant_id, |doc| {
            let data = doc.ok_or_else(|| Error::TenantNotFound {
                tenant_id: tenant_id.to_string(),
            })?;
            let tier = tier_of(data, tenant_id);

            let mut usage = match parse_usage(data) {
                Some(usage) if usage.period_start >= period_start => usage,
                stale => {
                    if stale.is_some() {
                        tracing::debug!(tenant_id, "quota period rolled over");
                    }
                    MonthlyUsage::fresh(now)
                }
            };

            let pre_count = usage.count(operation);
            *usage.count_mut(operation) += 1;
            usage.updated_at = now;
            let current = pre_count + 1;

            let limit = quotas.monthly_limit(tier, operation);
            let result = match limit {
                _ if bypass || limit.is_unlimited() => QuotaResult {
                    allowed: true,
                    current,
                    limit: Limit::Unlimited,
                    remaining: Limit::Unlimited,
                    percent_used: 0.0,
                },
                Limit::Limited(max) if pre_count >= u64::from(max) => QuotaResult {
                    allowed: false,
                    current,
                    limit,
                    remaining: Limit::Limited(0),
                    percent_used: 100.0,
                },
                Limit::Limited(max) => QuotaResult {
                    allowed: true,
                    current,
                    limit,
                    remaining: Limit::Limited(max.saturating_sub(current as u32)),
                    percent_used: (current as f64 / f64::from(max)) * 100.0,
                },
                Limit::Unlimited => unreachable!("handled by the bypass arm"),
            };

            Ok(Tx::Write(with_usage(data, &usage)?, result))
        })
        .await
    }

    /// Read-only quota inspection: same limit resolution and period-ensure
    /// logic as [`check`](Self::check), but counters are never incremented.
    pub async fn status(&self, tenant_id: &str, operation: MeteredOperation) -> Result<QuotaResult> {
        self.ensure_current_month(tenant_id).await?;
        let quotas = self.policies.quota_config(false).await;

        let doc = self
            .store
            .get(TENANT_COLLECTION, tenant_id)
            .await?
            .ok_or_else(|| Error::TenantNotFound {
                tenant_id: tenant_id.to_string(),
            })?;
        let tier = tier_of(&doc.data, tenant_id);
        let usage = parse_usage(&doc.data).ok_or_else(|| Error::UsageNotInitialized {
            tenant_id: tenant_id.to_string(),
        })?;

        let current = usage.count(operation);
        Ok(match quotas.monthly_limit(tier, operation) {
            Limit::Unlimited => QuotaResult {
                allowed: true,
                current,
                limit: Limit::Unlimited,
                remaining: Limit::Unlimited,
                percent_used: 0.0,
            },
            Limit::Limited(max) => QuotaResult {
                allowed: current < u64::from(max),
                current,
                limit: Limit::Limited(max),
                remaining: Limit::Limited(max.saturating_sub(current as u32)),
                percent_used: if max == 0 {
                    100.0
                } else {
                    ((current as f64 / f64::from(max)) * 100.0).min(100.0)
                },
            },
        })
    }

    /// Reconcile the tenant's usage block with the current calendar month.
    ///
    /// Runs before every quota decision so no check operates on
    /// stale-period data. Writes only when the block is missing or its
    /// period predates the current month; idempotent within a month.
    pub async fn ensure_current_month(&self, tenant_id: &str) -> Result<()> {
        let now = Utc::now();
        let (period_start, _) = current_period_bounds(now);

        transact::<_, Error, _>(self.store.as_ref(), TENANT_COLLECTION, tenant_id, |doc| {
            let data = doc.ok_or_else(|| Error::TenantNotFound {
                tenant_id: tenant_id.to_string(),
            })?;
            match parse_usage(data) {
                Some(usage) if usage.period_start >= period_start => Ok(Tx::Skip(())),
                stale => {
                    if stale.is_some() {
                        tracing::debug!(tenant_id, "quota period rolled over");
                    }
                    Ok(Tx::Write(with_usage(data, &MonthlyUsage::fresh(now))?, ()))
                }
            }
        })
        .await
    }

    /// Administrative: force a fresh zeroed period regardless of the date.
    pub async fn reset(&self, tenant_id: &str) -> Result<()> {
        let now = Utc::now();
        transact::<_, Error, _>(self.store.as_ref(), TENANT_COLLECTION, tenant_id, |doc| {
            let data = doc.ok_or_else(|| Error::TenantNotFound {
                tenant_id: tenant_id.to_string(),
            })?;
            Ok(Tx::Write(with_usage(data, &MonthlyUsage::fresh(now))?, ()))
        })
        .await?;
        tracing::info!(tenant_id, "monthly quota reset");
        Ok(())
    }

    /// Idempotent provisioning hook for new tenants.
    pub async fn initialize(&self, tenant_id: &str) -> Result<()> {
        self.ensure_current_month(tenant_id).await
    }
}

fn tier_of(data: &Value, tenant_id: &str) -> SubscriptionTier {
    match data.get(TIER_FIELD) {
        Some(value) => match serde_json::from_value(value.clone()) {
            Ok(tier) => tier,
            Err(e) => {
                tracing::warn!(tenant_id, error = %e, "unrecognized subscription tier, treating as trial");
                SubscriptionTier::Trial
            }
        },
        None => {
            tracing::warn!(tenant_id, "tenant document has no subscription tier, treating as trial");
            SubscriptionTier::Trial
        }
    }
}

fn parse_usage(data: &Value) -> Option<MonthlyUsage> {
    data.get(USAGE_FIELD)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

/// Tenant document with only its `monthlyUsage` field replaced.
fn with_usage(data: &Value, usage: &MonthlyUsage) -> Result<Value> {
    let mut doc = data.clone();
    let map = doc.as_object_mut().ok_or_else(|| {
        Error::Store(StoreError::Backend {
            message: "tenant document is not a JSON object".to_string(),
        })
    })?;
    map.insert(USAGE_FIELD.to_string(), serde_json::to_value(usage)?);
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeDelta;
    use serde_json::json;

    async fn tracker_with_tenant(tier: &str) -> (Arc<MemoryStore>, QuotaTracker) {
        let store = Arc::new(MemoryStore::new());
        store
            .put(
                TENANT_COLLECTION,
                "acme",
                json!({ "subscriptionTier": tier, "companyName": "Acme GmbH" }),
                None,
            )
            .await
            .unwrap();
        let shared = Arc::clone(&store) as Arc<dyn DocumentStore>;
        let policies = Arc::new(PolicyCache::new(Arc::clone(&shared)));
        (store, QuotaTracker::new(shared, policies))
    }

    #[tokio::test]
    async fn test_first_check_creates_usage_block() {
        let (store, tracker) = tracker_with_tenant("standard").await;

        let result = tracker
            .check("acme", MeteredOperation::BillAnalysis, false)
            .await
            .unwrap();
        assert!(result.allowed);
        assert_eq!(result.current, 1);
        assert_eq!(result.limit, Limit::Limited(50));
        assert_eq!(result.remaining, Limit::Limited(49));

        let doc = store.get(TENANT_COLLECTION, "acme").await.unwrap().unwrap();
        let usage: MonthlyUsage =
            serde_json::from_value(doc.data["monthlyUsage"].clone()).unwrap();
        assert_eq!(usage.bill_analysis_count, 1);
        assert_eq!(usage.report_generation_count, 0);
        // Unrelated tenant fields are untouched.
        assert_eq!(doc.data["companyName"], "Acme GmbH");
    }

    #[tokio::test]
    async fn test_missing_tenant_fails_loud() {
        let (_, tracker) = tracker_with_tenant("standard").await;

        let err = tracker
            .check("ghost", MeteredOperation::BillAnalysis, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TenantNotFound { .. }));
    }

    #[tokio::test]
    async fn test_over_cap_still_increments() {
        let (store, tracker) = tracker_with_tenant("standard").await;

        // Tenant has already used the full standard bill allowance.
        let mut usage = MonthlyUsage::fresh(Utc::now());
        usage.bill_analysis_count = 50;
        let doc = store.get(TENANT_COLLECTION, "acme").await.unwrap().unwrap();
        store
            .put(
                TENANT_COLLECTION,
                "acme",
                with_usage(&doc.data, &usage).unwrap(),
                Some(doc.version),
            )
            .await
            .unwrap();

        let result = tracker
            .check("acme", MeteredOperation::BillAnalysis, false)
            .await
            .unwrap();
        assert!(!result.allowed);
        assert_eq!(result.current, 51);
        assert_eq!(result.limit, Limit::Limited(50));
        assert_eq!(result.remaining, Limit::Limited(0));
        assert_eq!(result.percent_used, 100.0);
    }

    #[tokio::test]
    async fn test_unlimited_tier_admits_and_counts() {
        let (_, tracker) = tracker_with_tenant("enterprise").await;

        for expected_current in 1..=100u64 {
            let result = tracker
                .check("acme", MeteredOperation::ReportGeneration, false)
                .await
                .unwrap();
            assert!(result.allowed);
            assert_eq!(result.current, expected_current);
            assert_eq!(result.limit, Limit::Unlimited);
            assert_eq!(result.percent_used, 0.0);
        }
    }

    #[tokio::test]
    async fn test_bypass_reports_unlimited_but_counts() {
        let (_, tracker) = tracker_with_tenant("trial").await;

        // Trial allows 10 bills; bypass must admit far beyond that.
        for _ in 0..20 {
            let result = tracker
                .check("acme", MeteredOperation::BillAnalysis, true)
                .await
                .unwrap();
            assert!(result.allowed);
            assert_eq!(result.limit, Limit::Unlimited);
        }
        let status = tracker
            .status("acme", MeteredOperation::BillAnalysis)
            .await
            .unwrap();
        assert_eq!(status.current, 20);
        assert!(!status.allowed);
    }

    #[tokio::test]
    async fn test_prior_month_rolls_over() {
        let (store, tracker) = tracker_with_tenant("standard").await;

        let now = Utc::now();
        let stale = MonthlyUsage {
            bill_analysis_count: 42,
            report_generation_count: 7,
            period_start: now - TimeDelta::days(90),
            period_end: now - TimeDelta::days(60),
            last_reset: now - TimeDelta::days(90),
            updated_at: now - TimeDelta::days(61),
        };
        let doc = store.get(TENANT_COLLECTION, "acme").await.unwrap().unwrap();
        store
            .put(
                TENANT_COLLECTION,
                "acme",
                with_usage(&doc.data, &stale).unwrap(),
                Some(doc.version),
            )
            .await
            .unwrap();

        let result = tracker
            .check("acme", MeteredOperation::BillAnalysis, false)
            .await
            .unwrap();
        assert!(result.allowed);
        assert_eq!(result.current, 1, "counters reset at rollover");

        let status = tracker
            .status("acme", MeteredOperation::ReportGeneration)
            .await
            .unwrap();
        assert_eq!(status.current, 0);
        let (period_start, period_end) = current_period_bounds(now);
        let doc = store.get(TENANT_COLLECTION, "acme").await.unwrap().unwrap();
        let usage: MonthlyUsage =
            serde_json::from_value(doc.data["monthlyUsage"].clone()).unwrap();
        assert_eq!(usage.period_start, period_start);
        assert_eq!(usage.period_end, period_end);
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent_within_month() {
        let (store, tracker) = tracker_with_tenant("standard").await;

        tracker.ensure_current_month("acme").await.unwrap();
        let first = store.get(TENANT_COLLECTION, "acme").await.unwrap().unwrap();

        tracker.ensure_current_month("acme").await.unwrap();
        let second = store.get(TENANT_COLLECTION, "acme").await.unwrap().unwrap();

        assert_eq!(first.version, second.version, "no double reset");
    }

    #[tokio::test]
    async fn test_reset_zeroes_mid_month() {
        let (_, tracker) = tracker_with_tenant("standard").await;

        for _ in 0..5 {
            tracker
                .check("acme", MeteredOperation::BillAnalysis, false)
                .await
                .unwrap();
        }
        tracker.reset("acme").await.unwrap();

        let status = tracker
            .status("acme", MeteredOperation::BillAnalysis)
            .await
            .unwrap();
        assert_eq!(status.current, 0);
        assert_eq!(status.remaining, Limit::Limited(50));
    }

    #[tokio::test]
    async fn test_status_does_not_increment() {
        let (_, tracker) = tracker_with_tenant("trial").await;
        tracker.initialize("acme").await.unwrap();

        for _ in 0..3 {
            let status = tracker
                .status("acme", MeteredOperation::BillAnalysis)
                .await
                .unwrap();
            assert_eq!(status.current, 0);
            assert_eq!(status.percent_used, 0.0);
        }
    }

    #[tokio::test]
    async fn test_missing_tier_defaults_to_trial() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(TENANT_COLLECTION, "bare", json!({}), None)
            .await
            .unwrap();
        let shared = Arc::clone(&store) as Arc<dyn DocumentStore>;
        let tracker = QuotaTracker::new(Arc::clone(&shared), Arc::new(PolicyCache::new(shared)));

        let result = tracker
            .check("bare", MeteredOperation::BillAnalysis, false)
            .await
            .unwrap();
        assert_eq!(result.limit, Limit::Limited(10), "trial bill allowance");
    }
}
