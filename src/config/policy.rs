//! Policy tables read from the central limit document.
//!
//! The document is externally editable, so every field is optional on the
//! wire: missing nested fields fall back to the built-in defaults
//! individually, not document-wide.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Limit, MeteredOperation, SubscriptionTier};

/// Short-horizon request limits for one metered operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRateLimits {
    pub requests_per_minute: Limit,
    pub requests_per_hour: Limit,
    pub requests_per_day: Limit,
}

impl OperationRateLimits {
    pub fn limit_for(&self, window: RateLimitWindow) -> Limit {
        match window {
            RateLimitWindow::Minute => self.requests_per_minute,
            RateLimitWindow::Hour => self.requests_per_hour,
            RateLimitWindow::Day => self.requests_per_day,
        }
    }
}

/// The three sliding-window horizons a rate-limit policy covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitWindow {
    Minute,
    Hour,
    Day,
}

impl RateLimitWindow {
    pub const ALL: [RateLimitWindow; 3] = [Self::Minute, Self::Hour, Self::Day];

    pub fn duration(&self) -> Duration {
        match self {
            Self::Minute => Duration::from_secs(60),
            Self::Hour => Duration::from_secs(60 * 60),
            Self::Day => Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Per-operation rate-limit policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub bill_analysis: OperationRateLimits,
    pub report_generation: OperationRateLimits,
}

impl RateLimitConfig {
    pub fn for_operation(&self, operation: MeteredOperation) -> &OperationRateLimits {
        match operation {
            MeteredOperation::BillAnalysis => &self.bill_analysis,
            MeteredOperation::ReportGeneration => &self.report_generation,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            bill_analysis: OperationRateLimits {
                requests_per_minute: Limit::Limited(10),
                requests_per_hour: Limit::Limited(100),
                requests_per_day: Limit::Limited(500),
            },
            report_generation: OperationRateLimits {
                requests_per_minute: Limit::Limited(5),
                requests_per_hour: Limit::Limited(50),
                requests_per_day: Limit::Limited(200),
            },
        }
    }
}

/// Monthly quota table for one subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierQuotas {
    pub max_users: Limit,
    pub max_bills_per_month: Limit,
    pub max_reports_per_month: Limit,
}

impl TierQuotas {
    pub fn monthly_limit(&self, operation: MeteredOperation) -> Limit {
        match operation {
            MeteredOperation::BillAnalysis => self.max_bills_per_month,
            MeteredOperation::ReportGeneration => self.max_reports_per_month,
        }
    }
}

/// Tier-to-quota policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaConfig {
    pub trial: TierQuotas,
    pub standard: TierQuotas,
    pub premium: TierQuotas,
    pub enterprise: TierQuotas,
}

impl QuotaConfig {
    pub fn for_tier(&self, tier: SubscriptionTier) -> &TierQuotas {
        match tier {
            SubscriptionTier::Trial => &self.trial,
            SubscriptionTier::Standard => &self.standard,
            SubscriptionTier::Premium => &self.premium,
            SubscriptionTier::Enterprise => &self.enterprise,
        }
    }

    pub fn monthly_limit(&self, tier: SubscriptionTier, operation: MeteredOperation) -> Limit {
        self.for_tier(tier).monthly_limit(operation)
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            trial: TierQuotas {
                max_users: Limit::Limited(2),
                max_bills_per_month: Limit::Limited(10),
                max_reports_per_month: Limit::Limited(5),
            },
            standard: TierQuotas {
                max_users: Limit::Limited(5),
                max_bills_per_month: Limit::Limited(50),
                max_reports_per_month: Limit::Limited(20),
            },
            premium: TierQuotas {
                max_users: Limit::Limited(20),
                max_bills_per_month: Limit::Limited(200),
                max_reports_per_month: Limit::Limited(100),
            },
            enterprise: TierQuotas {
                max_users: Limit::Unlimited,
                max_bills_per_month: Limit::Unlimited,
                max_reports_per_month: Limit::Unlimited,
            },
        }
    }
}

// Wire-format mirror of the limit document with every field optional, so a
// partially populated document merges against defaults field-by-field.

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct PartialLimitDocument {
    pub rate_limits: PartialRateLimitConfig,
    pub quotas: PartialQuotaConfig,
    #[allow(dead_code)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct PartialRateLimitConfig {
    pub bill_analysis: PartialOperationRateLimits,
    pub report_generation: PartialOperationRateLimits,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct PartialOperationRateLimits {
    pub requests_per_minute: Option<Limit>,
    pub requests_per_hour: Option<Limit>,
    pub requests_per_day: Option<Limit>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct PartialQuotaConfig {
    pub trial: PartialTierQuotas,
    pub standard: PartialTierQuotas,
    pub premium: PartialTierQuotas,
    pub enterprise: PartialTierQuotas,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct PartialTierQuotas {
    pub max_users: Option<Limit>,
    pub max_bills_per_month: Option<Limit>,
    pub max_reports_per_month: Option<Limit>,
}

impl PartialLimitDocument {
    pub fn merged_over_defaults(self) -> (RateLimitConfig, QuotaConfig) {
        (
            self.rate_limits.merged_over(RateLimitConfig::default()),
            self.quotas.merged_over(QuotaConfig::default()),
        )
    }
}

impl PartialRateLimitConfig {
    fn merged_over(self, base: RateLimitConfig) -> RateLimitConfig {
        RateLimitConfig {
            bill_analysis: self.bill_analysis.merged_over(base.bill_analysis),
            report_generation: self.report_generation.merged_over(base.report_generation),
        }
    }
}

impl PartialOperationRateLimits {
    fn merged_over(self, base: OperationRateLimits) -> OperationRateLimits {
        OperationRateLimits {
            requests_per_minute: self.requests_per_minute.unwrap_or(base.requests_per_minute),
            requests_per_hour: self.requests_per_hour.unwrap_or(base.requests_per_hour),
            requests_per_day: self.requests_per_day.unwrap_or(base.requests_per_day),
        }
    }
}

impl PartialQuotaConfig {
    fn merged_over(self, base: QuotaConfig) -> QuotaConfig {
        QuotaConfig {
            trial: self.trial.merged_over(base.trial),
            standard: self.standard.merged_over(base.standard),
            premium: self.premium.merged_over(base.premium),
            enterprise: self.enterprise.merged_over(base.enterprise),
        }
    }
}

impl PartialTierQuotas {
    fn merged_over(self, base: TierQuotas) -> TierQuotas {
        TierQuotas {
            max_users: self.max_users.unwrap_or(base.max_users),
            max_bills_per_month: self.max_bills_per_month.unwrap_or(base.max_bills_per_month),
            max_reports_per_month: self
                .max_reports_per_month
                .unwrap_or(base.max_reports_per_month),
        }
    }
}
