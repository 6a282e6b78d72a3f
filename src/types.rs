//! Shared domain types for tenant metering.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

/// Subscription tier of a tenant. Selects the quota table that applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Trial,
    Standard,
    Premium,
    Enterprise,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Standard => "standard",
            Self::Premium => "premium",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An expensive action being metered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MeteredOperation {
    BillAnalysis,
    ReportGeneration,
}

impl MeteredOperation {
    /// Stable key fragment used in persisted record identifiers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BillAnalysis => "billAnalysis",
            Self::ReportGeneration => "reportGeneration",
        }
    }
}

impl fmt::Display for MeteredOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A quota or rate limit. The externally editable config documents encode
/// "unlimited" as `-1`; this type keeps that wire encoding while making the
/// sentinel impossible to do arithmetic on by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Limited(u32),
    Unlimited,
}

impl Limit {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }

    /// Whether a request is admissible given the count observed so far.
    pub fn allows(&self, current: u64) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Limited(max) => current < u64::from(*max),
        }
    }

    /// Remaining headroom after `current` uses. `None` when unlimited.
    pub fn remaining(&self, current: u64) -> Option<u64> {
        match self {
            Self::Unlimited => None,
            Self::Limited(max) => Some(u64::from(*max).saturating_sub(current)),
        }
    }

    /// Wire encoding: the configured value, or `-1` for unlimited.
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Unlimited => -1,
            Self::Limited(max) => i64::from(*max),
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        if raw < 0 {
            Ok(Self::Unlimited)
        } else {
            let value = u32::try_from(raw)
                .map_err(|_| de::Error::custom(format!("limit out of range: {}", raw)))?;
            Ok(Self::Limited(value))
        }
    }
}
