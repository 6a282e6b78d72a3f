//! Process-local cache for the central limit document.
//!
//! Configuration unavailability must never block metered traffic: a stale
//! cache beats defaults, defaults beat an error, and callers never see a
//! failure from this layer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use super::policy::{PartialLimitDocument, QuotaConfig, RateLimitConfig};
use crate::store::DocumentStore;

/// Collection holding the singleton limit document.
pub const CONFIG_COLLECTION: &str = "config";
/// Key of the singleton limit document.
pub const CONFIG_KEY: &str = "limits";

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CacheEntry {
    rate_limits: RateLimitConfig,
    quotas: QuotaConfig,
    fetched_at: Instant,
}

/// Cache inspection result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatus {
    pub is_cached: bool,
    pub age: Option<Duration>,
    pub expires_in: Option<Duration>,
}

/// TTL'd cache over the limit document.
///
/// Constructed once at process start and shared by reference; in a
/// multi-instance deployment each instance may serve config up to one TTL
/// stale, which is the accepted tradeoff for reduced config-store load.
pub struct PolicyCache {
    store: Arc<dyn DocumentStore>,
    ttl: Duration,
    entry: RwLock<Option<CacheEntry>>,
}

impl PolicyCache {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_ttl(store, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(store: Arc<dyn DocumentStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entry: RwLock::new(None),
        }
    }

    /// Current rate-limit policy. Never fails; see the fallback ladder above.
    pub async fn rate_limit_config(&self, force_refresh: bool) -> RateLimitConfig {
        self.current(force_refresh).await.0
    }

    /// Current quota policy. Never fails; see the fallback ladder above.
    pub async fn quota_config(&self, force_refresh: bool) -> QuotaConfig {
        self.current(force_refresh).await.1
    }

    /// Clear the cached value so the next call reads the document afresh.
    /// Used after an administrator edits the config document.
    pub async fn invalidate(&self) {
        *self.entry.write().await = None;
    }

    pub async fn status(&self) -> CacheStatus {
        let guard = self.entry.read().await;
        match guard.as_ref() {
            Some(entry) => {
                let age = entry.fetched_at.elapsed();
                CacheStatus {
                    is_cached: true,
                    age: Some(age),
                    expires_in: Some(self.ttl.saturating_sub(age)),
                }
            }
            None => CacheStatus {
                is_cached: false,
                age: None,
                expires_in: None,
            },
        }
    }

    async fn current(&self, force_refresh: bool) -> (RateLimitConfig, QuotaConfig) {
        if !force_refresh {
            let guard = self.entry.read().await;
            if let Some(entry) = guard.as_ref() {
                if entry.fetched_at.elapsed() < self.ttl {
                    return (entry.rate_limits.clone(), entry.quotas.clone());
                }
            }
        }
        self.refresh(force_refresh).await
    }

    async fn refresh(&self, force: bool) -> (RateLimitConfig, QuotaConfig) {
        // Write lock held across the fetch so concurrent expiries collapse
        // into one underlying read.
        let mut guard = self.entry.write().await;

        if !force {
            if let Some(entry) = guard.as_ref() {
                if entry.fetched_at.elapsed() < self.ttl {
                    return (entry.rate_limits.clone(), entry.quotas.clone());
                }
            }
        }

        match self.store.get(CONFIG_COLLECTION, CONFIG_KEY).await {
            Ok(Some(doc)) => {
                match serde_json::from_value::<PartialLimitDocument>(doc.data) {
                    Ok(partial) => {
                        let (rate_limits, quotas) = partial.merged_over_defaults();
                        *guard = Some(CacheEntry {
                            rate_limits: rate_limits.clone(),
                            quotas: quotas.clone(),
                            fetched_at: Instant::now(),
                        });
                        (rate_limits, quotas)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed limit document, serving fallback policy");
                        Self::stale_or_defaults(guard.as_ref())
                    }
                }
            }
            Ok(None) => {
                tracing::warn!("limit document missing, seeding cache with built-in defaults");
                let rate_limits = RateLimitConfig::default();
                let quotas = QuotaConfig::default();
                *guard = Some(CacheEntry {
                    rate_limits: rate_limits.clone(),
                    quotas: quotas.clone(),
                    fetched_at: Instant::now(),
                });
                (rate_limits, quotas)
            }
            Err(e) => {
                tracing::warn!(error = %e, "limit document fetch failed, serving fallback policy");
                // Stale cache is not re-stamped, so the next call retries.
                Self::stale_or_defaults(guard.as_ref())
            }
        }
    }

    fn stale_or_defaults(entry: Option<&CacheEntry>) -> (RateLimitConfig, QuotaConfig) {
        match entry {
            Some(entry) => (entry.rate_limits.clone(), entry.quotas.clone()),
            None => (RateLimitConfig::default(), QuotaConfig::default()),
        }
    }
}
