//! Transactional sliding-window rate limiter.
//!
//! One record per tenant, operation, and window horizon holds the
//! timestamps of admitted requests. Every check prunes entries that have
//! aged out of the window, then admits or rejects inside a single
//! optimistic transaction; rejection never mutates the record.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::store::{DocumentStore, StoreError, StoreResult, Tx, VersionedDoc, transact};
use crate::types::MeteredOperation;

pub const RATE_LIMIT_COLLECTION: &str = "rate_limits";

const CLEANUP_CONCURRENCY: usize = 8;

/// Persisted rolling-window record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRecord {
    pub tenant_id: String,
    pub operation: MeteredOperation,
    pub window_ms: u64,
    /// Admitted-request instants, insertion order = chronological.
    pub timestamps: Vec<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Admission decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// When the window frees a slot (oldest surviving timestamp + window).
    pub reset_at: DateTime<Utc>,
    /// Seconds until `reset_at`, rounded up. Set only on rejection.
    pub retry_after: Option<Duration>,
}

/// Sliding-window throttle over a transactional document store.
pub struct RateLimiter {
    store: Arc<dyn DocumentStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Check (and on admission, consume) one request slot.
    ///
    /// `bypass` short-circuits with no persistence, for privileged callers.
    /// Storage failures fail OPEN: the request is admitted and the error
    /// logged, so a store outage never blocks metered traffic.
    pub async fn check(
        &self,
        tenant_id: &str,
        operation: MeteredOperation,
        limit: u32,
        window: Duration,
        bypass: bool,
    ) -> RateLimitDecision {
        let now = Utc::now();
        let window_delta = to_delta(window);

        if bypass {
            return RateLimitDecision {
                allowed: true,
                remaining: limit,
                reset_at: now + window_delta,
                retry_after: None,
            };
        }

        let key = record_key(tenant_id, operation, window);
        let result = transact::<_, StoreError, _>(
            self.store.as_ref(),
            RATE_LIMIT_COLLECTION,
            &key,
            |doc| {
                let mut record = match doc {
                    Some(data) => serde_json::from_value::<RateLimitRecord>(data.clone())?,
                    None => RateLimitRecord {
                        tenant_id: tenant_id.to_string(),
                        operation,
                        window_ms: window.as_millis() as u64,
                        timestamps: Vec::new(),
                        created_at: now,
                        updated_at: now,
                    },
                };

                let cutoff = now - window_delta;
                record.timestamps.retain(|ts| *ts > cutoff);
                let surviving = record.timestamps.len();

                if surviving >= limit as usize {
                    let reset_at = record
                        .timestamps
                        .first()
                        .map(|oldest| *oldest + window_delta)
                        .unwrap_or(now);
                    return Ok(Tx::Skip(RateLimitDecision {
                        allowed: false,
                        remaining: 0,
                        reset_at,
                        retry_after: Some(seconds_until(now, reset_at)),
                    }));
                }

                record.timestamps.push(now);
                record.updated_at = now;
                let reset_at = record
                    .timestamps
                    .first()
                    .map(|oldest| *oldest + window_delta)
                    .unwrap_or(now + window_delta);
                let decision = RateLimitDecision {
                    allowed: true,
                    remaining: limit - surviving as u32 - 1,
                    reset_at,
                    retry_after: None,
                };
                Ok(Tx::Write(serde_json::to_value(&record)?, decision))
            },
        )
        .await;

        match result {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(
                    tenant_id,
                    operation = %operation,
                    error = %e,
                    "rate-limit persistence failed, admitting request"
                );
                RateLimitDecision {
                    allowed: true,
                    remaining: limit.saturating_sub(1),
                    reset_at: now + window_delta,
                    retry_after: None,
                }
            }
        }
    }

    /// Read-only variant of [`check`](Self::check) for display purposes.
    pub async fn status(
        &self,
        tenant_id: &str,
        operation: MeteredOperation,
        limit: u32,
        window: Duration,
    ) -> crate::Result<RateLimitDecision> {
        let now = Utc::now();
        let window_delta = to_delta(window);
        let key = record_key(tenant_id, operation, window);

        let doc = self.store.get(RATE_LIMIT_COLLECTION, &key).await?;
        let surviving: Vec<DateTime<Utc>> = match doc {
            Some(VersionedDoc { data, .. }) => {
                let record: RateLimitRecord =
                    serde_json::from_value(data).map_err(StoreError::from)?;
                let cutoff = now - window_delta;
                record
                    .timestamps
                    .into_iter()
                    .filter(|ts| *ts > cutoff)
                    .collect()
            }
            None => Vec::new(),
        };

        let allowed = surviving.len() < limit as usize;
        let reset_at = surviving
            .first()
            .map(|oldest| *oldest + window_delta)
            .unwrap_or(now + window_delta);
        Ok(RateLimitDecision {
            allowed,
            remaining: limit.saturating_sub(surviving.len() as u32),
            reset_at,
            retry_after: if allowed {
                None
            } else {
                Some(seconds_until(now, reset_at))
            },
        })
    }

    /// Delete one operation's window records, or every record for the
    /// tenant. Administrative action.
    pub async fn clear(
        &self,
        tenant_id: &str,
        operation: Option<MeteredOperation>,
    ) -> crate::Result<usize> {
        let prefix = match operation {
            Some(op) => format!("{}:{}:", tenant_id, op.as_str()),
            None => format!("{}:", tenant_id),
        };

        let keys = self.store.list_keys(RATE_LIMIT_COLLECTION).await?;
        let mut removed = 0;
        for key in keys.iter().filter(|key| key.starts_with(&prefix)) {
            if self.store.delete(RATE_LIMIT_COLLECTION, key).await? {
                removed += 1;
            }
        }
        tracing::debug!(tenant_id, removed, "cleared rate-limit records");
        Ok(removed)
    }

    /// Periodic janitor: delete records whose `updatedAt` is older than the
    /// cutoff. Not part of the request path.
    pub async fn cleanup_older_than(&self, max_age: Duration) -> crate::Result<usize> {
        let cutoff = Utc::now() - to_delta(max_age);
        let keys = self.store.list_keys(RATE_LIMIT_COLLECTION).await?;

        let fetched: Vec<(String, StoreResult<Option<VersionedDoc>>)> = stream::iter(keys)
            .map(|key| {
                let store = Arc::clone(&self.store);
                async move {
                    let doc = store.get(RATE_LIMIT_COLLECTION, &key).await;
                    (key, doc)
                }
            })
            .buffer_unordered(CLEANUP_CONCURRENCY)
            .collect()
            .await;

        let mut removed = 0;
        for (key, doc) in fetched {
            let doc = match doc? {
                Some(doc) => doc,
                None => continue,
            };
            let updated_at = doc
                .data
                .get("updatedAt")
                .cloned()
                .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v).ok());
            match updated_at {
                Some(updated_at) if updated_at < cutoff => {
                    if self.store.delete(RATE_LIMIT_COLLECTION, &key).await? {
                        removed += 1;
                    }
                }
                Some(_) => {}
                None => {
                    tracing::warn!(key, "rate-limit record without updatedAt, skipping cleanup");
                }
            }
        }
        Ok(removed)
    }
}

fn record_key(tenant_id: &str, operation: MeteredOperation, window: Duration) -> String {
    format!("{}:{}:{}s", tenant_id, operation.as_str(), window.as_secs())
}

fn to_delta(window: Duration) -> TimeDelta {
    TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX)
}

fn seconds_until(now: DateTime<Utc>, reset_at: DateTime<Utc>) -> Duration {
    let millis = reset_at.signed_duration_since(now).num_milliseconds().max(0);
    Duration::from_secs(((millis + 999) / 1000) as u64)
}
