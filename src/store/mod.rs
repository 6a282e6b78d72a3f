//! Transactional document store abstraction.
//!
//! The metering layer persists its counters through this seam: a keyed
//! JSON-document store with optimistic compare-and-swap writes. The
//! [`transact`] helper turns that primitive into an atomic
//! read-modify-write with automatic retry on version conflicts.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Write conflict on {key}")]
    Conflict { key: String },

    #[error("Storage backend error: {message}")]
    Backend { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A stored document together with its optimistic-concurrency version.
#[derive(Debug, Clone)]
pub struct VersionedDoc {
    pub version: u64,
    pub data: Value,
}

/// Keyed JSON-document storage with compare-and-swap writes.
///
/// `put` with `expected = None` requires the document to be absent;
/// `expected = Some(v)` requires the stored version to still equal `v`.
/// Either mismatch yields [`StoreError::Conflict`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, collection: &str, key: &str) -> StoreResult<Option<VersionedDoc>>;

    async fn put(
        &self,
        collection: &str,
        key: &str,
        data: Value,
        expected: Option<u64>,
    ) -> StoreResult<u64>;

    async fn delete(&self, collection: &str, key: &str) -> StoreResult<bool>;

    async fn list_keys(&self, collection: &str) -> StoreResult<Vec<String>>;
}

/// Outcome of one application of a [`transact`] closure.
pub enum Tx<T> {
    /// Persist the new document state, then return the value.
    Write(Value, T),
    /// Return the value without touching storage (e.g. a rejected request).
    Skip(T),
}

const MAX_TX_RETRIES: u32 = 5;
const INITIAL_TX_BACKOFF: Duration = Duration::from_millis(10);
const MAX_TX_BACKOFF: Duration = Duration::from_millis(250);

/// Atomic read-modify-write over one document.
///
/// Reads the current document, applies `apply`, and commits the result with
/// compare-and-swap against the version that was read. Conflicting writers
/// cause a re-read and re-apply with jittered exponential backoff, so the
/// closure must be pure with respect to its input snapshot.
pub async fn transact<T, E, F>(
    store: &dyn DocumentStore,
    collection: &str,
    key: &str,
    mut apply: F,
) -> Result<T, E>
where
    E: From<StoreError>,
    F: FnMut(Option<&Value>) -> Result<Tx<T>, E>,
{
    let mut attempt = 0;
    let mut backoff = INITIAL_TX_BACKOFF;

    loop {
        let current = store.get(collection, key).await.map_err(E::from)?;
        let expected = current.as_ref().map(|doc| doc.version);

        match apply(current.as_ref().map(|doc| &doc.data))? {
            Tx::Skip(value) => return Ok(value),
            Tx::Write(data, value) => {
                match store.put(collection, key, data, expected).await {
                    Ok(_) => return Ok(value),
                    Err(StoreError::Conflict { .. }) if attempt < MAX_TX_RETRIES => {
                        attempt += 1;
                        tracing::debug!(
                            collection,
                            key,
                            attempt,
                            "transaction conflict, retrying"
                        );
                        // Symmetrical 10% jitter to prevent thundering herd
                        let jitter_factor = 1.0 + (rand::random::<f64>() * 0.2 - 0.1);
                        tokio::time::sleep(backoff.mul_f64(jitter_factor)).await;
                        backoff = (backoff * 2).min(MAX_TX_BACKOFF);
                    }
                    Err(e) => return Err(E::from(e)),
                }
            }
        }
    }
}

#[cfg(feature = "postgres")]
pub(crate) trait BackendResultExt<T> {
    fn backend_err(self) -> StoreResult<T>;
    fn backend_err_ctx(self, context: &str) -> StoreResult<T>;
}

#[cfg(feature = "postgres")]
impl<T, E: std::fmt::Display> BackendResultExt<T> for std::result::Result<T, E> {
    fn backend_err(self) -> StoreResult<T> {
        self.map_err(|e| StoreError::Backend {
            message: e.to_string(),
        })
    }

    fn backend_err_ctx(self, context: &str) -> StoreResult<T> {
        self.map_err(|e| StoreError::Backend {
            message: format!("{}: {}", context, e),
        })
    }
}
