//! Source contracts shared by every data source variant
//!
//! A `SourceProvider` holds construction-time configuration (credentials,
//! base URL, shared rate limiter) and hands out one `SourceAdapter` per
//! session. The adapter owns the session's HTTP client and `AdapterStats`.

use super::error::SourceError;
use super::types::{AdapterStats, ScrapeResult, SearchCriteria, SourceKind};
use crate::record::{EnrichmentRecord, IdentityHints};
use crate::throttle::CancellationToken;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Pure mapping from a source's raw payload into the canonical record.
pub type Normalizer = Arc<dyn Fn(&Value) -> Result<EnrichmentRecord, SourceError> + Send + Sync>;

/// One session against an external data source.
///
/// Callers go through `AdapterSession`, which pairs `open()` with `close()`.
#[async_trait]
pub trait SourceAdapter: Send {
    fn kind(&self) -> SourceKind;

    /// Human-readable name for logs
    fn name(&self) -> &str;

    /// Acquire session resources. Fails for missing credentials or an
    /// unusable client configuration.
    async fn open(&mut self, cancel: &CancellationToken) -> Result<(), SourceError>;

    /// Release session resources and return the finalized stats.
    async fn close(&mut self) -> AdapterStats;

    /// Bulk query.
    ///
    /// An item that fails to parse becomes a failed `ScrapeResult` and an
    /// entry in the stats' errors; it never aborts the call. Session-level
    /// failures are returned as `Err`.
    async fn search(
        &mut self,
        criteria: &SearchCriteria,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScrapeResult>, SourceError>;

    /// Single-entity lookup used by the waterfall.
    ///
    /// `Ok(None)` when the source found nothing, a failed result when the
    /// attempt errored, a successful result otherwise.
    async fn lookup_one(
        &mut self,
        hints: &IdentityHints,
        cancel: &CancellationToken,
    ) -> Result<Option<ScrapeResult>, SourceError>;

    /// Map a raw payload into the canonical record.
    fn normalize(&self, raw: &Value) -> Result<EnrichmentRecord, SourceError>;

    /// Counters for the current session.
    fn stats(&self) -> &AdapterStats;
}

/// Factory for adapter sessions.
pub trait SourceProvider: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn name(&self) -> &str;

    /// Create a fresh, unopened session.
    fn create(&self) -> Result<Box<dyn SourceAdapter>, SourceError>;
}
