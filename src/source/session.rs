//! Scoped adapter sessions
//!
//! `AdapterSession::open` is the only way to obtain an opened adapter, and
//! `close` consumes the session. If a session is dropped without `close`
//! (panic or early return), the adapter and its client are still dropped;
//! only the stats summary is lost.

use super::error::SourceError;
use super::traits::SourceAdapter;
use super::types::{AdapterStats, ScrapeResult, SearchCriteria, SourceKind};
use crate::record::IdentityHints;
use crate::throttle::CancellationToken;

/// An opened adapter.
pub struct AdapterSession {
    adapter: Box<dyn SourceAdapter>,
    closed: bool,
}

impl AdapterSession {
    /// Open `adapter`. On failure the adapter is closed before the error is
    /// returned.
    pub async fn open(
        mut adapter: Box<dyn SourceAdapter>,
        cancel: &CancellationToken,
    ) -> Result<Self, SourceError> {
        if let Err(e) = adapter.open(cancel).await {
            adapter.close().await;
            return Err(e);
        }
        tracing::debug!(source = adapter.name(), "session opened");
        Ok(Self {
            adapter,
            closed: false,
        })
    }

    pub fn kind(&self) -> SourceKind {
        self.adapter.kind()
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    pub fn adapter(&mut self) -> &mut dyn SourceAdapter {
        self.adapter.as_mut()
    }

    pub fn stats(&self) -> &AdapterStats {
        self.adapter.stats()
    }

    pub async fn lookup_one(
        &mut self,
        hints: &IdentityHints,
        cancel: &CancellationToken,
    ) -> Result<Option<ScrapeResult>, SourceError> {
        self.adapter.lookup_one(hints, cancel).await
    }

    pub async fn search(
        &mut self,
        criteria: &SearchCriteria,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScrapeResult>, SourceError> {
        self.adapter.search(criteria, cancel).await
    }

    /// Close the session and return its final stats.
    pub async fn close(mut self) -> AdapterStats {
        self.closed = true;
        self.adapter.close().await
    }
}

impl Drop for AdapterSession {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!(source = self.adapter.name(), "session dropped without close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EnrichmentRecord;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingAdapter {
        fail_open: bool,
        closes: Arc<AtomicUsize>,
        stats: AdapterStats,
    }

    #[async_trait]
    impl SourceAdapter for CountingAdapter {
        fn kind(&self) -> SourceKind {
            SourceKind::Primary
        }
        fn name(&self) -> &str {
            "counting"
        }
        async fn open(&mut self, _cancel: &CancellationToken) -> Result<(), SourceError> {
            self.stats = AdapterStats::started();
            if self.fail_open {
                return Err(SourceError::Configuration("no key".into()));
            }
            Ok(())
        }
        async fn close(&mut self) -> AdapterStats {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.stats.finish();
            self.stats.clone()
        }
        async fn search(
            &mut self,
            _criteria: &SearchCriteria,
            _cancel: &CancellationToken,
        ) -> Result<Vec<ScrapeResult>, SourceError> {
            Ok(Vec::new())
        }
        async fn lookup_one(
            &mut self,
            _hints: &IdentityHints,
            _cancel: &CancellationToken,
        ) -> Result<Option<ScrapeResult>, SourceError> {
            self.stats.record_attempt();
            self.stats.record_success();
            Ok(Some(ScrapeResult::miss()))
        }
        fn normalize(&self, _raw: &Value) -> Result<EnrichmentRecord, SourceError> {
            Ok(EnrichmentRecord::new())
        }
        fn stats(&self) -> &AdapterStats {
            &self.stats
        }
    }

    fn adapter(fail_open: bool, closes: &Arc<AtomicUsize>) -> Box<dyn SourceAdapter> {
        Box::new(CountingAdapter {
            fail_open,
            closes: closes.clone(),
            stats: AdapterStats::default(),
        })
    }

    #[tokio::test]
    async fn close_returns_finalized_stats() {
        let closes = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let mut session = AdapterSession::open(adapter(false, &closes), &cancel)
            .await
            .unwrap();

        session
            .lookup_one(&IdentityHints::default(), &cancel)
            .await
            .unwrap();
        let stats = session.close().await;

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(stats.total_requests, 1);
        assert!(stats.end_time.is_some());
    }

    #[tokio::test]
    async fn failed_open_still_closes() {
        let closes = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let err = AdapterSession::open(adapter(true, &closes), &cancel)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, SourceError::Configuration(_)));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
