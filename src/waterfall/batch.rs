//! Bounded-concurrency batch enrichment

use super::orchestrator::{SourceToggles, WaterfallOrchestrator};
use super::outcome::EnrichmentOutcome;
use crate::record::EnrichmentRecord;
use crate::throttle::CancellationToken;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

const ABORTED: &str = "enrichment aborted";

/// Runs many records through one orchestrator.
///
/// Outcomes come back in input order. A task that panics yields a failed
/// outcome for its own slot and leaves the others alone. Dropping a running
/// batch future aborts its in-flight records.
pub struct BatchRunner {
    orchestrator: Arc<WaterfallOrchestrator>,
    toggles: SourceToggles,
}

impl BatchRunner {
    pub fn new(orchestrator: Arc<WaterfallOrchestrator>) -> Self {
        Self {
            orchestrator,
            toggles: SourceToggles::all(),
        }
    }

    pub fn with_toggles(mut self, toggles: SourceToggles) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn orchestrator(&self) -> &Arc<WaterfallOrchestrator> {
        &self.orchestrator
    }

    /// Enrich `records` with at most `max_concurrency` in flight. A limit of
    /// zero is treated as one.
    pub async fn run_batch(
        &self,
        records: Vec<EnrichmentRecord>,
        max_concurrency: usize,
    ) -> Vec<EnrichmentOutcome> {
        self.run_batch_with_cancel(records, max_concurrency, &CancellationToken::new())
            .await
    }

    /// Like `run_batch`, but records still waiting for a slot when `cancel`
    /// fires return immediately as cancelled.
    pub async fn run_batch_with_cancel(
        &self,
        records: Vec<EnrichmentRecord>,
        max_concurrency: usize,
        cancel: &CancellationToken,
    ) -> Vec<EnrichmentOutcome> {
        let batch_id = Uuid::new_v4();
        let limit = max_concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        tracing::info!(%batch_id, records = records.len(), concurrency = limit, "batch started");

        let mut fallbacks = Vec::with_capacity(records.len());
        let mut tasks = JoinSet::new();
        for (index, record) in records.into_iter().enumerate() {
            fallbacks.push(record.clone());
            let semaphore = semaphore.clone();
            let orchestrator = self.orchestrator.clone();
            let toggles = self.toggles;
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return (index, EnrichmentOutcome::cancelled(record)),
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return (index, EnrichmentOutcome::failed(record, "batch closed")),
                    },
                };
                (index, orchestrator.enrich_one(record, &toggles, &cancel).await)
            });
        }

        // Dropping the set aborts every task still running.
        let mut slots: Vec<Option<EnrichmentOutcome>> = fallbacks.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => tracing::error!(%batch_id, error = %e, "enrichment task aborted"),
            }
        }

        let outcomes: Vec<EnrichmentOutcome> = slots
            .into_iter()
            .zip(fallbacks)
            .map(|(slot, fallback)| {
                slot.unwrap_or_else(|| EnrichmentOutcome::failed(fallback, ABORTED))
            })
            .collect();

        let enriched = outcomes.iter().filter(|o| o.is_enriched()).count();
        tracing::info!(
            %batch_id,
            enriched,
            not_enriched = outcomes.len() - enriched,
            "batch finished"
        );
        outcomes
    }
}
