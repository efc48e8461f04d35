//! Waterfall orchestration
//!
//! Tries each registered source in priority order until one succeeds. A
//! record passes through `NotStarted → TryingSource(i)` and ends in either
//! `Succeeded` or `AllSourcesExhausted`; both produce an outcome. Source
//! errors are logged, kept as diagnostics and treated as misses.

use super::outcome::{EnrichmentOutcome, CANCELLED};
use super::stats::PipelineStats;
use crate::config::CascadeConfig;
use crate::cost::CostEstimator;
use crate::record::{EnrichmentRecord, IdentityHints};
use crate::source::{
    AdapterSession, AiResearcherProvider, EnrichmentSource, PrimaryDirectoryProvider,
    ProfileNetworkProvider, ScrapeResult, SourceError, SourceKind, SourceProvider,
};
use crate::throttle::{CancellationToken, LimiterRegistry};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaterfallError {
    #[error("{0} cannot be used as a waterfall stage")]
    UnsupportedStage(SourceKind),

    #[error("{0} is already registered")]
    DuplicateStage(SourceKind),
}

/// Which stages a run may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceToggles {
    pub primary: bool,
    pub network: bool,
    pub ai: bool,
}

impl Default for SourceToggles {
    fn default() -> Self {
        Self::all()
    }
}

impl SourceToggles {
    pub fn all() -> Self {
        Self {
            primary: true,
            network: true,
            ai: true,
        }
    }

    pub fn is_enabled(&self, source: EnrichmentSource) -> bool {
        match source {
            EnrichmentSource::Primary => self.primary,
            EnrichmentSource::Network => self.network,
            EnrichmentSource::Ai => self.ai,
        }
    }
}

/// Where a record is in the waterfall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaterfallState {
    NotStarted,
    /// Index into the registered stages.
    TryingSource(usize),
    Succeeded(EnrichmentSource),
    AllSourcesExhausted,
}

impl WaterfallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::AllSourcesExhausted)
    }
}

/// What one stage produced.
enum Attempt {
    Hit(ScrapeResult),
    Miss,
    Failed(String),
    Cancelled,
}

/// Sequential fallback over registered sources.
///
/// One orchestrator serves many concurrent records; its stats are shared
/// between them and only ever grow.
pub struct WaterfallOrchestrator {
    sources: Vec<Arc<dyn SourceProvider>>,
    stats: Mutex<PipelineStats>,
    cost_estimator: Option<Arc<CostEstimator>>,
}

impl Default for WaterfallOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl WaterfallOrchestrator {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            stats: Mutex::new(PipelineStats::default()),
            cost_estimator: None,
        }
    }

    /// Append a stage. Stages are tried in registration order.
    pub fn register(&mut self, provider: Arc<dyn SourceProvider>) -> Result<(), WaterfallError> {
        let kind = provider.kind();
        if kind.enrichment_source().is_none() {
            return Err(WaterfallError::UnsupportedStage(kind));
        }
        if self.sources.iter().any(|s| s.kind() == kind) {
            return Err(WaterfallError::DuplicateStage(kind));
        }
        tracing::debug!(source = provider.name(), position = self.sources.len(), "stage registered");
        self.sources.push(provider);
        Ok(())
    }

    pub fn with_source(mut self, provider: Arc<dyn SourceProvider>) -> Result<Self, WaterfallError> {
        self.register(provider)?;
        Ok(self)
    }

    /// Attach the estimator that tracks spend across all sessions.
    pub fn with_cost_estimator(mut self, estimator: Arc<CostEstimator>) -> Self {
        self.cost_estimator = Some(estimator);
        self
    }

    /// Build the stages named in `config.priority`. Sources without
    /// credentials are skipped with a warning.
    pub fn from_config(
        config: &CascadeConfig,
        limiters: &LimiterRegistry,
    ) -> Result<Self, WaterfallError> {
        let mut orchestrator = Self::new();
        for stage in &config.priority {
            let built: Result<Arc<dyn SourceProvider>, SourceError> = match stage {
                EnrichmentSource::Primary => {
                    PrimaryDirectoryProvider::new(&config.primary, config.retry.clone(), limiters)
                        .map(|p| Arc::new(p) as Arc<dyn SourceProvider>)
                }
                EnrichmentSource::Network => {
                    ProfileNetworkProvider::new(&config.network, config.retry.clone(), limiters)
                        .map(|p| Arc::new(p) as Arc<dyn SourceProvider>)
                }
                EnrichmentSource::Ai => AiResearcherProvider::new(
                    &config.ai,
                    config.pricing.clone(),
                    config.retry.clone(),
                    limiters,
                )
                .map(|p| {
                    orchestrator.cost_estimator = Some(p.cost_estimator());
                    Arc::new(p) as Arc<dyn SourceProvider>
                }),
            };
            match built {
                Ok(provider) => orchestrator.register(provider)?,
                Err(e) => tracing::warn!(stage = ?stage, error = %e, "source disabled"),
            }
        }
        Ok(orchestrator)
    }

    /// Registered stages, in priority order.
    pub fn source_kinds(&self) -> Vec<SourceKind> {
        self.sources.iter().map(|s| s.kind()).collect()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> PipelineStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn cost_estimator(&self) -> Option<Arc<CostEstimator>> {
        self.cost_estimator.clone()
    }

    /// Run one record through the waterfall. Never fails: every error ends
    /// up in the outcome's diagnostics.
    pub async fn enrich_one(
        &self,
        record: EnrichmentRecord,
        toggles: &SourceToggles,
        cancel: &CancellationToken,
    ) -> EnrichmentOutcome {
        let hints = IdentityHints::from_record(&record);
        let mut outcome = EnrichmentOutcome::pending(record);
        let mut state = WaterfallState::NotStarted;

        for (i, provider) in self.sources.iter().enumerate() {
            let kind = provider.kind();
            let Some(stage) = kind.enrichment_source() else {
                continue;
            };
            if cancel.is_cancelled() {
                outcome.errors.push(CANCELLED.to_string());
                break;
            }
            if !toggles.is_enabled(stage) {
                tracing::debug!(source = provider.name(), "stage disabled for this run");
                continue;
            }
            if !kind.accepts(&hints) {
                tracing::debug!(source = provider.name(), record = hints.label(), "missing identity hint, skipping");
                continue;
            }

            state = WaterfallState::TryingSource(i);
            match attempt(provider.as_ref(), &hints, cancel).await {
                Attempt::Hit(result) => {
                    tracing::info!(source = provider.name(), record = hints.label(), "enriched");
                    outcome.apply(stage, result);
                    state = WaterfallState::Succeeded(stage);
                    break;
                }
                Attempt::Miss => {
                    tracing::debug!(source = provider.name(), record = hints.label(), "no match");
                }
                Attempt::Failed(error) => {
                    tracing::warn!(source = provider.name(), record = hints.label(), %error, "source failed");
                    outcome.errors.push(format!("{}: {}", provider.name(), error));
                }
                Attempt::Cancelled => {
                    outcome.errors.push(CANCELLED.to_string());
                    break;
                }
            }
        }

        if !state.is_terminal() {
            state = WaterfallState::AllSourcesExhausted;
        }

        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        match state {
            WaterfallState::Succeeded(stage) => stats.record_hit(stage, outcome.enrichment_cost),
            _ => {
                tracing::info!(record = hints.label(), "all sources exhausted");
                stats.record_failure();
            }
        }
        outcome
    }
}

/// One stage: create a session, look the record up, close the session.
async fn attempt(
    provider: &dyn SourceProvider,
    hints: &IdentityHints,
    cancel: &CancellationToken,
) -> Attempt {
    let adapter = match provider.create() {
        Ok(adapter) => adapter,
        Err(e) => return Attempt::Failed(e.to_string()),
    };
    let mut session = match AdapterSession::open(adapter, cancel).await {
        Ok(session) => session,
        Err(SourceError::Cancelled) => return Attempt::Cancelled,
        Err(e) => return Attempt::Failed(e.to_string()),
    };

    let looked_up = session.lookup_one(hints, cancel).await;
    let stats = session.close().await;
    tracing::debug!(
        source = provider.name(),
        requests = stats.total_requests,
        failed = stats.failed_requests,
        "stage finished"
    );

    match looked_up {
        Ok(Some(result)) if result.success => Attempt::Hit(result),
        Ok(Some(result)) => match result.error {
            Some(error) => Attempt::Failed(error),
            None => Attempt::Miss,
        },
        Ok(None) => Attempt::Miss,
        Err(SourceError::Cancelled) => Attempt::Cancelled,
        Err(e) => Attempt::Failed(e.to_string()),
    }
}
