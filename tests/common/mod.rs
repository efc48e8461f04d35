//! Shared helpers for the waterfall and batch integration tests
//!
//! `ScriptedProvider` stands in for a real source: each session it creates
//! follows a fixed `Script`, counts its calls, and optionally sleeps for a
//! random interval or reports to a `ConcurrencyGauge`.

#![allow(dead_code)]

use async_trait::async_trait;
use cascade::source::ResearchNotes;
use cascade::{
    AdapterStats, CancellationToken, EnrichmentRecord, IdentityHints, ScrapeResult,
    SearchCriteria, SourceAdapter, SourceError, SourceKind, SourceProvider,
};
use rand::Rng;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a scripted session does on `lookup_one`.
#[derive(Debug, Clone)]
pub enum Script {
    /// Successful result carrying this record.
    Hit(EnrichmentRecord),
    /// Successful, billed result with research annotations.
    Researched {
        record: EnrichmentRecord,
        cost_usd: f64,
        notes: ResearchNotes,
    },
    /// Nothing found.
    Miss,
    /// A failed result with this message.
    FailedResult(String),
    /// `lookup_one` returns `Err`.
    Raise(String),
    /// `create` fails with a configuration error.
    RefuseCreate,
    /// Echo the input's `id` back as `seen_id`, panicking for records that
    /// carry a `panic` key.
    Echo,
    /// Park until the token fires.
    WaitForCancel,
}

/// Tracks how many lookups are in flight at once.
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enter(self: &Arc<Self>) -> GaugeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(self.clone())
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

pub struct GaugeGuard(Arc<ConcurrencyGauge>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ScriptedProvider {
    kind: SourceKind,
    name: String,
    script: Script,
    delay_ms: Option<(u64, u64)>,
    gauge: Option<Arc<ConcurrencyGauge>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new(kind: SourceKind, script: Script) -> Self {
        Self {
            kind,
            name: format!("scripted-{}", kind),
            script,
            delay_ms: None,
            gauge: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sleep a random duration in `[min_ms, max_ms]` before answering.
    pub fn with_delay(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.delay_ms = Some((min_ms, max_ms));
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    /// Handle on the lookup counter, usable after the provider is moved.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl SourceProvider for ScriptedProvider {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self) -> Result<Box<dyn SourceAdapter>, SourceError> {
        if matches!(self.script, Script::RefuseCreate) {
            return Err(SourceError::Configuration(format!(
                "{} has no credentials",
                self.name
            )));
        }
        Ok(Box::new(ScriptedAdapter {
            kind: self.kind,
            name: self.name.clone(),
            script: self.script.clone(),
            delay_ms: self.delay_ms,
            gauge: self.gauge.clone(),
            calls: self.calls.clone(),
            stats: AdapterStats::started(),
        }))
    }
}

pub struct ScriptedAdapter {
    kind: SourceKind,
    name: String,
    script: Script,
    delay_ms: Option<(u64, u64)>,
    gauge: Option<Arc<ConcurrencyGauge>>,
    calls: Arc<AtomicUsize>,
    stats: AdapterStats,
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self, _cancel: &CancellationToken) -> Result<(), SourceError> {
        Ok(())
    }

    async fn close(&mut self) -> AdapterStats {
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
        hints: &IdentityHints,
        cancel: &CancellationToken,
    ) -> Result<Option<ScrapeResult>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.stats.record_attempt();
        self.stats.record_success();
        let _guard = self.gauge.as_ref().map(|p| p.enter());

        if let Some((min, max)) = self.delay_ms {
            let ms = rand::thread_rng().gen_range(min..=max);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        match &self.script {
            Script::Hit(record) => Ok(Some(ScrapeResult::found(record.clone()))),
            Script::Researched {
                record,
                cost_usd,
                notes,
            } => Ok(Some(
                ScrapeResult::found(record.clone())
                    .with_cost(*cost_usd)
                    .with_research(notes.clone()),
            )),
            Script::Miss => Ok(None),
            Script::FailedResult(message) => Ok(Some(ScrapeResult::failed(message.clone()))),
            Script::Raise(message) => Err(SourceError::Transport(message.clone())),
            Script::RefuseCreate => unreachable!("create refuses before lookup"),
            Script::Echo => {
                if hints.record.get("panic").is_some() {
                    panic!("scripted panic for {}", hints.label());
                }
                let seen = hints.record.get("id").cloned().unwrap_or(Value::Null);
                Ok(Some(ScrapeResult::found(
                    EnrichmentRecord::new().with("seen_id", seen),
                )))
            }
            Script::WaitForCancel => {
                cancel.cancelled().await;
                Err(SourceError::Cancelled)
            }
        }
    }

    fn normalize(&self, raw: &Value) -> Result<EnrichmentRecord, SourceError> {
        match raw {
            Value::Object(map) => Ok(EnrichmentRecord::from(map.clone())),
            other => Err(SourceError::Parse(format!("expected object, got {}", other))),
        }
    }

    fn stats(&self) -> &AdapterStats {
        &self.stats
    }
}

/// A record with the given string fields.
pub fn record(fields: &[(&str, &str)]) -> EnrichmentRecord {
    fields.iter().map(|(k, v)| (*k, *v)).collect()
}
