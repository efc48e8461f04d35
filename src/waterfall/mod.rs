//! Waterfall enrichment: sequential fallback per record, bounded fan-out
//! across records

mod batch;
mod orchestrator;
mod outcome;
mod stats;

pub use batch::BatchRunner;
pub use orchestrator::{SourceToggles, WaterfallError, WaterfallOrchestrator, WaterfallState};
pub use outcome::{EnrichmentOutcome, RESERVED_KEYS};
pub use stats::PipelineStats;
