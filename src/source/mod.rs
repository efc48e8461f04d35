//! Data sources
//!
//! Every external source implements `SourceAdapter`; a `SourceProvider`
//! builds one adapter per session. Adapters share the HTTP plumbing in
//! `http`, and map payloads through a pluggable `Normalizer`.

mod ai;
mod error;
mod http;
mod network;
pub mod normalize;
mod primary;
mod session;
mod traits;
mod types;
mod website;

#[cfg(test)]
mod test_support;

pub use ai::{extract_json, AiResearcherAdapter, AiResearcherProvider};
pub use error::SourceError;
pub use http::HttpSession;
pub use network::{ProfileNetworkAdapter, ProfileNetworkProvider};
pub use normalize::{lead_normalizer, research_normalizer, site_normalizer};
pub use primary::{PrimaryDirectoryAdapter, PrimaryDirectoryProvider};
pub use session::AdapterSession;
pub use traits::{Normalizer, SourceAdapter, SourceProvider};
pub use types::{
    AdapterStats, EnrichmentSource, ResearchNotes, ScrapeResult, SearchCriteria, SourceKind,
};
pub use website::{WebsiteCrawlerAdapter, WebsiteCrawlerProvider};
