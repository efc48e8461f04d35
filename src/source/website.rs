//! Company website crawler
//!
//! Fetches the homepage plus the configured contact/about/team pages and
//! hands the HTML to the site normalizer. Pages that fail are skipped.
//! Company-level only, so it is not a waterfall stage.

use super::error::SourceError;
use super::http::HttpSession;
use super::normalize::{extract_domain, site_normalizer};
use super::traits::{Normalizer, SourceAdapter, SourceProvider};
use super::types::{AdapterStats, ScrapeResult, SearchCriteria, SourceKind};
use crate::config::WebsiteConfig;
use crate::record::{EnrichmentRecord, IdentityHints};
use crate::throttle::{CancellationToken, LimiterRegistry, RateLimiter, RetryPolicy, RetryingExecutor};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const NAME: &str = "website-crawler";

pub struct WebsiteCrawlerProvider {
    config: WebsiteConfig,
    retry: RetryPolicy,
    limiter: Arc<RateLimiter>,
    normalizer: Normalizer,
}

impl WebsiteCrawlerProvider {
    pub fn new(config: &WebsiteConfig, retry: RetryPolicy, limiters: &LimiterRegistry) -> Self {
        let limiter =
            limiters.limiter_for(SourceKind::Website.as_str(), "public", config.requests_per_minute);
        Self {
            config: config.clone(),
            retry,
            limiter,
            normalizer: site_normalizer(),
        }
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }
}

impl SourceProvider for WebsiteCrawlerProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::Website
    }

    fn name(&self) -> &str {
        NAME
    }

    fn create(&self) -> Result<Box<dyn SourceAdapter>, SourceError> {
        // Missing pages are common; don't retry them.
        let retry = RetryPolicy {
            retry_client_errors: false,
            ..self.retry.clone()
        };
        let executor = RetryingExecutor::new(retry, self.limiter.clone());
        Ok(Box::new(WebsiteCrawlerAdapter {
            http: HttpSession::new(NAME, Duration::from_secs(self.config.timeout_secs), executor),
            config: self.config.clone(),
            normalizer: self.normalizer.clone(),
        }))
    }
}

pub struct WebsiteCrawlerAdapter {
    http: HttpSession,
    config: WebsiteConfig,
    normalizer: Normalizer,
}

impl WebsiteCrawlerAdapter {
    /// Crawl one site. `None` when the site was reachable but yielded no
    /// contact details.
    async fn crawl(
        &mut self,
        site: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ScrapeResult>, SourceError> {
        let Some(domain) = extract_domain(site) else {
            return Ok(None);
        };
        let base = format!("{}://{}", self.config.scheme, domain);
        let started = Instant::now();

        let paths: Vec<String> = std::iter::once("/".to_string())
            .chain(self.config.pages.iter().cloned())
            .collect();
        let mut pages = Map::new();
        for path in paths {
            let url = format!("{}{}", base, path);
            match self.http.send_text(cancel, |c| c.get(&url)).await {
                Ok(html) => {
                    pages.insert(path, Value::String(html));
                }
                Err(SourceError::Cancelled) => return Err(SourceError::Cancelled),
                Err(e) => tracing::debug!(source = NAME, %url, error = %e, "page skipped"),
            }
        }

        if pages.is_empty() {
            return Ok(Some(
                ScrapeResult::failed(format!("{} unreachable", base))
                    .with_duration(started.elapsed()),
            ));
        }

        let fetched: Vec<String> = pages.keys().cloned().collect();
        let raw = json!({"domain": domain, "pages": pages});
        let record = match (self.normalizer)(&raw) {
            Ok(record) => record,
            Err(e) => {
                self.http.stats_mut().record_item_error(e.to_string());
                return Ok(Some(ScrapeResult::failed(e.to_string())));
            }
        };

        let has_contacts = record.email().is_some()
            || record
                .get("social_links")
                .and_then(Value::as_object)
                .is_some_and(|links| !links.is_empty());
        if !has_contacts {
            return Ok(None);
        }

        self.http.stats_mut().add_items(1);
        Ok(Some(
            ScrapeResult::found(record)
                .with_source_ref(base)
                .with_raw(json!({"domain": domain, "pages": fetched}))
                .with_duration(started.elapsed()),
        ))
    }
}

#[async_trait]
impl SourceAdapter for WebsiteCrawlerAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Website
    }

    fn name(&self) -> &str {
        NAME
    }

    async fn open(&mut self, _cancel: &CancellationToken) -> Result<(), SourceError> {
        self.http.open()
    }

    async fn close(&mut self) -> AdapterStats {
        self.http.close()
    }

    async fn search(
        &mut self,
        criteria: &SearchCriteria,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScrapeResult>, SourceError> {
        let mut results = Vec::new();
        for domain in criteria.company_domains.iter().take(criteria.max_results) {
            if let Some(result) = self.crawl(domain, cancel).await? {
                results.push(result);
            }
        }
        Ok(results)
    }

    async fn lookup_one(
        &mut self,
        hints: &IdentityHints,
        cancel: &CancellationToken,
    ) -> Result<Option<ScrapeResult>, SourceError> {
        match hints.company_domain.as_deref() {
            Some(domain) => self.crawl(domain, cancel).await,
            None => Ok(None),
        }
    }

    fn normalize(&self, raw: &Value) -> Result<EnrichmentRecord, SourceError> {
        (self.normalizer)(raw)
    }

    fn stats(&self) -> &AdapterStats {
        self.http.stats()
    }
}
