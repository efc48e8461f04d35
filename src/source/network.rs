//! Professional-network profile source (dataset trigger + snapshot polling)
//!
//! A trigger either answers inline or hands back a `snapshot_id`, which is
//! polled until it reports `ready` or `failed`, or the poll budget runs out.

use super::error::SourceError;
use super::http::{response_items, HttpSession};
use super::normalize::lead_normalizer;
use super::traits::{Normalizer, SourceAdapter, SourceProvider};
use super::types::{AdapterStats, ScrapeResult, SearchCriteria, SourceKind};
use crate::config::NetworkConfig;
use crate::record::{EnrichmentRecord, IdentityHints};
use crate::throttle::{
    account_key, CancellationToken, LimiterRegistry, RateLimiter, RetryPolicy, RetryingExecutor,
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const NAME: &str = "profile-network";
const RESULT_KEYS: &[&str] = &["results", "data"];
const REF_KEYS: &[&str] = &["linkedin_url", "url", "profile_url"];

#[derive(Clone)]
struct Credentials {
    username: String,
    password: String,
}

pub struct ProfileNetworkProvider {
    credentials: Credentials,
    config: NetworkConfig,
    retry: RetryPolicy,
    limiter: Arc<RateLimiter>,
    normalizer: Normalizer,
}

impl ProfileNetworkProvider {
    /// Fails with `Configuration` unless both username and password are set.
    pub fn new(
        config: &NetworkConfig,
        retry: RetryPolicy,
        limiters: &LimiterRegistry,
    ) -> Result<Self, SourceError> {
        let present = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        let (username, password) = match (present(&config.username), present(&config.password)) {
            (Some(u), Some(p)) => (u, p),
            _ => {
                return Err(SourceError::Configuration(
                    "profile network username and password are required".into(),
                ))
            }
        };
        let limiter = limiters.limiter_for(
            SourceKind::Network.as_str(),
            &account_key(&username),
            config.requests_per_minute,
        );
        let mut config = config.clone();
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self {
            credentials: Credentials { username, password },
            config,
            retry,
            limiter,
            normalizer: lead_normalizer(),
        })
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }
}

impl SourceProvider for ProfileNetworkProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::Network
    }

    fn name(&self) -> &str {
        NAME
    }

    fn create(&self) -> Result<Box<dyn SourceAdapter>, SourceError> {
        let executor = RetryingExecutor::new(self.retry.clone(), self.limiter.clone());
        Ok(Box::new(ProfileNetworkAdapter {
            http: HttpSession::new(NAME, Duration::from_secs(self.config.timeout_secs), executor),
            credentials: self.credentials.clone(),
            config: self.config.clone(),
            normalizer: self.normalizer.clone(),
        }))
    }
}

pub struct ProfileNetworkAdapter {
    http: HttpSession,
    credentials: Credentials,
    config: NetworkConfig,
    normalizer: Normalizer,
}

impl ProfileNetworkAdapter {
    /// Trigger `dataset` with `input` and return its normalized results.
    async fn trigger(
        &mut self,
        dataset: &str,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScrapeResult>, SourceError> {
        let url = format!("{}/datasets/v3/trigger", self.config.base_url);
        let body = json!({"dataset_id": dataset, "input": input, "format": "json"});
        let creds = self.credentials.clone();

        let response = self
            .http
            .send_json(cancel, |c| {
                c.post(&url)
                    .basic_auth(&creds.username, Some(&creds.password))
                    .json(&body)
            })
            .await?;

        if let Some(snapshot_id) = response.get("snapshot_id").and_then(Value::as_str) {
            tracing::debug!(source = NAME, dataset, snapshot_id, "waiting for snapshot");
            return self.poll_snapshot(snapshot_id, cancel).await;
        }
        let items = response_items(&response, RESULT_KEYS);
        Ok(self.http.collect_results(items, &self.normalizer, REF_KEYS))
    }

    async fn poll_snapshot(
        &mut self,
        snapshot_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScrapeResult>, SourceError> {
        let url = format!(
            "{}/datasets/v3/snapshot/{}",
            self.config.base_url, snapshot_id
        );
        let creds = self.credentials.clone();
        let interval = self.config.poll_interval();

        for attempt in 1..=self.config.poll_attempts {
            let polled = self
                .http
                .send_json(cancel, |c| {
                    c.get(&url)
                        .basic_auth(&creds.username, Some(&creds.password))
                        .query(&[("format", "json")])
                })
                .await;

            match polled {
                Ok(body) => {
                    let status = body.get("status").and_then(Value::as_str).unwrap_or("");
                    if body.is_array() || status == "ready" {
                        let items = response_items(&body, RESULT_KEYS);
                        return Ok(self.http.collect_results(items, &self.normalizer, REF_KEYS));
                    }
                    if status == "failed" {
                        let error = body
                            .get("error")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error")
                            .to_string();
                        tracing::warn!(source = NAME, snapshot_id, %error, "snapshot failed");
                        return Ok(vec![ScrapeResult::failed(error)]);
                    }
                    tracing::debug!(source = NAME, snapshot_id, attempt, status, "snapshot pending");
                }
                Err(SourceError::Cancelled) => return Err(SourceError::Cancelled),
                Err(e) => {
                    tracing::warn!(source = NAME, snapshot_id, attempt, error = %e, "snapshot poll failed");
                }
            }

            cancel
                .run_until_cancelled(async {
                    tokio::time::sleep(interval).await;
                    Ok(())
                })
                .await?;
        }

        Ok(vec![ScrapeResult::failed(format!(
            "polling timeout after {} attempts",
            self.config.poll_attempts
        ))])
    }
}

fn search_input(criteria: &SearchCriteria) -> Value {
    let mut input = Map::new();
    input.insert("max_results".into(), json!(criteria.max_results));
    let lists = [
        ("job_titles", &criteria.job_titles),
        ("companies", &criteria.company_names),
        ("industries", &criteria.industries),
        ("locations", &criteria.locations),
    ];
    for (key, values) in lists {
        if !values.is_empty() {
            input.insert(key.into(), json!(values));
        }
    }
    if let Some(keywords) = &criteria.keywords {
        input.insert("keywords".into(), json!(keywords));
    }
    Value::Object(input)
}

/// Profiles rarely carry an email, so they get a lower default confidence.
fn with_default_confidence(mut result: ScrapeResult) -> ScrapeResult {
    if let Some(data) = result.data.as_mut() {
        if data.get("confidence_score").is_none() {
            let score = if data.email().is_some() { 0.7 } else { 0.5 };
            data.insert("confidence_score", score);
        }
    }
    result
}

#[async_trait]
impl SourceAdapter for ProfileNetworkAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Network
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
        let (dataset, input) = if criteria.profile_urls.is_empty() {
            (self.config.search_dataset.clone(), search_input(criteria))
        } else {
            let urls: Vec<Value> = criteria
                .profile_urls
                .iter()
                .map(|url| json!({"url": url}))
                .collect();
            (self.config.profile_dataset.clone(), Value::Array(urls))
        };
        let mut results = self.trigger(&dataset, input, cancel).await?;
        results.truncate(criteria.max_results);
        Ok(results.into_iter().map(with_default_confidence).collect())
    }

    async fn lookup_one(
        &mut self,
        hints: &IdentityHints,
        cancel: &CancellationToken,
    ) -> Result<Option<ScrapeResult>, SourceError> {
        let Some(profile_url) = hints.profile_url.clone() else {
            return Ok(None);
        };
        let dataset = self.config.profile_dataset.clone();
        let started = Instant::now();

        let results = match self
            .trigger(&dataset, json!([{"url": profile_url}]), cancel)
            .await
        {
            Ok(results) => results,
            Err(SourceError::Cancelled) => return Err(SourceError::Cancelled),
            Err(e) => {
                return Ok(Some(
                    ScrapeResult::failed(e.to_string()).with_duration(started.elapsed()),
                ))
            }
        };

        let Some(mut result) = results.into_iter().next() else {
            return Ok(None);
        };
        if result.source_ref.is_none() {
            result = result.with_source_ref(profile_url);
        }
        Ok(Some(
            with_default_confidence(result).with_duration(started.elapsed()),
        ))
    }

    fn normalize(&self, raw: &Value) -> Result<EnrichmentRecord, SourceError> {
        (self.normalizer)(raw)
    }

    fn stats(&self) -> &AdapterStats {
        self.http.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::session::AdapterSession;
    use crate::source::test_support::CannedServer;

    fn config(server: &CannedServer) -> NetworkConfig {
        NetworkConfig {
            username: Some("user".into()),
            password: Some("pass".into()),
            base_url: server.base_url(),
            requests_per_minute: 60_000,
            timeout_secs: 5,
            poll_attempts: 3,
            poll_interval_secs: 0,
            ..NetworkConfig::default()
        }
    }

    fn retry() -> RetryPolicy {
        RetryPolicy {
            floor_ms: 10,
            ceiling_ms: 20,
            ..RetryPolicy::default()
        }
    }

    async fn session(server: &CannedServer) -> AdapterSession {
        let provider =
            ProfileNetworkProvider::new(&config(server), retry(), &LimiterRegistry::new()).unwrap();
        AdapterSession::open(provider.create().unwrap(), &CancellationToken::new())
            .await
            .unwrap()
    }

    fn profile_hints() -> IdentityHints {
        IdentityHints::from_record(
            &EnrichmentRecord::new().with("linkedin_url", "https://linkedin.com/in/janedoe"),
        )
    }

    #[test]
    fn password_is_required() {
        let config = NetworkConfig {
            username: Some("user".into()),
            ..NetworkConfig::default()
        };
        let err = ProfileNetworkProvider::new(&config, retry(), &LimiterRegistry::new())
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::Configuration(_)));
    }

    #[tokio::test]
    async fn inline_profile_result() {
        let server = CannedServer::start(vec![CannedServer::json(json!({
            "data": [{"name": "Jane Doe", "headline": "Director of Sales", "current_company": "Acme"}]
        }))])
        .await;
        let mut session = session(&server).await;
        let cancel = CancellationToken::new();

        let result = session
            .lookup_one(&profile_hints(), &cancel)
            .await
            .unwrap()
            .unwrap();
        session.close().await;

        assert!(result.success);
        let data = result.data.unwrap();
        assert_eq!(data.company_name(), Some("Acme"));
        assert_eq!(data.get("confidence_score"), Some(&json!(0.5)));
        assert_eq!(result.source_ref.as_deref(), Some("https://linkedin.com/in/janedoe"));

        let request = &server.requests()[0];
        assert!(request.starts_with("POST /datasets/v3/trigger"));
        assert!(request.to_lowercase().contains("authorization: basic"));
        assert!(request.contains(r#""dataset_id":"gd_linkedin_profile""#));
    }

    #[tokio::test]
    async fn snapshot_is_polled_until_ready() {
        let server = CannedServer::start(vec![
            CannedServer::json(json!({"snapshot_id": "s_123"})),
            CannedServer::json(json!({"status": "running"})),
            CannedServer::json(json!({
                "status": "ready",
                "results": [{"full_name": "Jane Doe", "email": "jane@acme.com"}]
            })),
        ])
        .await;
        let mut session = session(&server).await;
        let cancel = CancellationToken::new();

        let result = session
            .lookup_one(&profile_hints(), &cancel)
            .await
            .unwrap()
            .unwrap();
        session.close().await;

        assert!(result.success);
        assert_eq!(result.data.unwrap().get("confidence_score"), Some(&json!(0.7)));
        let requests = server.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[1].starts_with("GET /datasets/v3/snapshot/s_123?format=json"));
    }

    #[tokio::test]
    async fn failed_snapshot_is_a_failed_result() {
        let server = CannedServer::start(vec![
            CannedServer::json(json!({"snapshot_id": "s_9"})),
            CannedServer::json(json!({"status": "failed", "error": "profile private"})),
        ])
        .await;
        let mut session = session(&server).await;

        let result = session
            .lookup_one(&profile_hints(), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        session.close().await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("profile private"));
    }

    #[tokio::test]
    async fn polling_gives_up_after_budget() {
        let server = CannedServer::start(vec![
            CannedServer::json(json!({"snapshot_id": "s_1"})),
            CannedServer::json(json!({"status": "running"})),
            CannedServer::json(json!({"status": "running"})),
            CannedServer::json(json!({"status": "running"})),
        ])
        .await;
        let mut session = session(&server).await;

        let result = session
            .lookup_one(&profile_hints(), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        session.close().await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("polling timeout"));
        assert_eq!(server.requests().len(), 4);
    }

    #[tokio::test]
    async fn lookup_needs_profile_url() {
        let server = CannedServer::start(vec![]).await;
        let mut session = session(&server).await;
        let hints = IdentityHints::from_record(&EnrichmentRecord::new().with("domain", "acme.com"));

        let result = session.lookup_one(&hints, &CancellationToken::new()).await.unwrap();
        session.close().await;

        assert!(result.is_none());
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn people_search_uses_search_dataset() {
        let server = CannedServer::start(vec![CannedServer::json(json!({
            "results": [{"name": "A One"}, {"name": "B Two"}]
        }))])
        .await;
        let mut session = session(&server).await;

        let criteria = SearchCriteria {
            job_titles: vec!["CTO".into()],
            company_names: vec!["Acme".into()],
            ..SearchCriteria::default()
        };
        let results = session.search(&criteria, &CancellationToken::new()).await.unwrap();
        session.close().await;

        assert_eq!(results.len(), 2);
        let request = &server.requests()[0];
        assert!(request.contains(r#""dataset_id":"gd_linkedin_people_search""#));
        assert!(request.contains(r#""companies":["Acme"]"#));
    }
}
