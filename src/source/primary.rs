//! People-directory source (bearer-token JSON API)
//!
//! `lookup_one` first asks the person endpoint when the record names a
//! person (profile URL, email, or first + last name at a domain) and falls
//! back to a one-lead company search.

use super::error::SourceError;
use super::http::{response_items, HttpSession};
use super::normalize::lead_normalizer;
use super::traits::{Normalizer, SourceAdapter, SourceProvider};
use super::types::{AdapterStats, ScrapeResult, SearchCriteria, SourceKind};
use crate::config::PrimaryConfig;
use crate::record::{EnrichmentRecord, IdentityHints, FIRST_NAME, LAST_NAME};
use crate::throttle::{
    account_key, CancellationToken, LimiterRegistry, RateLimiter, RetryPolicy, RetryingExecutor,
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const NAME: &str = "primary-directory";
const RESULT_KEYS: &[&str] = &["results", "people", "data"];
const REF_KEYS: &[&str] = &["linkedin_url", "linkedinUrl", "profile_url"];
const PERSON_KEYS: &[&str] = &["person", "result"];

pub struct PrimaryDirectoryProvider {
    api_key: String,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    limiter: Arc<RateLimiter>,
    normalizer: Normalizer,
}

impl PrimaryDirectoryProvider {
    /// Fails with `Configuration` when no API key is set.
    pub fn new(
        config: &PrimaryConfig,
        retry: RetryPolicy,
        limiters: &LimiterRegistry,
    ) -> Result<Self, SourceError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| SourceError::Configuration("primary directory API key is required".into()))?;
        let limiter = limiters.limiter_for(
            SourceKind::Primary.as_str(),
            &account_key(&api_key),
            config.requests_per_minute,
        );
        Ok(Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
            retry,
            limiter,
            normalizer: lead_normalizer(),
        })
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// A fresh, unopened session with the directory-specific calls
    /// (`verify_email`) reachable.
    pub fn adapter(&self) -> PrimaryDirectoryAdapter {
        let executor = RetryingExecutor::new(self.retry.clone(), self.limiter.clone());
        PrimaryDirectoryAdapter {
            http: HttpSession::new(NAME, self.timeout, executor),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            normalizer: self.normalizer.clone(),
        }
    }
}

impl SourceProvider for PrimaryDirectoryProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::Primary
    }

    fn name(&self) -> &str {
        NAME
    }

    fn create(&self) -> Result<Box<dyn SourceAdapter>, SourceError> {
        Ok(Box::new(self.adapter()))
    }
}

pub struct PrimaryDirectoryAdapter {
    http: HttpSession,
    api_key: String,
    base_url: String,
    normalizer: Normalizer,
}

impl PrimaryDirectoryAdapter {
    async fn query(
        &mut self,
        criteria: &SearchCriteria,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScrapeResult>, SourceError> {
        let url = format!("{}/search/people", self.base_url);
        let payload = search_payload(criteria);
        let key = self.api_key.clone();
        tracing::debug!(source = NAME, %payload, "searching people");

        let body = self
            .http
            .send_json(cancel, |c| c.post(&url).bearer_auth(&key).json(&payload))
            .await?;
        let mut items = response_items(&body, RESULT_KEYS);
        items.truncate(criteria.max_results);
        Ok(self.http.collect_results(items, &self.normalizer, REF_KEYS))
    }

    /// One person by the identifiers in `params`. `None` when the directory
    /// does not know them.
    async fn lookup_person(
        &mut self,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<Option<ScrapeResult>, SourceError> {
        let url = format!("{}/lookup/person", self.base_url);
        let key = self.api_key.clone();

        let body = match self
            .http
            .send_json(cancel, |c| c.post(&url).bearer_auth(&key).json(&params))
            .await
        {
            Ok(body) => body,
            Err(SourceError::Http { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let person = PERSON_KEYS
            .iter()
            .find_map(|k| body.get(*k))
            .unwrap_or(&body);
        let empty = person.is_null() || person.as_object().is_some_and(|o| o.is_empty());
        if empty {
            return Ok(None);
        }
        Ok(self
            .http
            .collect_results(vec![person.clone()], &self.normalizer, REF_KEYS)
            .pop())
    }

    /// First lead at the hinted company, searching by domain, else by name.
    async fn company_lookup(
        &mut self,
        hints: &IdentityHints,
        cancel: &CancellationToken,
    ) -> Result<Option<ScrapeResult>, SourceError> {
        let mut criteria = match (&hints.company_domain, &hints.company_name) {
            (Some(domain), _) => SearchCriteria::for_domain(domain.clone()),
            (None, Some(name)) => SearchCriteria::for_company(name.clone()),
            (None, None) => return Ok(None),
        };
        criteria.leads_per_company = 1;
        if let Some(title) = &hints.job_title {
            criteria.job_titles.push(title.clone());
        }

        let results = match self.query(&criteria, cancel).await {
            Ok(results) => results,
            Err(SourceError::Cancelled) => return Err(SourceError::Cancelled),
            Err(e) => return Ok(Some(ScrapeResult::failed(e.to_string()))),
        };
        let first_failure = results.iter().find(|r| !r.success).cloned();
        Ok(results.into_iter().find(|r| r.success).or(first_failure))
    }

    /// Ask the directory whether `email` is deliverable. The verdict is
    /// returned as the service sent it.
    pub async fn verify_email(
        &mut self,
        email: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, SourceError> {
        let url = format!("{}/verify/email", self.base_url);
        let key = self.api_key.clone();
        let payload = json!({ "email": email });
        self.http
            .send_json(cancel, |c| c.post(&url).bearer_auth(&key).json(&payload))
            .await
    }
}

/// Person lookup parameters, most precise first: profile URL, email, then
/// first + last name at a company domain.
fn person_params(hints: &IdentityHints) -> Option<Value> {
    if let Some(url) = &hints.profile_url {
        return Some(json!({ "linkedin_url": url }));
    }
    if let Some(email) = &hints.email {
        return Some(json!({ "email": email }));
    }
    let domain = hints.company_domain.as_deref()?;
    let (first, last) = person_name(hints)?;
    Some(json!({ "first_name": first, "last_name": last, "company_domain": domain }))
}

fn person_name(hints: &IdentityHints) -> Option<(String, String)> {
    let record = &hints.record;
    if let (Some(first), Some(last)) = (record.first_str(FIRST_NAME), record.first_str(LAST_NAME)) {
        return Some((first.to_string(), last.to_string()));
    }
    let mut parts = hints.full_name.as_deref()?.split_whitespace();
    let first = parts.next()?;
    let last = parts.last()?;
    Some((first.to_string(), last.to_string()))
}

fn search_payload(criteria: &SearchCriteria) -> Value {
    let mut payload = Map::new();
    payload.insert("leads_per_company".into(), json!(criteria.leads_per_company));
    let lists = [
        ("domains", &criteria.company_domains),
        ("company_names", &criteria.company_names),
        ("job_titles", &criteria.job_titles),
        ("industries", &criteria.industries),
        ("locations", &criteria.locations),
    ];
    for (key, values) in lists {
        if !values.is_empty() {
            payload.insert(key.into(), json!(values));
        }
    }
    if let Some(keywords) = &criteria.keywords {
        payload.insert("keywords".into(), json!(keywords));
    }
    Value::Object(payload)
}

#[async_trait]
impl SourceAdapter for PrimaryDirectoryAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Primary
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
        let results = self.query(criteria, cancel).await?;
        tracing::info!(source = NAME, found = self.http.stats().items_found, "search finished");
        Ok(results)
    }

    async fn lookup_one(
        &mut self,
        hints: &IdentityHints,
        cancel: &CancellationToken,
    ) -> Result<Option<ScrapeResult>, SourceError> {
        let started = Instant::now();
        let mut person_failure = None;
        if let Some(params) = person_params(hints) {
            match self.lookup_person(params, cancel).await {
                Ok(Some(result)) if result.success => {
                    return Ok(Some(result.with_duration(started.elapsed())));
                }
                Ok(Some(failed)) => person_failure = Some(failed),
                Ok(None) => {}
                Err(SourceError::Cancelled) => return Err(SourceError::Cancelled),
                Err(e) => person_failure = Some(ScrapeResult::failed(e.to_string())),
            }
            tracing::debug!(source = NAME, record = hints.label(), "no person match, trying company search");
        }

        let result = match self.company_lookup(hints, cancel).await? {
            Some(hit) if hit.success => Some(hit),
            other => person_failure.or(other),
        };
        Ok(result.map(|r| r.with_duration(started.elapsed())))
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

    fn provider(server: &CannedServer) -> PrimaryDirectoryProvider {
        let config = PrimaryConfig {
            api_key: Some("test-key".into()),
            base_url: format!("{}/", server.base_url()),
            requests_per_minute: 60_000,
            timeout_secs: 5,
        };
        let retry = RetryPolicy {
            floor_ms: 10,
            ceiling_ms: 20,
            ..RetryPolicy::default()
        };
        PrimaryDirectoryProvider::new(&config, retry, &LimiterRegistry::new()).unwrap()
    }

    #[test]
    fn missing_key_is_configuration_error() {
        let err = PrimaryDirectoryProvider::new(
            &PrimaryConfig::default(),
            RetryPolicy::default(),
            &LimiterRegistry::new(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, SourceError::Configuration(_)));
    }

    #[test]
    fn providers_with_same_key_share_a_limiter() {
        let registry = LimiterRegistry::new();
        let config = PrimaryConfig {
            api_key: Some("shared".into()),
            ..PrimaryConfig::default()
        };
        let a = PrimaryDirectoryProvider::new(&config, RetryPolicy::default(), &registry).unwrap();
        let b = PrimaryDirectoryProvider::new(&config, RetryPolicy::default(), &registry).unwrap();
        assert!(Arc::ptr_eq(&a.limiter, &b.limiter));
    }

    #[tokio::test]
    async fn lookup_by_domain_returns_first_lead() {
        let server = CannedServer::start(vec![CannedServer::json(json!({
            "people": [{
                "first_name": "Jane",
                "last_name": "Doe",
                "title": "CEO",
                "email": "jane@acme.com",
                "linkedin_url": "https://linkedin.com/in/janedoe"
            }]
        }))])
        .await;
        let cancel = CancellationToken::new();
        let adapter = provider(&server).create().unwrap();
        let mut session = AdapterSession::open(adapter, &cancel).await.unwrap();

        let hints = IdentityHints::from_record(&EnrichmentRecord::new().with("domain", "acme.com"));
        let result = session.lookup_one(&hints, &cancel).await.unwrap().unwrap();
        let stats = session.close().await;

        assert!(result.success);
        let data = result.data.unwrap();
        assert_eq!(data.email(), Some("jane@acme.com"));
        assert_eq!(data.get_str("seniority_level"), Some("C-Level"));
        assert_eq!(result.source_ref.as_deref(), Some("https://linkedin.com/in/janedoe"));
        assert_eq!(stats.items_found, 1);

        let request = &server.requests()[0];
        assert!(request.starts_with("POST /search/people"));
        assert!(request.to_lowercase().contains("authorization: bearer test-key"));
        assert!(request.contains(r#""domains":["acme.com"]"#));
        assert!(request.contains(r#""leads_per_company":1"#));
    }

    #[tokio::test]
    async fn lookup_without_company_is_skipped() {
        let server = CannedServer::start(vec![]).await;
        let cancel = CancellationToken::new();
        let mut session = AdapterSession::open(provider(&server).create().unwrap(), &cancel)
            .await
            .unwrap();

        let result = session.lookup_one(&IdentityHints::default(), &cancel).await.unwrap();
        session.close().await;

        assert!(result.is_none());
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn empty_response_is_a_miss() {
        let server = CannedServer::start(vec![CannedServer::json(json!({"results": []}))]).await;
        let cancel = CancellationToken::new();
        let mut session = AdapterSession::open(provider(&server).create().unwrap(), &cancel)
            .await
            .unwrap();

        let hints = IdentityHints::from_record(&EnrichmentRecord::new().with("company", "Acme"));
        let result = session.lookup_one(&hints, &cancel).await.unwrap();
        session.close().await;

        assert!(result.is_none());
        assert!(server.requests()[0].contains(r#""company_names":["Acme"]"#));
    }

    #[tokio::test]
    async fn exhausted_retries_become_failed_result() {
        let server = CannedServer::start(vec![
            CannedServer::status(500),
            CannedServer::status(502),
            CannedServer::status(503),
        ])
        .await;
        let cancel = CancellationToken::new();
        let mut session = AdapterSession::open(provider(&server).create().unwrap(), &cancel)
            .await
            .unwrap();

        let hints = IdentityHints::from_record(&EnrichmentRecord::new().with("domain", "acme.com"));
        let result = session.lookup_one(&hints, &cancel).await.unwrap().unwrap();
        let stats = session.close().await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("503"));
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.failed_requests, 3);
    }

    #[tokio::test]
    async fn search_keeps_unparseable_items_as_failures() {
        let server = CannedServer::start(vec![CannedServer::json(json!({
            "results": [
                {"full_name": "Jane Doe", "company_name": "Acme"},
                {"job_title": "nobody"},
                {"full_name": "Raj Patel", "company_name": "Acme"}
            ]
        }))])
        .await;
        let cancel = CancellationToken::new();
        let mut session = AdapterSession::open(provider(&server).create().unwrap(), &cancel)
            .await
            .unwrap();

        let results = session
            .search(&SearchCriteria::for_company("Acme"), &cancel)
            .await
            .unwrap();
        let stats = session.close().await;

        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|r| r.success).count(), 2);
        assert_eq!(stats.items_found, 2);
        assert_eq!(stats.errors.len(), 1);
    }

    fn jane() -> Value {
        json!({
            "first_name": "Jane",
            "last_name": "Doe",
            "email": "jane@acme.com",
            "company_name": "Acme",
            "linkedin_url": "https://linkedin.com/in/janedoe"
        })
    }

    #[tokio::test]
    async fn email_hint_uses_person_lookup() {
        let server = CannedServer::start(vec![CannedServer::json(json!({"person": jane()}))]).await;
        let cancel = CancellationToken::new();
        let mut session = AdapterSession::open(provider(&server).create().unwrap(), &cancel)
            .await
            .unwrap();

        let record = EnrichmentRecord::new()
            .with("email", "jane@acme.com")
            .with("domain", "acme.com");
        let hints = IdentityHints::from_record(&record);
        let result = session.lookup_one(&hints, &cancel).await.unwrap().unwrap();
        let stats = session.close().await;

        assert!(result.success);
        assert_eq!(result.data.unwrap().full_name().as_deref(), Some("Jane Doe"));
        assert_eq!(result.source_ref.as_deref(), Some("https://linkedin.com/in/janedoe"));
        assert_eq!(stats.items_found, 1);

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("POST /lookup/person"));
        assert!(requests[0].to_lowercase().contains("authorization: bearer test-key"));
        assert!(requests[0].contains(r#""email":"jane@acme.com""#));
    }

    #[tokio::test]
    async fn profile_url_outranks_email() {
        let server = CannedServer::start(vec![CannedServer::json(json!({"result": jane()}))]).await;
        let cancel = CancellationToken::new();
        let mut session = AdapterSession::open(provider(&server).create().unwrap(), &cancel)
            .await
            .unwrap();

        let record = EnrichmentRecord::new()
            .with("email", "jane@acme.com")
            .with("linkedinUrl", "https://linkedin.com/in/janedoe");
        let result = session
            .lookup_one(&IdentityHints::from_record(&record), &cancel)
            .await
            .unwrap()
            .unwrap();
        session.close().await;

        assert!(result.success);
        let request = &server.requests()[0];
        assert!(request.contains(r#""linkedin_url":"https://linkedin.com/in/janedoe""#));
        assert!(!request.contains(r#""email""#));
    }

    #[tokio::test]
    async fn name_and_domain_identify_a_person() {
        let server = CannedServer::start(vec![CannedServer::json(jane())]).await;
        let cancel = CancellationToken::new();
        let mut session = AdapterSession::open(provider(&server).create().unwrap(), &cancel)
            .await
            .unwrap();

        let record = EnrichmentRecord::new()
            .with("full_name", "Jane Q. Doe")
            .with("company_domain", "acme.com");
        let result = session
            .lookup_one(&IdentityHints::from_record(&record), &cancel)
            .await
            .unwrap()
            .unwrap();
        session.close().await;

        assert!(result.success);
        let request = &server.requests()[0];
        assert!(request.starts_with("POST /lookup/person"));
        assert!(request.contains(r#""first_name":"Jane""#));
        assert!(request.contains(r#""last_name":"Doe""#));
        assert!(request.contains(r#""company_domain":"acme.com""#));
    }

    #[tokio::test]
    async fn unknown_person_falls_back_to_company_search() {
        let server = CannedServer::start(vec![
            CannedServer::status(404),
            CannedServer::json(json!({"people": [jane()]})),
        ])
        .await;
        let cancel = CancellationToken::new();
        let mut session = AdapterSession::open(provider(&server).create().unwrap(), &cancel)
            .await
            .unwrap();

        let record = EnrichmentRecord::new()
            .with("email", "j.doe@acme.com")
            .with("domain", "acme.com");
        let result = session
            .lookup_one(&IdentityHints::from_record(&record), &cancel)
            .await
            .unwrap()
            .unwrap();
        session.close().await;

        assert!(result.success);
        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].starts_with("POST /lookup/person"));
        assert!(requests[1].starts_with("POST /search/people"));
        assert!(requests[1].contains(r#""domains":["acme.com"]"#));
    }

    #[tokio::test]
    async fn empty_person_without_company_is_a_miss() {
        let server = CannedServer::start(vec![CannedServer::json(json!({"person": null}))]).await;
        let cancel = CancellationToken::new();
        let mut session = AdapterSession::open(provider(&server).create().unwrap(), &cancel)
            .await
            .unwrap();

        let hints = IdentityHints::from_record(&EnrichmentRecord::new().with("email", "x@y.io"));
        let result = session.lookup_one(&hints, &cancel).await.unwrap();
        session.close().await;

        assert!(result.is_none());
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn person_failure_survives_an_empty_company_search() {
        let server = CannedServer::start(vec![
            CannedServer::status(401),
            CannedServer::json(json!({"results": []})),
        ])
        .await;
        let cancel = CancellationToken::new();
        let mut session = AdapterSession::open(provider(&server).create().unwrap(), &cancel)
            .await
            .unwrap();

        let record = EnrichmentRecord::new()
            .with("email", "jane@acme.com")
            .with("company", "Acme");
        let result = session
            .lookup_one(&IdentityHints::from_record(&record), &cancel)
            .await
            .unwrap()
            .unwrap();
        session.close().await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("401"));
        assert_eq!(server.requests().len(), 2);
    }

    #[tokio::test]
    async fn verify_email_returns_the_verdict() {
        let server = CannedServer::start(vec![CannedServer::json(json!({
            "email": "jane@acme.com",
            "status": "valid",
            "deliverable": true
        }))])
        .await;
        let cancel = CancellationToken::new();
        let mut adapter = provider(&server).adapter();
        adapter.open(&cancel).await.unwrap();

        let verdict = adapter.verify_email("jane@acme.com", &cancel).await.unwrap();
        let stats = adapter.close().await;

        assert_eq!(verdict["status"], "valid");
        assert_eq!(stats.successful_requests, 1);
        let request = &server.requests()[0];
        assert!(request.starts_with("POST /verify/email"));
        assert!(request.contains(r#""email":"jane@acme.com""#));
    }
}
