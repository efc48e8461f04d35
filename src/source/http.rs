//! HTTP session shared by the network-backed adapters
//!
//! Owns the session's `reqwest::Client` and `AdapterStats`, and sends every
//! request through the source's `RetryingExecutor`.

use super::error::SourceError;
use super::traits::Normalizer;
use super::types::{AdapterStats, ScrapeResult};
use crate::throttle::{CancellationToken, RetryingExecutor};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;

const USER_AGENT: &str = concat!("cascade/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY: usize = 300;

/// Client + stats for one adapter session.
pub struct HttpSession {
    name: String,
    timeout: Duration,
    executor: RetryingExecutor,
    client: Option<Client>,
    stats: AdapterStats,
}

impl HttpSession {
    pub fn new(name: impl Into<String>, timeout: Duration, executor: RetryingExecutor) -> Self {
        Self {
            name: name.into(),
            timeout,
            executor,
            client: None,
            stats: AdapterStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.client.is_some()
    }

    /// Build the client and reset the counters.
    pub fn open(&mut self) -> Result<(), SourceError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SourceError::Configuration(format!("http client: {}", e)))?;
        self.client = Some(client);
        self.stats = AdapterStats::started();
        Ok(())
    }

    /// Drop the client, finalize and log the counters.
    pub fn close(&mut self) -> AdapterStats {
        self.client = None;
        self.stats.finish();
        tracing::info!(
            source = %self.name,
            requests = self.stats.total_requests,
            success_rate = self.stats.success_rate(),
            items_found = self.stats.items_found,
            duration_s = self.stats.duration_seconds(),
            "session finished"
        );
        self.stats.clone()
    }

    pub fn stats(&self) -> &AdapterStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut AdapterStats {
        &mut self.stats
    }

    /// Send a request built by `build` and decode the JSON body.
    pub async fn send_json<F>(
        &mut self,
        cancel: &CancellationToken,
        build: F,
    ) -> Result<Value, SourceError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| SourceError::SessionNotOpen(self.name.clone()))?;
        self.executor
            .execute(&self.name, &mut self.stats, cancel, || {
                let request = build(client);
                async move {
                    let response = check_status(request.send().await?).await?;
                    Ok(response.json::<Value>().await?)
                }
            })
            .await
    }

    /// Send a request built by `build` and return the body text.
    pub async fn send_text<F>(
        &mut self,
        cancel: &CancellationToken,
        build: F,
    ) -> Result<String, SourceError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| SourceError::SessionNotOpen(self.name.clone()))?;
        self.executor
            .execute(&self.name, &mut self.stats, cancel, || {
                let request = build(client);
                async move {
                    let response = check_status(request.send().await?).await?;
                    Ok(response.text().await?)
                }
            })
            .await
    }

    /// Normalize each item. Items that fail become failed results and item
    /// errors in the stats; the rest count as found.
    pub fn collect_results(
        &mut self,
        items: Vec<Value>,
        normalizer: &Normalizer,
        ref_keys: &[&str],
    ) -> Vec<ScrapeResult> {
        let mut results = Vec::with_capacity(items.len());
        let mut found = 0;
        for item in items {
            match normalizer(&item) {
                Ok(record) => {
                    let source_ref = ref_keys
                        .iter()
                        .find_map(|k| item.get(*k).and_then(Value::as_str))
                        .map(str::to_string);
                    let mut result = ScrapeResult::found(record);
                    if let Some(r) = source_ref {
                        result = result.with_source_ref(r);
                    }
                    results.push(result.with_raw(item));
                    found += 1;
                }
                Err(e) => {
                    tracing::warn!(source = %self.name, error = %e, "skipping unparseable item");
                    self.stats.record_item_error(e.to_string());
                    results.push(ScrapeResult::failed(e.to_string()).with_raw(item));
                }
            }
        }
        self.stats.add_items(found);
        results
    }
}

/// The result list of a response body: the body itself when it is an array,
/// otherwise the first array found under `keys`.
pub fn response_items(body: &Value, keys: &[&str]) -> Vec<Value> {
    if let Value::Array(items) = body {
        return items.clone();
    }
    keys.iter()
        .find_map(|k| body.get(*k).and_then(Value::as_array))
        .cloned()
        .unwrap_or_default()
}

async fn check_status(response: Response) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut message = response.text().await.unwrap_or_default();
    if message.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    if message.is_empty() {
        message = status.canonical_reason().unwrap_or("error").to_string();
    }
    Err(SourceError::Http {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::test_support::{fast_executor, CannedServer};
    use serde_json::json;

    #[tokio::test]
    async fn retries_server_error_then_decodes() {
        let server = CannedServer::start(vec![
            CannedServer::status(503),
            CannedServer::json(json!({"ok": true})),
        ])
        .await;
        let mut http = HttpSession::new("test", Duration::from_secs(5), fast_executor());
        http.open().unwrap();

        let url = server.url("/ping");
        let body = http
            .send_json(&CancellationToken::new(), |c| c.get(&url))
            .await
            .unwrap();

        assert_eq!(body, json!({"ok": true}));
        let stats = http.close();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.successful_requests, 1);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = CannedServer::start(vec![CannedServer::status(401)]).await;
        let mut http = HttpSession::new("test", Duration::from_secs(5), fast_executor());
        http.open().unwrap();

        let url = server.url("/");
        let err = http
            .send_json(&CancellationToken::new(), |c| c.get(&url))
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Http { status: 401, .. }));
        assert_eq!(http.stats().total_requests, 1);
    }

    #[test]
    fn response_items_checks_keys_in_order() {
        assert_eq!(
            response_items(&json!({"people": [1], "data": [2]}), &["results", "people", "data"]),
            vec![json!(1)]
        );
        assert_eq!(response_items(&json!([3]), &["results"]), vec![json!(3)]);
        assert!(response_items(&json!({"results": "x"}), &["results"]).is_empty());
    }

    #[test]
    fn unparseable_items_become_failed_results() {
        let mut http = HttpSession::new("test", Duration::from_secs(5), fast_executor());
        let normalizer = crate::source::normalize::lead_normalizer();
        let results = http.collect_results(
            vec![json!({"email": "a@b.co", "url": "https://x/a"}), json!({"title": "CEO"})],
            &normalizer,
            &["linkedin_url", "url"],
        );

        assert!(results[0].success);
        assert_eq!(results[0].source_ref.as_deref(), Some("https://x/a"));
        assert!(!results[1].success);
        assert!(results[1].error.is_some());
        assert_eq!(http.stats().items_found, 1);
        assert_eq!(http.stats().errors.len(), 1);
        assert_eq!(http.stats().failed_requests, 0);
    }

    #[tokio::test]
    async fn unopened_session_refuses_requests() {
        let mut http = HttpSession::new("test", Duration::from_secs(5), fast_executor());
        let err = http
            .send_text(&CancellationToken::new(), |c| c.get("http://127.0.0.1:9/"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::SessionNotOpen(_)));
    }
}
