//! LLM research source
//!
//! Calls a messages-style completion API and asks for JSON back. Every call's
//! token usage is recorded in the provider's shared `CostEstimator`; results
//! from `lookup_one` carry the call's cost and the model's research notes.

use super::error::SourceError;
use super::http::{response_items, HttpSession};
use super::normalize::{lead_normalizer, research_normalizer};
use super::traits::{Normalizer, SourceAdapter, SourceProvider};
use super::types::{AdapterStats, ResearchNotes, ScrapeResult, SearchCriteria, SourceKind};
use crate::config::AiConfig;
use crate::cost::{CostEstimator, PricingTable};
use crate::record::{EnrichmentRecord, IdentityHints};
use crate::throttle::{
    account_key, CancellationToken, LimiterRegistry, RateLimiter, RetryPolicy, RetryingExecutor,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const NAME: &str = "ai-researcher";
const SYSTEM_PROMPT: &str =
    "You are a helpful B2B research assistant. Always respond with valid JSON.";

const ENRICH_PROMPT: &str = r#"You are a comprehensive B2B lead enrichment assistant.

Given a lead with partial information, enrich it with as much additional data as possible.

Current Lead Data:
{current_data}

Your task:
1. Fill in any missing standard fields
2. Validate existing information
3. Find additional contact methods
4. Score the lead quality

Respond in JSON format:
{
    "enriched_data": {
        "first_name": "value or null",
        "last_name": "value or null",
        "full_name": "value or null",
        "job_title": "value or null",
        "department": "value or null",
        "seniority_level": "value or null",
        "email": "value or null",
        "phone": "value or null",
        "linkedin_url": "value or null",
        "company_name": "value or null",
        "company_domain": "value or null"
    },
    "alternate_emails": ["email1@example.com"],
    "alternate_companies": [{"company": "Company Name", "role": "Role there"}],
    "confidence_score": 0.0-1.0,
    "enrichment_summary": "One or two sentences on what was found and how reliable it is"
}

Only include information you are confident about. Use null for unknown fields."#;

const CONTACTS_PROMPT: &str = r#"You are a B2B contact research assistant. Your task is to find decision-makers at a company.

Company Information:
- Company Name: {company_name}
- Website/Domain: {domain}

Target Criteria:
- Job Titles: {job_titles}
- Number of contacts needed: {leads_count}

Provide potential contacts at this company in JSON format:
{
    "contacts": [
        {
            "first_name": "First name",
            "last_name": "Last name",
            "full_name": "Full name",
            "job_title": "Current job title",
            "department": "Department",
            "linkedin_url": "LinkedIn profile URL (if known)",
            "confidence_score": 0.0-1.0,
            "reasoning": "Why this person is a good fit"
        }
    ]
}

Only include contacts you have reasonable confidence exist. Do NOT make up names."#;

pub struct AiResearcherProvider {
    api_key: String,
    config: AiConfig,
    retry: RetryPolicy,
    limiter: Arc<RateLimiter>,
    costs: Arc<CostEstimator>,
    normalizer: Normalizer,
}

impl AiResearcherProvider {
    /// Fails with `Configuration` when no API key is set.
    pub fn new(
        config: &AiConfig,
        pricing: PricingTable,
        retry: RetryPolicy,
        limiters: &LimiterRegistry,
    ) -> Result<Self, SourceError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| SourceError::Configuration("AI researcher API key is required".into()))?;
        let limiter = limiters.limiter_for(
            SourceKind::Ai.as_str(),
            &account_key(&api_key),
            config.requests_per_minute,
        );
        let mut config = config.clone();
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self {
            api_key,
            costs: Arc::new(CostEstimator::with_pricing(config.model.clone(), pricing)),
            config,
            retry,
            limiter,
            normalizer: research_normalizer(),
        })
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Token totals shared by every session of this provider.
    pub fn cost_estimator(&self) -> Arc<CostEstimator> {
        self.costs.clone()
    }
}

impl SourceProvider for AiResearcherProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::Ai
    }

    fn name(&self) -> &str {
        NAME
    }

    fn create(&self) -> Result<Box<dyn SourceAdapter>, SourceError> {
        let executor = RetryingExecutor::new(self.retry.clone(), self.limiter.clone());
        Ok(Box::new(AiResearcherAdapter {
            http: HttpSession::new(NAME, Duration::from_secs(self.config.timeout_secs), executor),
            api_key: self.api_key.clone(),
            config: self.config.clone(),
            costs: self.costs.clone(),
            normalizer: self.normalizer.clone(),
        }))
    }
}

/// One billed model reply.
#[derive(Debug)]
struct Reply {
    text: String,
    cost_usd: f64,
}

impl Reply {
    /// The JSON object in the reply; a reply without one is a parse error.
    fn json(&self) -> Result<Value, SourceError> {
        extract_json(&self.text).ok_or_else(|| {
            let preview: String = self.text.chars().take(200).collect();
            SourceError::Parse(format!("model reply is not JSON: {}", preview))
        })
    }

    /// Failed result for a reply that could not be used. Still billed.
    fn failed(&self, error: &SourceError) -> ScrapeResult {
        ScrapeResult::failed(error.to_string())
            .with_cost(self.cost_usd)
            .with_raw(json!({"raw_response": self.text}))
    }
}

pub struct AiResearcherAdapter {
    http: HttpSession,
    api_key: String,
    config: AiConfig,
    costs: Arc<CostEstimator>,
    normalizer: Normalizer,
}

impl AiResearcherAdapter {
    async fn ask(&mut self, prompt: String, cancel: &CancellationToken) -> Result<Reply, SourceError> {
        let url = format!("{}/v1/messages", self.config.base_url);
        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": SYSTEM_PROMPT,
            "messages": [{"role": "user", "content": prompt}],
        });
        let key = self.api_key.clone();
        let version = self.config.api_version.clone();

        let response = self
            .http
            .send_json(cancel, |c| {
                c.post(&url)
                    .header("x-api-key", key.as_str())
                    .header("anthropic-version", version.as_str())
                    .json(&body)
            })
            .await?;

        let usage = response.get("usage");
        let tokens = |field: &str| usage.and_then(|u| u.get(field)).and_then(Value::as_u64).unwrap_or(0);
        let (input_tokens, output_tokens) = (tokens("input_tokens"), tokens("output_tokens"));
        let cost_usd = self.costs.record(input_tokens, output_tokens);
        tracing::debug!(source = NAME, input_tokens, output_tokens, cost_usd, "model call");

        let text = response_items(&response, &["content"])
            .into_iter()
            .find_map(|block| block.get("text").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
        Ok(Reply { text, cost_usd })
    }

    /// Record an unusable reply as an item error and turn it into a failed
    /// result.
    fn reject(&mut self, reply: &Reply, error: SourceError) -> ScrapeResult {
        tracing::warn!(source = NAME, error = %error, "unusable model reply");
        self.http.stats_mut().record_item_error(error.to_string());
        reply.failed(&error)
    }
}

/// Pull a JSON object out of a model reply: the whole text, a fenced block,
/// or the span from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    let fenced = ["```json", "```"].iter().find_map(|fence| {
        let start = trimmed.find(fence)? + fence.len();
        let after = &trimmed[start..];
        after.find("```").map(|end| &after[..end])
    });
    let braces = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(&trimmed[start..=end]),
        _ => None,
    };

    [Some(trimmed), fenced, braces]
        .into_iter()
        .flatten()
        .find_map(|candidate| {
            serde_json::from_str::<Value>(candidate.trim())
                .ok()
                .filter(Value::is_object)
        })
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Object(obj) => {
                let company = obj.get("company").or_else(|| obj.get("name"))?.as_str()?;
                match obj.get("role").and_then(Value::as_str) {
                    Some(role) if !role.is_empty() => Some(format!("{} ({})", company, role)),
                    _ => Some(company.to_string()),
                }
            }
            _ => None,
        })
        .collect()
}

fn research_notes(data: &Value) -> ResearchNotes {
    let reasoning_note = ["enrichment_summary", "summary"]
        .iter()
        .find_map(|k| data.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    ResearchNotes {
        alternate_emails: string_list(data.get("alternate_emails")),
        alternate_companies: string_list(data.get("alternate_companies")),
        reasoning_note,
        confidence_score: data.get("confidence_score").and_then(Value::as_f64),
    }
}

fn placeholder(value: &str) -> &str {
    if value.is_empty() {
        "unknown"
    } else {
        value
    }
}

#[async_trait]
impl SourceAdapter for AiResearcherAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Ai
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

    /// Find contacts for each company named by domain or name.
    async fn search(
        &mut self,
        criteria: &SearchCriteria,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScrapeResult>, SourceError> {
        let companies: Vec<(String, String)> = criteria
            .company_domains
            .iter()
            .map(|d| (String::new(), d.clone()))
            .chain(criteria.company_names.iter().map(|n| (n.clone(), String::new())))
            .collect();
        let titles = if criteria.job_titles.is_empty() {
            "decision-makers".to_string()
        } else {
            criteria.job_titles.join(", ")
        };
        let contacts = lead_normalizer();

        let mut results = Vec::new();
        for (name, domain) in companies {
            let prompt = CONTACTS_PROMPT
                .replace("{company_name}", placeholder(&name))
                .replace("{domain}", placeholder(&domain))
                .replace("{job_titles}", &titles)
                .replace("{leads_count}", &criteria.leads_per_company.to_string());
            let reply = self.ask(prompt, cancel).await?;
            let data = match reply.json() {
                Ok(data) => data,
                Err(e) => {
                    results.push(self.reject(&reply, e));
                    continue;
                }
            };
            let mut items = response_items(&data, &["contacts"]);
            items.truncate(criteria.leads_per_company as usize);
            for item in items.iter_mut() {
                if let Some(obj) = item.as_object_mut() {
                    if !domain.is_empty() {
                        obj.entry("company_domain").or_insert_with(|| json!(domain));
                    }
                    if !name.is_empty() {
                        obj.entry("company_name").or_insert_with(|| json!(name));
                    }
                }
            }
            results.extend(self.http.collect_results(items, &contacts, &["linkedin_url"]));
            if results.len() >= criteria.max_results {
                results.truncate(criteria.max_results);
                break;
            }
        }
        Ok(results)
    }

    async fn lookup_one(
        &mut self,
        hints: &IdentityHints,
        cancel: &CancellationToken,
    ) -> Result<Option<ScrapeResult>, SourceError> {
        let current = serde_json::to_string_pretty(&hints.record)?;
        let prompt = ENRICH_PROMPT.replace("{current_data}", &current);
        let started = Instant::now();

        let reply = match self.ask(prompt, cancel).await {
            Ok(reply) => reply,
            Err(SourceError::Cancelled) => return Err(SourceError::Cancelled),
            Err(e) => {
                return Ok(Some(
                    ScrapeResult::failed(e.to_string()).with_duration(started.elapsed()),
                ))
            }
        };

        let parsed = reply.json().and_then(|data| {
            let enriched = match data.get("enriched_data") {
                Some(enriched) if enriched.is_object() => enriched,
                _ => {
                    return Err(SourceError::Parse(
                        "model reply has no enriched_data object".into(),
                    ))
                }
            };
            let record = (self.normalizer)(enriched)?;
            Ok((data, record))
        });
        let (data, record) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                let failed = self.reject(&reply, e);
                return Ok(Some(failed.with_duration(started.elapsed())));
            }
        };
        if record.is_empty() {
            tracing::debug!(source = NAME, hint = hints.label(), "model found nothing");
            return Ok(None);
        }

        self.http.stats_mut().add_items(1);
        let notes = research_notes(&data);
        Ok(Some(
            ScrapeResult::found(record)
                .with_cost(reply.cost_usd)
                .with_research(notes)
                .with_raw(data)
                .with_duration(started.elapsed()),
        ))
    }

    fn normalize(&self, raw: &Value) -> Result<EnrichmentRecord, SourceError> {
        (self.normalizer)(raw)
    }

    fn stats(&self) -> &AdapterStats {
        self.http.stats()
    }
}
