//! Default normalizers
//!
//! Map source payloads onto canonical record keys. These are swappable via
//! `Normalizer`; the orchestrator never looks inside them.

use super::error::SourceError;
use super::traits::Normalizer;
use crate::record::EnrichmentRecord;
use regex_lite::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

/// Canonical key → accepted source spellings, in preference order.
const LEAD_FIELDS: &[(&str, &[&str])] = &[
    ("email", &["email", "email_address", "work_email", "emailAddress"]),
    ("first_name", &["first_name", "firstName", "given_name"]),
    ("last_name", &["last_name", "lastName", "family_name"]),
    ("full_name", &["full_name", "fullName", "name"]),
    ("job_title", &["job_title", "jobTitle", "title", "position", "headline"]),
    ("department", &["department"]),
    ("phone", &["phone", "phone_number", "mobile"]),
    ("linkedin_url", &["linkedin_url", "linkedinUrl", "profile_url", "url"]),
    ("company_name", &["company_name", "companyName", "company", "current_company"]),
    ("company_domain", &["company_domain", "companyDomain", "domain", "company_website"]),
];

const GENERIC_MAILBOXES: &[&str] = &[
    "info", "contact", "hello", "support", "sales", "admin", "office", "team", "help", "noreply",
    "no-reply", "mail", "enquiries", "inquiries",
];

/// Normalizer for person/lead payloads.
pub fn lead_normalizer() -> Normalizer {
    Arc::new(lead_record)
}

/// Normalizer for model-produced records that already use canonical keys.
pub fn research_normalizer() -> Normalizer {
    Arc::new(research_record)
}

/// Normalizer for crawled company sites.
pub fn site_normalizer() -> Normalizer {
    Arc::new(site_record)
}

/// Map a person payload into canonical lead fields.
///
/// Fails when the payload is not an object or carries nothing that
/// identifies a person (email, name or profile URL).
pub fn lead_record(raw: &Value) -> Result<EnrichmentRecord, SourceError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| SourceError::Parse(format!("expected object, got {}", type_name(raw))))?;

    let mut record = EnrichmentRecord::new();
    for (canonical, aliases) in LEAD_FIELDS {
        if let Some(value) = first_string(obj, aliases) {
            record.insert(*canonical, value);
        }
    }

    // Nested company objects are common in directory payloads.
    if let Some(company) = obj.get("company").and_then(Value::as_object) {
        if record.company_name().is_none() {
            if let Some(name) = first_string(company, &["name"]) {
                record.insert("company_name", name);
            }
        }
        if record.company_domain().is_none() {
            if let Some(domain) = first_string(company, &["domain", "website"]) {
                record.insert("company_domain", domain);
            }
        }
    }

    // Profile payloads keep the current role in the first experience entry.
    let current = obj
        .get("experiences")
        .or_else(|| obj.get("experience"))
        .and_then(Value::as_array)
        .and_then(|list| list.first())
        .and_then(Value::as_object);
    if let Some(exp) = current {
        if record.job_title().is_none() {
            if let Some(title) = first_string(exp, &["title"]) {
                record.insert("job_title", title);
            }
        }
        if record.company_name().is_none() {
            if let Some(company) = first_string(exp, &["company", "company_name"]) {
                record.insert("company_name", company);
            }
        }
    }

    match record.email().map(clean_email) {
        Some(Some(email)) => {
            record.insert("email", email);
        }
        Some(None) => {
            record.remove("email");
        }
        None => {}
    }
    if let Some(phone) = record.get_str("phone").map(clean_phone) {
        match phone {
            Some(p) => record.insert("phone", p),
            None => record.remove("phone"),
        };
    }
    if let Some(domain) = record.company_domain().and_then(extract_domain) {
        record.insert("company_domain", domain);
    }
    if let Some(full_name) = record.full_name() {
        record.insert("full_name", full_name);
    }
    if let Some(seniority) = record.job_title().and_then(infer_seniority) {
        record.insert("seniority_level", seniority);
    }
    if let Some(score) = obj.get("confidence_score").and_then(Value::as_f64) {
        record.insert("confidence_score", score);
    }

    if record.email().is_none() && record.full_name().is_none() && record.profile_url().is_none() {
        return Err(SourceError::Parse(
            "payload has no email, name or profile url".to_string(),
        ));
    }
    Ok(record)
}

/// Keep the non-empty fields of a canonical-key object, cleaning the email
/// and domain and filling in seniority when the title allows it.
pub fn research_record(raw: &Value) -> Result<EnrichmentRecord, SourceError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| SourceError::Parse(format!("expected object, got {}", type_name(raw))))?;

    let mut record: EnrichmentRecord = obj
        .iter()
        .filter(|(_, v)| match v {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty() && s.trim() != "null",
            _ => true,
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    match record.email().map(clean_email) {
        Some(Some(email)) => {
            record.insert("email", email);
        }
        Some(None) => {
            record.remove("email");
        }
        None => {}
    }
    if let Some(domain) = record.company_domain().and_then(extract_domain) {
        record.insert("company_domain", domain);
    }
    if record.get_str("seniority_level").is_none() {
        if let Some(seniority) = record.job_title().and_then(infer_seniority) {
            record.insert("seniority_level", seniority);
        }
    }
    Ok(record)
}

/// Turn a crawled site (`{"domain": .., "pages": {path: html}}`) into a
/// company record with contact emails and social profiles.
pub fn site_record(raw: &Value) -> Result<EnrichmentRecord, SourceError> {
    let domain = raw
        .get("domain")
        .and_then(Value::as_str)
        .ok_or_else(|| SourceError::Parse("crawl payload missing domain".to_string()))?;
    let pages = raw
        .get("pages")
        .and_then(Value::as_object)
        .ok_or_else(|| SourceError::Parse("crawl payload missing pages".to_string()))?;

    let mut emails = BTreeSet::new();
    let mut socials = Map::new();
    for html in pages.values().filter_map(Value::as_str) {
        for m in email_regex().find_iter(html) {
            if let Some(email) = clean_email(m.as_str()) {
                emails.insert(email);
            }
        }
        for caps in social_regex().captures_iter(html) {
            let network = caps[1].to_lowercase();
            let network = if network == "x" { "twitter".to_string() } else { network };
            socials
                .entry(network)
                .or_insert_with(|| Value::String(caps[0].to_string()));
        }
    }

    // Personal mailboxes first, generic ones last.
    let mut ranked: Vec<String> = emails.into_iter().collect();
    ranked.sort_by_key(|e| is_generic_email(e));

    let mut record = EnrichmentRecord::new()
        .with("company_domain", domain)
        .with("website", format!("https://{}", domain));
    if let Some(best) = ranked.first() {
        record.insert("email", best.clone());
    }
    if let Some(linkedin) = socials.get("linkedin") {
        record.insert("linkedin_company_url", linkedin.clone());
    }
    record.insert(
        "emails",
        Value::Array(ranked.into_iter().map(Value::String).collect()),
    );
    record.insert("social_links", Value::Object(socials));
    Ok(record)
}

/// Lowercase and validate an email address.
pub fn clean_email(email: &str) -> Option<String> {
    let email = email.trim().trim_start_matches("mailto:").to_lowercase();
    let (local, host) = email.split_once('@')?;
    if local.is_empty() || !host.contains('.') || host.starts_with('.') || host.ends_with('.') {
        return None;
    }
    Some(email)
}

/// Keep digits and a leading `+`; reject anything shorter than ten digits.
pub fn clean_phone(phone: &str) -> Option<String> {
    let cleaned: String = phone
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    (cleaned.len() >= 10).then_some(cleaned)
}

/// Bare lowercase host from a URL or domain, without `www.`.
pub fn extract_domain(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let host = match url::Url::parse(input) {
        Ok(parsed) if parsed.host_str().is_some() => parsed.host_str()?.to_string(),
        _ => input
            .split(['/', '?', '#'])
            .next()
            .unwrap_or(input)
            .to_string(),
    };
    let host = host.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    (!host.is_empty()).then(|| host.to_string())
}

pub fn is_generic_email(email: &str) -> bool {
    email
        .split('@')
        .next()
        .map(|local| GENERIC_MAILBOXES.contains(&local))
        .unwrap_or(false)
}

/// Coarse seniority bucket from a job title.
pub fn infer_seniority(title: &str) -> Option<&'static str> {
    let t = title.to_lowercase();
    if t.trim().is_empty() {
        return None;
    }
    let has_word = |words: &[&str]| {
        t.split(|c: char| !c.is_alphanumeric())
            .any(|w| words.contains(&w))
    };
    let level = if has_word(&["ceo", "cto", "cfo", "coo", "cmo", "chief", "founder", "owner"]) {
        "C-Level"
    } else if has_word(&["vp", "evp", "svp"]) || t.contains("vice president") {
        "VP"
    } else if t.contains("director") {
        "Director"
    } else if t.contains("manager") || t.contains("head of") {
        "Manager"
    } else if has_word(&["senior", "sr", "lead", "principal", "staff"]) {
        "Senior"
    } else if has_word(&["junior", "jr", "associate", "intern", "entry"]) {
        "Entry"
    } else {
        "Individual Contributor"
    };
    Some(level)
}

fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex")
    })
}

fn social_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"https?://(?:www\.)?(linkedin|twitter|x|facebook|instagram)\.com/[^\s"'<>]+"#)
            .expect("valid social regex")
    })
}
