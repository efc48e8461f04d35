//! Contact/company records and the identity hints derived from them
//!
//! A record is an open mapping: known fields have typed accessors that accept
//! the usual spellings, and every other key passes through untouched. A null
//! or blank value is treated the same as a missing key.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const EMAIL: &[&str] = &["email"];
pub const FULL_NAME: &[&str] = &["full_name", "fullName", "name"];
pub const FIRST_NAME: &[&str] = &["first_name", "firstName"];
pub const LAST_NAME: &[&str] = &["last_name", "lastName"];
pub const JOB_TITLE: &[&str] = &["job_title", "jobTitle", "title"];
pub const COMPANY_NAME: &[&str] = &["company_name", "companyName", "company"];
pub const COMPANY_DOMAIN: &[&str] = &["company_domain", "companyDomain", "domain"];
pub const PROFILE_URL: &[&str] = &["linkedin_url", "linkedinUrl", "profile_url", "profileUrl"];

/// A partial contact/company record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnrichmentRecord(Map<String, Value>);

impl EnrichmentRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Non-blank string value for `key`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// First non-blank string among `keys`.
    pub fn first_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get_str(k))
    }

    pub fn email(&self) -> Option<&str> {
        self.first_str(EMAIL)
    }

    /// Full name, composed from first/last name when not given directly.
    pub fn full_name(&self) -> Option<String> {
        if let Some(name) = self.first_str(FULL_NAME) {
            return Some(name.to_string());
        }
        let parts: Vec<&str> = [self.first_str(FIRST_NAME), self.first_str(LAST_NAME)]
            .into_iter()
            .flatten()
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    pub fn job_title(&self) -> Option<&str> {
        self.first_str(JOB_TITLE)
    }

    pub fn company_name(&self) -> Option<&str> {
        self.first_str(COMPANY_NAME)
    }

    pub fn company_domain(&self) -> Option<&str> {
        self.first_str(COMPANY_DOMAIN)
    }

    pub fn profile_url(&self) -> Option<&str> {
        self.first_str(PROFILE_URL)
    }

    /// Overlay `other` onto this record. Null values in `other` never
    /// overwrite an existing value.
    pub fn merge_from(&mut self, other: &EnrichmentRecord) {
        for (key, value) in other.iter() {
            if value.is_null() && self.0.contains_key(key) {
                continue;
            }
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for EnrichmentRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for EnrichmentRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Identity hints a source uses to look up one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityHints {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub job_title: Option<String>,
    pub company_name: Option<String>,
    pub company_domain: Option<String>,
    pub profile_url: Option<String>,
    /// The whole input record, for sources that reason over everything.
    pub record: EnrichmentRecord,
}

impl IdentityHints {
    pub fn from_record(record: &EnrichmentRecord) -> Self {
        Self {
            email: record.email().map(str::to_string),
            full_name: record.full_name(),
            job_title: record.job_title().map(str::to_string),
            company_name: record.company_name().map(str::to_string),
            company_domain: record.company_domain().map(str::to_string),
            profile_url: record.profile_url().map(str::to_string),
            record: record.clone(),
        }
    }

    pub fn has_company(&self) -> bool {
        self.company_domain.is_some() || self.company_name.is_some()
    }

    /// Short label for log lines.
    pub fn label(&self) -> &str {
        self.email
            .as_deref()
            .or(self.full_name.as_deref())
            .or(self.company_domain.as_deref())
            .or(self.company_name.as_deref())
            .unwrap_or("<anonymous>")
    }
}
