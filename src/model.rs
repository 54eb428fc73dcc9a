//! Scenario state and the hypermedia shapes the steps understand.

use crate::template::VariableStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// `$context` of a collection envelope.
pub const LIST_CONTEXT: &str = "https://github.com/ResourcefulHumans/rheactor-models#List";
/// `$context` of a reference object.
pub const REFERENCE_CONTEXT: &str =
    "https://github.com/ResourcefulHumans/rheactor-models#Reference";
/// `$context` stamped on every parsed token record.
pub const TOKEN_CONTEXT: &str = "https://tools.ietf.org/html/rfc7519";

/// Mutable state of one running scenario.
#[derive(Debug, Default)]
pub struct ScenarioContext {
    /// Created on first request and reused so cookies persist.
    pub(crate) client: Option<reqwest::Client>,
    /// Header name to template; sent with every following request.
    pub headers: BTreeMap<String, String>,
    pub body: RequestBody,
    /// Last request issued, kept for failure messages.
    pub pending_request: Option<PendingRequest>,
    pub response: Option<StoredResponse>,
    /// Transport error of the last request.
    pub error: Option<String>,
    pub variables: VariableStore,
}

impl ScenarioContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    /// Remove a header regardless of the case it was set with.
    pub fn clear_header(&mut self, name: &str) {
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
    }
}

/// Body to send with the next request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Object members without the outer braces; templated before sending.
    Fragment(String),
    /// Sent exactly as given.
    Raw(String),
}

/// Method and URL of the last request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub method: String,
    pub url: String,
}

/// Last received HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: u16,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
    /// Parsed JSON body, `Null` when the body was empty or not JSON.
    pub body: Value,
    pub text: String,
    /// Set once a list-filter step has replaced `body.items`.
    #[serde(default)]
    pub filtered: bool,
}

impl StoredResponse {
    pub fn new(status: u16, headers: HashMap<String, String>, text: String) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Self {
            status,
            headers,
            body,
            text,
            filtered: false,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The Nth (1-based) entry of `body.items`.
    pub fn item(&self, num: usize) -> Option<&Value> {
        self.body.get("items")?.get(num.checked_sub(1)?)
    }
}

/// An entry of a `$links` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HypermediaLink {
    #[serde(default)]
    pub rel: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    pub href: String,
    #[serde(default)]
    pub list: bool,
}

impl HypermediaLink {
    /// Links of `node`; entries that do not look like links are skipped.
    pub fn all_of(node: &Value) -> Vec<HypermediaLink> {
        node.get("$links")
            .and_then(Value::as_array)
            .map(|links| {
                links
                    .iter()
                    .filter_map(|l| serde_json::from_value(l.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Outcome of one sentence in a scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Outcome of a whole scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,
    pub success: bool,
    pub error: Option<String>,
    pub steps: Vec<StepReport>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_lowercases_headers() {
        let mut headers = HashMap::new();
        headers.insert("Location".to_string(), "/foo".to_string());
        let response = StoredResponse::new(302, headers, String::new());
        assert_eq!(response.header("location"), Some("/foo"));
        assert_eq!(response.header("LOCATION"), Some("/foo"));
        assert_eq!(response.body, Value::Null);
    }

    #[test]
    fn test_item_is_one_based() {
        let response = StoredResponse::new(
            200,
            HashMap::new(),
            r#"{"items":[{"id":1},{"id":2}]}"#.to_string(),
        );
        assert_eq!(response.item(1), Some(&json!({"id": 1})));
        assert_eq!(response.item(2), Some(&json!({"id": 2})));
        assert_eq!(response.item(0), None);
        assert_eq!(response.item(3), None);
    }

    #[test]
    fn test_links_skip_malformed_entries() {
        let node = json!({"$links": [
            {"rel": "self", "href": "/a"},
            {"rel": "broken"},
            {"subject": "urn:x", "href": "/b", "list": true}
        ]});
        let links = HypermediaLink::all_of(&node);
        assert_eq!(links.len(), 2);
        assert!(links[1].list);
        assert_eq!(links[0].rel.as_deref(), Some("self"));
    }

    #[test]
    fn test_clear_header_ignores_case() {
        let mut ctx = ScenarioContext::new();
        ctx.set_header("Authorization", "Bearer x");
        ctx.clear_header("authorization");
        assert!(ctx.headers.is_empty());
    }
}
