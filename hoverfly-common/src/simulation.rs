//! Simulation dataset types
//!
//! A simulation is the declarative rule set pushed to the proxy. Pairs are held
//! in an insertion-ordered set: two pairs that are equal in every field collapse
//! to one entry. Delays stay an ordered list.

use crate::canonical::hash_value;
use indexmap::IndexSet;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

/// Schema version written into every simulation produced by this crate.
pub const SCHEMA_VERSION: &str = "v5.2";

/// Schema versions the control plane is known to accept without upgrade.
pub const SUPPORTED_SCHEMA_VERSIONS: &[&str] = &["v5", "v5.1", "v5.2", "v5.3"];

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

fn default_status() -> u16 {
    200
}

/// Schema fields this model does not interpret. They are carried through
/// unchanged and take part in equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extensions(pub BTreeMap<String, Value>);

impl Extensions {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Hash for Extensions {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for (key, value) in &self.0 {
            key.hash(state);
            hash_value(value, state);
        }
    }
}

/// A single field matcher, e.g. `{"matcher": "exact", "value": "/api"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMatcher {
    pub matcher: String,
    pub value: Value,
    #[serde(flatten)]
    pub extra: Extensions,
}

impl Hash for FieldMatcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.matcher.hash(state);
        hash_value(&self.value, state);
        self.extra.hash(state);
    }
}

impl FieldMatcher {
    pub fn new(matcher: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            matcher: matcher.into(),
            value: value.into(),
            extra: Extensions::default(),
        }
    }

    pub fn exact(value: impl Into<Value>) -> Self {
        Self::new("exact", value)
    }

    pub fn glob(value: impl Into<Value>) -> Self {
        Self::new("glob", value)
    }

    pub fn regex(value: impl Into<Value>) -> Self {
        Self::new("regex", value)
    }
}

/// Request side of a pair. Each field is an ordered list of matchers;
/// `[a, b]` and `[b, a]` are different matchers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMatcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<FieldMatcher>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<Vec<FieldMatcher>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Vec<FieldMatcher>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<Vec<FieldMatcher>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<FieldMatcher>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, Vec<FieldMatcher>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Vec<FieldMatcher>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "BTreeMap::is_empty")]
    pub requires_state: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Extensions,
}

impl RequestMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: &str) -> Self {
        self.method = Some(vec![FieldMatcher::exact(method)]);
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(vec![FieldMatcher::exact(path)]);
        self
    }

    pub fn destination(mut self, destination: &str) -> Self {
        self.destination = Some(vec![FieldMatcher::exact(destination)]);
        self
    }

    pub fn scheme(mut self, scheme: &str) -> Self {
        self.scheme = Some(vec![FieldMatcher::exact(scheme)]);
        self
    }

    pub fn body(mut self, matcher: FieldMatcher) -> Self {
        self.body.get_or_insert_with(Vec::new).push(matcher);
        self
    }

    pub fn header(mut self, name: &str, matcher: FieldMatcher) -> Self {
        self.headers.entry(name.to_string()).or_default().push(matcher);
        self
    }

    pub fn query(mut self, name: &str, matcher: FieldMatcher) -> Self {
        self.query.entry(name.to_string()).or_default().push(matcher);
        self
    }
}

/// Response side of a pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub encoded_body: bool,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub templated: bool,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "BTreeMap::is_empty")]
    pub transitions_state: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub removes_state: Vec<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub fixed_delay: u64,
    #[serde(flatten)]
    pub extra: Extensions,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: default_status(),
            body: String::new(),
            encoded_body: false,
            headers: BTreeMap::new(),
            templated: false,
            transitions_state: BTreeMap::new(),
            removes_state: Vec::new(),
            fixed_delay: 0,
            extra: Extensions::default(),
        }
    }
}

impl Response {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }
}

/// Immutable request matcher / response pair with optional labels.
///
/// Equality and hashing are structural over every field, which is what
/// makes set-based deduplication of pairs well defined.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestResponsePair {
    pub request: RequestMatcher,
    pub response: Response,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "BTreeSet::is_empty")]
    pub labels: BTreeSet<String>,
}

impl RequestResponsePair {
    pub fn new(request: RequestMatcher, response: Response) -> Self {
        Self {
            request,
            response,
            labels: BTreeSet::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }
}

/// Artificial latency for requests matching `url_pattern`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelaySetting {
    pub url_pattern: String,
    #[serde(rename = "delay")]
    pub delay_millis: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub http_method: String,
}

impl DelaySetting {
    pub fn new(url_pattern: impl Into<String>, delay_millis: u64) -> Self {
        Self {
            url_pattern: url_pattern.into(),
            delay_millis,
            http_method: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalActions {
    /// Ordered; earlier entries are consulted first by the proxy.
    #[serde(default, deserialize_with = "nullable")]
    pub delays: Vec<DelaySetting>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub delays_log_normal: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationData {
    #[serde(default, deserialize_with = "nullable")]
    pub pairs: IndexSet<RequestResponsePair>,
    #[serde(default)]
    pub global_actions: GlobalActions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(default)]
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hoverfly_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_exported: Option<String>,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            hoverfly_version: None,
            time_exported: None,
        }
    }
}

impl Meta {
    pub fn is_supported(&self) -> bool {
        SUPPORTED_SCHEMA_VERSIONS.contains(&self.schema_version.as_str())
    }
}

/// Complete simulation document: `{ data: { pairs, globalActions }, meta }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    #[serde(default)]
    pub data: SimulationData,
    #[serde(default)]
    pub meta: Meta,
}

impl Simulation {
    /// An empty simulation; pushing it clears the proxy's dataset.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = RequestResponsePair>) -> Self {
        let mut simulation = Self::default();
        simulation.data.pairs.extend(pairs);
        simulation
    }

    pub fn with_delay(mut self, delay: DelaySetting) -> Self {
        self.data.global_actions.delays.push(delay);
        self
    }

    pub fn pairs(&self) -> &IndexSet<RequestResponsePair> {
        &self.data.pairs
    }

    pub fn delays(&self) -> &[DelaySetting] {
        &self.data.global_actions.delays
    }

    pub fn is_empty(&self) -> bool {
        self.data.pairs.is_empty()
            && self.data.global_actions.delays.is_empty()
            && self.data.global_actions.delays_log_normal.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "data": {
            "pairs": [
                {
                    "request": {
                        "path": [{"matcher": "exact", "value": "/api/bookings"}],
                        "method": [{"matcher": "exact", "value": "GET"}],
                        "query": null,
                        "deprecatedQuery": {"a": ["b"]}
                    },
                    "response": {
                        "status": 200,
                        "body": "{\"bookingId\":\"1\"}",
                        "headers": {"Content-Type": ["application/json"]},
                        "templated": false
                    }
                }
            ],
            "globalActions": {
                "delays": [{"urlPattern": "api\\.example\\.com", "delay": 150}]
            }
        },
        "meta": {"schemaVersion": "v5.2", "hoverflyVersion": "v1.5.3"}
    }"#;

    #[test]
    fn test_parse_document() {
        let simulation: Simulation = serde_json::from_str(DOCUMENT).unwrap();
        assert_eq!(simulation.pairs().len(), 1);
        assert_eq!(simulation.delays()[0].delay_millis, 150);
        assert!(simulation.meta.is_supported());

        let pair = simulation.pairs().first().unwrap();
        assert!(pair.request.query.is_empty());
        assert!(pair.request.extra.0.contains_key("deprecatedQuery"));
    }

    #[test]
    fn test_unknown_fields_survive_serialization() {
        let simulation: Simulation = serde_json::from_str(DOCUMENT).unwrap();
        let json = serde_json::to_value(&simulation).unwrap();
        assert_eq!(
            json["data"]["pairs"][0]["request"]["deprecatedQuery"]["a"][0],
            "b"
        );
        assert_eq!(json["data"]["globalActions"]["delays"][0]["delay"], 150);
    }

    #[test]
    fn test_duplicate_pairs_collapse_on_parse() {
        let pair = RequestResponsePair::new(RequestMatcher::new().path("/a"), Response::ok("x"));
        let json = serde_json::json!({
            "data": {"pairs": [pair.clone(), pair.clone()]},
            "meta": {"schemaVersion": "v5.2"}
        });
        let simulation: Simulation = serde_json::from_value(json).unwrap();
        assert_eq!(simulation.pairs().len(), 1);
    }

    #[test]
    fn test_matcher_order_is_significant() {
        let a = RequestMatcher {
            path: Some(vec![FieldMatcher::exact("/a"), FieldMatcher::glob("/*")]),
            ..Default::default()
        };
        let b = RequestMatcher {
            path: Some(vec![FieldMatcher::glob("/*"), FieldMatcher::exact("/a")]),
            ..Default::default()
        };
        let simulation = Simulation::from_pairs(vec![
            RequestResponsePair::new(a, Response::ok("")),
            RequestResponsePair::new(b, Response::ok("")),
        ]);
        assert_eq!(simulation.pairs().len(), 2);
    }

    #[test]
    fn test_missing_schema_version_is_blank() {
        let simulation: Simulation = serde_json::from_str(r#"{"data": {}, "meta": {}}"#).unwrap();
        assert!(simulation.meta.schema_version.is_empty());
        assert!(!simulation.meta.is_supported());
    }

    #[test]
    fn test_default_response_status() {
        let response: Response = serde_json::from_str(r#"{"body": "hi"}"#).unwrap();
        assert_eq!(response.status, 200);
    }
}
