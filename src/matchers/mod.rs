//! The declarative matcher engine (spec §4.1): [`StringMatcher`] wraps a
//! single predicate + expected value; [`StringMatcherSlice`] and
//! [`MultiMapMatcher`] compose those over lists and multi-maps; and
//! [`BodyMatcher`]/[`RequestMatcher`] assemble the full per-request
//! predicate described in spec §3/§4.1. Wire (de)serialization lives
//! alongside each type rather than in a separate codec module, following
//! `src/data.rs` in the teacher, which keeps the wire shape and the type
//! it belongs to in one place.

pub mod predicate;

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as DeError;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::model::{MultiMap, Request};

/// `predicate-name + expected-value` (spec §3/§6). Wire form is either a
/// bare string (predicate defaults to `Equal`) or `{matcher, value}`.
/// Round-trips per spec §8 invariant 5/6: an `Equal` matcher serializes
/// back to a bare string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringMatcher {
    pub predicate_name: String,
    pub value: String,
}

impl StringMatcher {
    pub fn equal(value: impl Into<String>) -> Self {
        Self { predicate_name: "Equal".into(), value: value.into() }
    }

    pub fn new(predicate_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { predicate_name: predicate_name.into(), value: value.into() }
    }

    /// Resolve the predicate name and evaluate it against `actual`.
    /// An unknown predicate name fails the match — it never panics, and
    /// is logged once here (spec §4.1 "error conditions").
    pub fn matches(&self, actual: &str) -> bool {
        match predicate::resolve(&self.predicate_name) {
            Some(p) => p.evaluate(actual, &self.value),
            None => {
                tracing::debug!(predicate = %self.predicate_name, "unknown predicate name, match fails");
                false
            }
        }
    }

    /// Validate that the predicate name is in the closed set (spec §4.2).
    pub fn validate(&self) -> Result<(), String> {
        if predicate::resolve(&self.predicate_name).is_some() {
            Ok(())
        } else {
            Err(format!("unknown predicate '{}'", self.predicate_name))
        }
    }
}

impl<'de> Deserialize<'de> for StringMatcher {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Bare(String),
            Full {
                #[serde(default = "default_matcher_name")]
                matcher: String,
                value: String,
            },
        }
        fn default_matcher_name() -> String {
            "Equal".to_string()
        }
        Ok(match Wire::deserialize(deserializer)? {
            Wire::Bare(value) => StringMatcher::equal(value),
            Wire::Full { matcher, value } => StringMatcher::new(matcher, value),
        })
    }
}

impl Serialize for StringMatcher {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if self.predicate_name == "Equal" {
            serializer.serialize_str(&self.value)
        } else {
            let mut s = serializer.serialize_struct("StringMatcher", 2)?;
            s.serialize_field("matcher", &self.predicate_name)?;
            s.serialize_field("value", &self.value)?;
            s.end()
        }
    }
}

/// An ordered list of [`StringMatcher`]s matching a list of actual
/// strings iff every matcher finds at least one satisfying actual
/// (spec §4.1 "at-least-one-of-each", order-insensitive, idempotent).
#[derive(Debug, Clone, Default)]
pub struct StringMatcherSlice(pub Vec<StringMatcher>);

impl StringMatcherSlice {
    pub fn single(m: StringMatcher) -> Self {
        Self(vec![m])
    }

    pub fn matches(&self, actuals: &[String]) -> bool {
        if self.0.len() > actuals.len() {
            return false;
        }
        self.0.iter().all(|m| actuals.iter().any(|a| m.matches(a)))
    }

    pub fn validate(&self) -> Result<(), String> {
        self.0.iter().try_for_each(|m| m.validate())
    }
}

impl<'de> Deserialize<'de> for StringMatcherSlice {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Single(StringMatcher),
            Many(Vec<StringMatcher>),
        }
        Ok(match Wire::deserialize(deserializer)? {
            Wire::Single(m) => StringMatcherSlice(vec![m]),
            Wire::Many(v) => StringMatcherSlice(v),
        })
    }
}

impl Serialize for StringMatcherSlice {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if self.0.len() == 1 {
            self.0[0].serialize(serializer)
        } else {
            self.0.serialize(serializer)
        }
    }
}

/// Maps a key to a [`StringMatcherSlice`]; matches an actual multi-map iff
/// every key in the matcher exists in the actual and its slice matches
/// the corresponding value list. Keys in the matcher are a required
/// subset — extra keys in the actual are permitted (spec §4.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiMapMatcher(pub BTreeMap<String, StringMatcherSlice>);

impl MultiMapMatcher {
    pub fn matches(&self, actual: &MultiMap) -> bool {
        self.0.iter().all(|(key, slice)| {
            actual.get(key).map(|values| slice.matches(values)).unwrap_or(false)
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        self.0.values().try_for_each(|s| s.validate())
    }

    /// Normalizes keys to lower-case, for header matching where keys are
    /// compared case-insensitively (spec §4.1). Query-parameter matching
    /// leaves keys untouched.
    pub fn lower_case_keys(self) -> Self {
        MultiMapMatcher(self.0.into_iter().map(|(k, v)| (k.to_ascii_lowercase(), v)).collect())
    }
}

/// Either a single [`StringMatcher`] over the raw body string, or a
/// mapping from JSON-path to [`StringMatcher`] evaluated against the
/// parsed body (spec §4.1 "BodyMatcher dispatch"). String-matcher shape
/// is tried first; a payload only falls back to the path map when it
/// isn't shaped like `<string>` or `{matcher, value}` (see DESIGN.md for
/// the documented ambiguity this creates for a two-key path map named
/// exactly `matcher`/`value`).
#[derive(Debug, Clone)]
pub enum BodyMatcher {
    Raw(StringMatcher),
    Paths(BTreeMap<String, StringMatcher>),
}

impl BodyMatcher {
    pub fn matches(&self, raw: &str, json: &Option<Value>) -> bool {
        match self {
            BodyMatcher::Raw(m) => m.matches(raw),
            BodyMatcher::Paths(paths) => paths.iter().all(|(path, matcher)| {
                let Some(json) = json else { return false };
                match lookup_json_path(json, path) {
                    Some(value) => matcher.matches(&stringify(value)),
                    None => false,
                }
            }),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            BodyMatcher::Raw(m) => m.validate(),
            BodyMatcher::Paths(paths) => paths.values().try_for_each(|m| m.validate()),
        }
    }
}

impl<'de> Deserialize<'de> for BodyMatcher {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Single(StringMatcher),
            Paths(BTreeMap<String, StringMatcher>),
        }
        Ok(match Wire::deserialize(deserializer)? {
            Wire::Single(m) => BodyMatcher::Raw(m),
            Wire::Paths(p) => BodyMatcher::Paths(p),
        })
    }
}

impl Serialize for BodyMatcher {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            BodyMatcher::Raw(m) => m.serialize(serializer),
            BodyMatcher::Paths(p) => p.serialize(serializer),
        }
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Dot-notation JSON-path lookup supporting array indices, e.g.
/// `user.name` or `items[0].id`.
fn lookup_json_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        let (name, indices) = split_indices(segment);
        if !name.is_empty() {
            current = current.as_object()?.get(name)?;
        }
        for idx in indices {
            current = current.as_array()?.get(idx)?;
        }
    }
    Some(current)
}

/// Splits `"items[0][1]"` into `("items", [0, 1])`.
fn split_indices(segment: &str) -> (&str, Vec<usize>) {
    let mut indices = Vec::new();
    let name_end = segment.find('[').unwrap_or(segment.len());
    let (name, mut rest) = segment.split_at(name_end);
    while let Some(open) = rest.find('[') {
        let close = match rest[open..].find(']') {
            Some(c) => open + c,
            None => break,
        };
        if let Ok(idx) = rest[open + 1..close].parse::<usize>() {
            indices.push(idx);
        }
        rest = &rest[close + 1..];
    }
    (name, indices)
}

/// The full per-request predicate (spec §3/§4.3): method ∧ path ∧ query ∧
/// headers ∧ body, each absent facet treated as match-all.
#[derive(Debug, Clone, Default)]
pub struct RequestMatcher {
    pub method: Option<StringMatcher>,
    pub path: Option<StringMatcher>,
    pub query: Option<MultiMapMatcher>,
    pub headers: Option<MultiMapMatcher>,
    pub body: Option<BodyMatcher>,
}

impl RequestMatcher {
    pub fn matches(&self, req: &Request) -> bool {
        self.failing_facets(req).is_empty()
    }

    /// Names of the facets that fail to match, used to build the
    /// closest-miss diagnostic on a no-match response (spec §4.3).
    pub fn failing_facets(&self, req: &Request) -> Vec<&'static str> {
        let mut failing = Vec::new();
        if let Some(m) = &self.method {
            if !m.matches(&req.method) {
                failing.push("method");
            }
        }
        if let Some(m) = &self.path {
            if !m.matches(&req.path) {
                failing.push("path");
            }
        }
        if let Some(m) = &self.query {
            if !m.matches(&req.query) {
                failing.push("query");
            }
        }
        if let Some(m) = &self.headers {
            if !m.matches(&req.headers) {
                failing.push("headers");
            }
        }
        if let Some(m) = &self.body {
            if !m.matches(&req.body_raw, &req.body_json) {
                failing.push("body");
            }
        }
        failing
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(m) = &self.method {
            m.validate()?;
        }
        if let Some(m) = &self.path {
            m.validate()?;
        }
        if let Some(m) = &self.query {
            m.validate()?;
        }
        if let Some(m) = &self.headers {
            m.validate()?;
        }
        if let Some(m) = &self.body {
            m.validate()?;
        }
        Ok(())
    }
}

impl fmt::Display for RequestMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestMatcher")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn string_matcher_bare_string_defaults_to_equal() {
        let m: StringMatcher = serde_json::from_str(r#""hello""#).unwrap();
        assert_eq!(m.predicate_name, "Equal");
        assert_eq!(m.value, "hello");
    }

    #[test]
    fn string_matcher_equal_round_trips_as_bare_string() {
        let m = StringMatcher::equal("hello");
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#""hello""#);
        let back: StringMatcher = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn string_matcher_non_equal_round_trips_as_object() {
        let m = StringMatcher::new("Match", "^a.*z$");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json, serde_json::json!({"matcher": "Match", "value": "^a.*z$"}));
    }

    #[test]
    fn string_matcher_slice_accepts_single_or_list() {
        let single: StringMatcherSlice = serde_json::from_str(r#""a""#).unwrap();
        assert_eq!(single.0.len(), 1);
        let many: StringMatcherSlice = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert_eq!(many.0.len(), 2);
    }

    #[test]
    fn string_matcher_slice_is_at_least_one_of_each() {
        let slice = StringMatcherSlice(vec![StringMatcher::equal("a"), StringMatcher::equal("b")]);
        assert!(slice.matches(&["a".into(), "b".into(), "c".into()]));
        assert!(!slice.matches(&["a".into(), "c".into()]));
        assert!(!slice.matches(&["a".into()]));
    }

    #[test]
    fn multi_map_matcher_requires_subset_allows_extra_actual_keys() {
        let mut map = BTreeMap::new();
        map.insert("x-trace".to_string(), StringMatcherSlice::single(StringMatcher::equal("abc")));
        let matcher = MultiMapMatcher(map);

        let mut actual = MultiMap::new();
        actual.insert("x-trace".into(), vec!["abc".into()]);
        actual.insert("x-extra".into(), vec!["ignored".into()]);
        assert!(matcher.matches(&actual));

        actual.remove("x-trace");
        assert!(!matcher.matches(&actual));
    }

    #[test]
    fn body_matcher_dispatches_string_shape_first() {
        let m: BodyMatcher = serde_json::from_str(r#""hello""#).unwrap();
        assert!(matches!(m, BodyMatcher::Raw(_)));

        let m: BodyMatcher = serde_json::from_str(r#"{"matcher":"Equal","value":"x"}"#).unwrap();
        assert!(matches!(m, BodyMatcher::Raw(_)));
    }

    #[test]
    fn body_matcher_falls_back_to_path_map() {
        let m: BodyMatcher = serde_json::from_str(r#"{"user.name":"alice"}"#).unwrap();
        let BodyMatcher::Paths(paths) = m else { panic!("expected path map") };
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn body_matcher_path_map_matches_nested_json() {
        let m: BodyMatcher = serde_json::from_str(r#"{"user.name":{"matcher":"ShouldEqual","value":"alice"}}"#).unwrap();
        let json: Value = serde_json::from_str(r#"{"user":{"name":"alice","age":30}}"#).unwrap();
        assert!(m.matches("{}", &Some(json)));

        let json: Value = serde_json::from_str(r#"{"user":{"name":"bob"}}"#).unwrap();
        assert!(!m.matches("{}", &Some(json)));
    }

    #[test]
    fn body_matcher_path_map_missing_path_fails() {
        let m: BodyMatcher = serde_json::from_str(r#"{"user.name":"alice"}"#).unwrap();
        let json: Value = serde_json::from_str(r#"{"user":{}}"#).unwrap();
        assert!(!m.matches("{}", &Some(json)));
    }

    #[test]
    fn json_path_supports_array_indices() {
        let json: Value = serde_json::from_str(r#"{"items":[{"id":1},{"id":2}]}"#).unwrap();
        assert_eq!(lookup_json_path(&json, "items[1].id"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn request_matcher_treats_absent_facets_as_match_all() {
        let matcher = RequestMatcher { path: Some(StringMatcher::equal("/hello")), ..Default::default() };
        let req = Request::new("POST", "/hello").with_header("x", "y");
        assert!(matcher.matches(&req));
    }
}
