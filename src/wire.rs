//! The wire shape for mock registration (spec §6) and its conversion into
//! the domain types in [`crate::model`]/[`crate::matchers`]. Kept separate
//! from the domain types themselves because the wire shape is a stable
//! public contract while the domain types are free to evolve — mirrors
//! the split between `common::data::MockDefinition` (wire) and the
//! matcher-facing types it gets converted into in the teacher.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::matchers::{BodyMatcher, MultiMapMatcher, RequestMatcher, StringMatcher, StringMatcherSlice};
use crate::model::{Mock, MultiMap, ProxyRecipe, ResponseRecipe, StaticResponse, TemplateRecipe};

#[derive(Debug, Deserialize, Serialize)]
pub struct WireMock {
    pub request: WireRequestMatcher,
    pub response: WireResponse,
    #[serde(default)]
    pub context: WireContext,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WireRequestMatcher {
    pub method: Option<StringMatcher>,
    pub path: Option<StringMatcher>,
    pub query_params: Option<BTreeMap<String, StringMatcherSlice>>,
    pub headers: Option<BTreeMap<String, StringMatcherSlice>>,
    pub body: Option<BodyMatcher>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WireResponse {
    pub status: Option<u16>,
    pub body: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    pub proxy: Option<WireProxy>,
    pub template: Option<WireTemplate>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WireProxy {
    pub upstream: String,
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WireTemplate {
    pub status: Option<u16>,
    pub body: Value,
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WireContext {
    pub times: Option<u64>,
}

impl WireMock {
    /// Validates and converts this wire mock into its domain parts (spec
    /// §4.2). Registration is rejected if any predicate name is unknown,
    /// the proxy upstream doesn't parse, or a template placeholder is
    /// malformed.
    pub fn into_parts(self) -> Result<(RequestMatcher, ResponseRecipe, Option<u64>), Error> {
        let request = self.request.into_matcher();
        request.validate().map_err(Error::Validation)?;

        let response = self.response.into_recipe()?;

        Ok((request, response, self.context.times))
    }
}

impl WireRequestMatcher {
    fn into_matcher(self) -> RequestMatcher {
        RequestMatcher {
            method: self.method,
            path: self.path,
            query: self.query_params.map(|m| MultiMapMatcher(m)),
            headers: self
                .headers
                .map(|m| MultiMapMatcher(m).lower_case_keys()),
            body: self.body,
        }
    }
}

impl WireResponse {
    fn into_recipe(self) -> Result<ResponseRecipe, Error> {
        if let Some(proxy) = self.proxy {
            if http::Uri::try_from(proxy.upstream.as_str()).is_err()
                || http::Uri::try_from(proxy.upstream.as_str())
                    .map(|u| u.authority().is_none())
                    .unwrap_or(true)
            {
                return Err(Error::Validation(format!(
                    "proxy upstream '{}' is not a parseable host",
                    proxy.upstream
                )));
            }
            return Ok(ResponseRecipe::Proxy(ProxyRecipe {
                upstream: proxy.upstream,
                header_overrides: to_multimap(proxy.headers),
            }));
        }

        if let Some(template) = self.template {
            validate_placeholders(&template.body)?;
            return Ok(ResponseRecipe::Template(TemplateRecipe {
                status: template.status.unwrap_or(200),
                headers: to_multimap(template.headers),
                body: template.body,
            }));
        }

        let body = match self.body {
            Some(Value::String(s)) => s.into_bytes(),
            Some(other) => serde_json::to_vec(&other).map_err(|e| Error::Validation(e.to_string()))?,
            None => Vec::new(),
        };
        Ok(ResponseRecipe::Static(StaticResponse {
            status: self.status.unwrap_or(200),
            headers: to_multimap(self.headers),
            body,
        }))
    }
}

fn to_multimap(m: BTreeMap<String, Vec<String>>) -> MultiMap {
    m.into_iter().collect()
}

/// A registered mock as returned by the admin surface — metadata plus
/// the same wire shape it was registered with, so `parse(serialize(m))`
/// round-trips (spec §8 invariant 5).
#[derive(Debug, Serialize, Deserialize)]
pub struct MockRecord {
    pub id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub served: u64,
    pub locked: bool,
    pub request: WireRequestMatcher,
    pub response: WireResponse,
    pub context: WireContext,
}

impl MockRecord {
    /// Reconstructs a full [`Mock`], preserving runtime state, for
    /// import (spec §4.4 `SetSessions`) — the counterpart to
    /// `From<&Mock> for MockRecord` used on export.
    pub fn into_mock(self) -> Result<Mock, String> {
        let wire = WireMock { request: self.request, response: self.response, context: self.context };
        let (request, response, times) = wire.into_parts().map_err(|e| e.to_string())?;
        Ok(Mock {
            id: self.id,
            created_at: self.created_at,
            request,
            response,
            times,
            served: self.served,
            locked: self.locked,
        })
    }
}

impl From<&Mock> for MockRecord {
    fn from(mock: &Mock) -> Self {
        MockRecord {
            id: mock.id.clone(),
            created_at: mock.created_at,
            served: mock.served,
            locked: mock.locked,
            request: WireRequestMatcher::from(&mock.request),
            response: WireResponse::from(&mock.response),
            context: WireContext { times: mock.times },
        }
    }
}

impl From<&RequestMatcher> for WireRequestMatcher {
    fn from(m: &RequestMatcher) -> Self {
        WireRequestMatcher {
            method: m.method.clone(),
            path: m.path.clone(),
            query_params: m.query.as_ref().map(|q| q.0.clone()),
            headers: m.headers.as_ref().map(|h| h.0.clone()),
            body: m.body.clone(),
        }
    }
}

impl From<&ResponseRecipe> for WireResponse {
    fn from(recipe: &ResponseRecipe) -> Self {
        match recipe {
            ResponseRecipe::Static(s) => WireResponse {
                status: Some(s.status),
                body: serde_json::from_slice(&s.body).ok().or_else(|| {
                    Some(Value::String(String::from_utf8_lossy(&s.body).into_owned()))
                }),
                headers: s.headers.clone(),
                proxy: None,
                template: None,
            },
            ResponseRecipe::Proxy(p) => WireResponse {
                status: None,
                body: None,
                headers: BTreeMap::new(),
                proxy: Some(WireProxy { upstream: p.upstream.clone(), headers: p.header_overrides.clone() }),
                template: None,
            },
            ResponseRecipe::Template(t) => WireResponse {
                status: None,
                body: None,
                headers: BTreeMap::new(),
                proxy: None,
                template: Some(WireTemplate { status: Some(t.status), body: t.body.clone(), headers: t.headers.clone() }),
            },
        }
    }
}

/// Rejects templates whose `{{ ... }}` placeholders are unbalanced (spec
/// §4.2 "templated responses must have syntactically well-formed
/// placeholders").
fn validate_placeholders(value: &Value) -> Result<(), Error> {
    match value {
        Value::String(s) => validate_placeholder_string(s),
        Value::Array(items) => items.iter().try_for_each(validate_placeholders),
        Value::Object(map) => map.values().try_for_each(validate_placeholders),
        _ => Ok(()),
    }
}

fn validate_placeholder_string(s: &str) -> Result<(), Error> {
    let mut depth = 0i32;
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"{{") {
            depth += 1;
            i += 2;
        } else if bytes[i..].starts_with(b"}}") {
            depth -= 1;
            if depth < 0 {
                return Err(Error::Validation(format!("malformed template placeholder in '{s}'")));
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    if depth != 0 {
        return Err(Error::Validation(format!("malformed template placeholder in '{s}'")));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(json: &str) -> WireMock {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn static_response_defaults_status_to_200() {
        let wire = parse(r#"{"request":{"method":"GET","path":"/hello"},"response":{"body":"hi"}}"#);
        let (_, response, _) = wire.into_parts().unwrap();
        let ResponseRecipe::Static(s) = response else { panic!("expected static") };
        assert_eq!(s.status, 200);
        assert_eq!(s.body, b"hi");
    }

    #[test]
    fn unknown_predicate_is_rejected_at_registration() {
        let wire = parse(r#"{"request":{"method":{"matcher":"Frobnicate","value":"GET"},"path":"/x"},"response":{"status":200}}"#);
        assert!(wire.into_parts().is_err());
    }

    #[test]
    fn proxy_requires_a_parseable_upstream() {
        let wire = parse(r#"{"request":{"path":"/x"},"response":{"proxy":{"upstream":"not a url"}}}"#);
        assert!(wire.into_parts().is_err());

        let wire = parse(r#"{"request":{"path":"/x"},"response":{"proxy":{"upstream":"http://example.com"}}}"#);
        assert!(wire.into_parts().is_ok());
    }

    #[test]
    fn template_rejects_unbalanced_placeholders() {
        let wire = parse(r#"{"request":{"path":"/x"},"response":{"template":{"body":"{{request.path"}}}"#);
        assert!(wire.into_parts().is_err());

        let wire = parse(r#"{"request":{"path":"/x"},"response":{"template":{"body":"{{request.path}}"}}}"#);
        assert!(wire.into_parts().is_ok());
    }

    #[test]
    fn header_matcher_keys_are_lower_cased_on_conversion() {
        let wire = parse(r#"{"request":{"headers":{"X-Trace":"abc"}},"response":{"status":200}}"#);
        let (matcher, _, _) = wire.into_parts().unwrap();
        assert!(matcher.headers.unwrap().0.contains_key("x-trace"));
    }
}
