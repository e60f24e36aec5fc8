//! Core wire and runtime types for requests, responses, mocks and history
//! (spec §3). Matcher types live in [`crate::matchers`]; session/store
//! concurrency lives in [`crate::store`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::matchers::RequestMatcher;

/// A multi-valued map, e.g. `?a=1&a=2` or repeated headers.
pub type MultiMap = BTreeMap<String, Vec<String>>;

/// An inbound request as carried internally. Both the raw body string and
/// its parsed JSON form are populated at ingress — the dual
/// representation is an invariant the matcher engine depends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: MultiMap,
    /// Header keys are lower-cased at ingress; header matching is
    /// case-insensitive on the key (spec §4.1).
    pub headers: MultiMap,
    pub body_raw: String,
    pub body_json: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: MultiMap::new(),
            headers: MultiMap::new(),
            body_raw: String::new(),
            body_json: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        let body = body.into();
        self.body_json = serde_json::from_str(&body).ok();
        self.body_raw = body;
        self
    }

    pub fn with_header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .entry(key.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.entry(key.into()).or_default().push(value.into());
        self
    }
}

/// A synthesized (or proxied) HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub headers: MultiMap,
    pub body: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: MultiMap::new(),
            body: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(key.into()).or_default().push(value.into());
        self
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A synthesized response recipe, as registered on a mock (spec §3/§4.3).
#[derive(Debug, Clone)]
pub enum ResponseRecipe {
    Static(StaticResponse),
    Proxy(ProxyRecipe),
    Template(TemplateRecipe),
}

#[derive(Debug, Clone, Default)]
pub struct StaticResponse {
    pub status: u16,
    pub headers: MultiMap,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ProxyRecipe {
    pub upstream: String,
    pub header_overrides: MultiMap,
}

#[derive(Debug, Clone)]
pub struct TemplateRecipe {
    pub status: u16,
    pub headers: MultiMap,
    pub body: Value,
}

/// A registered expectation: an immutable spec plus mutable runtime state.
#[derive(Debug, Clone)]
pub struct Mock {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub request: RequestMatcher,
    pub response: ResponseRecipe,
    /// `context.times`: 0 or `None` means unlimited.
    pub times: Option<u64>,
    pub served: u64,
    /// Set once the mock has served its full quota. A mock's self-check
    /// (spec §4.5 `mocks.verified`) fails while `times` is set and
    /// `served != times`; `locked` is the externally visible marker for
    /// "this mock will never serve again".
    pub locked: bool,
}

impl Mock {
    /// `mocks.verified` self-check for a single mock (spec §4.5).
    pub fn self_check_passed(&self) -> bool {
        match self.times {
            Some(n) if n > 0 => self.served == n,
            _ => true,
        }
    }
}

/// A captured (request, response) pair plus the id of the mock that
/// matched, empty when none did (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub request: Request,
    pub response: Response,
    #[serde(default)]
    pub mock_id: String,
}

/// Session identity and metadata (spec §3). Mocks + history live behind
/// the session's own lock in [`crate::store::Session`]; this struct is
/// the part that never changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}
