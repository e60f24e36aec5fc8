//! Multi-session mock storage (spec §4.4). Two-level locking: a
//! `RwLock` over the session list (read for lookups, write only while
//! creating/renaming/resetting sessions) and a `Mutex` per session
//! guarding its mocks and history. Plain `std::sync` locks rather than
//! tokio's async variants — a std `MutexGuard` cannot be held across an
//! `.await`, which makes "release the session lock before doing proxy
//! I/O, then reacquire it to append history" a compiler-enforced
//! invariant in [`crate::dispatcher`] rather than a convention. Mirrors
//! `server/state.rs` in the teacher, generalized from a single global
//! `State` to a named collection of sessions.

use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use uuid::Uuid;

use crate::error::Error;
use crate::matchers::RequestMatcher;
use crate::model::{HistoryEntry, Mock, Request, ResponseRecipe, SessionMeta};

const DEFAULT_SESSION_NAME: &str = "default";

/// A single session's mocks and captured history, behind one lock (spec
/// §3 "a session is the unit of isolation").
struct SessionData {
    mocks: Vec<Mock>,
    history: Vec<HistoryEntry>,
}

pub struct Session {
    pub meta: RwLock<SessionMeta>,
    data: Mutex<SessionData>,
    /// Caps the retained history length (oldest entries drop first) — an
    /// ambient operational knob the spec itself is silent on; `None` is
    /// unlimited.
    history_limit: Option<usize>,
}

impl Session {
    fn new(name: String, history_limit: Option<usize>) -> Self {
        Self {
            meta: RwLock::new(SessionMeta { id: Uuid::new_v4().to_string(), name, created_at: Utc::now() }),
            data: Mutex::new(SessionData { mocks: Vec::new(), history: Vec::new() }),
            history_limit,
        }
    }

    pub fn id(&self) -> String {
        self.meta.read().unwrap().id.clone()
    }

    pub fn name(&self) -> String {
        self.meta.read().unwrap().name.clone()
    }

    pub fn meta(&self) -> SessionMeta {
        self.meta.read().unwrap().clone()
    }

    pub fn rename(&self, name: String) {
        self.meta.write().unwrap().name = name;
    }

    pub fn add_mock(&self, request: RequestMatcher, response: ResponseRecipe, times: Option<u64>) -> Mock {
        let mock = Mock {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            request,
            response,
            times,
            served: 0,
            locked: false,
        };
        let mut data = self.data.lock().unwrap();
        data.mocks.push(mock.clone());
        mock
    }

    pub fn mocks(&self) -> Vec<Mock> {
        self.data.lock().unwrap().mocks.clone()
    }

    pub fn mock_by_id(&self, id: &str) -> Option<Mock> {
        self.data.lock().unwrap().mocks.iter().find(|m| m.id == id).cloned()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.data.lock().unwrap().history.clone()
    }

    /// History entries whose request path contains `needle` (spec §4.4
    /// `GetHistoryByPath`); `None` returns the full history.
    pub fn history_by_path(&self, needle: Option<&str>) -> Vec<HistoryEntry> {
        let history = self.data.lock().unwrap().history.clone();
        match needle {
            Some(n) => history.into_iter().filter(|h| h.request.path.contains(n)).collect(),
            None => history,
        }
    }

    /// Selects the best-matching, quota-available mock for `req` — newest
    /// registration wins among ties, a mock that has already served its
    /// full `times` quota is skipped regardless of how well it matches
    /// (spec §4.2 "mock selection"). Reserves the match by incrementing
    /// `served` and setting `locked` under the same lock acquisition, so
    /// two concurrent requests can never both claim the last slot of a
    /// quota-limited mock.
    pub fn reserve_match(&self, req: &Request) -> Option<Mock> {
        let mut data = self.data.lock().unwrap();
        let selected = data
            .mocks
            .iter_mut()
            .rev()
            .find(|m| !m.locked && m.request.matches(req))?;
        selected.served += 1;
        if let Some(limit) = selected.times {
            if limit > 0 && selected.served >= limit {
                selected.locked = true;
            }
        }
        Some(selected.clone())
    }

    /// The closest-miss diagnostic for a request that matched nothing:
    /// the mock with the fewest failing facets, and which facets those
    /// are (spec §4.3 "no-match diagnostics").
    pub fn closest_miss(&self, req: &Request) -> Option<(String, Vec<&'static str>)> {
        let data = self.data.lock().unwrap();
        data.mocks
            .iter()
            .map(|m| (m.id.clone(), m.request.failing_facets(req)))
            .min_by_key(|(_, failing)| failing.len())
    }

    pub fn append_history(&self, entry: HistoryEntry) {
        let mut data = self.data.lock().unwrap();
        data.history.push(entry);
        if let Some(limit) = self.history_limit {
            let len = data.history.len();
            if len > limit {
                data.history.drain(0..len - limit);
            }
        }
    }

    pub fn reset(&self) {
        let mut data = self.data.lock().unwrap();
        data.mocks.clear();
        data.history.clear();
    }

    /// Overwrites this session's mocks wholesale, e.g. for import (spec
    /// §4.4 `SetSessions`). History is left untouched.
    pub fn set_mocks(&self, mocks: Vec<Mock>) {
        self.data.lock().unwrap().mocks = mocks;
    }

    /// `mocks.verified`/`mocks.all_used`/`history.verified` self-check
    /// used by the admin `Verify` operation (spec §4.5).
    pub fn verify(&self) -> VerifyReport {
        let data = self.data.lock().unwrap();
        let failing: Vec<String> = data
            .mocks
            .iter()
            .filter(|m| !m.self_check_passed())
            .map(|m| m.id.clone())
            .collect();
        let unused: Vec<String> = data
            .mocks
            .iter()
            .filter(|m| m.served == 0)
            .map(|m| m.id.clone())
            .collect();
        VerifyReport {
            mocks_verified: failing.is_empty(),
            all_used: unused.is_empty(),
            history_verified: !data.history.iter().any(|h| h.response.status > 600),
            failing_mock_ids: failing,
            unused_mock_ids: unused,
        }
    }

    /// Reconstructs a session with pre-existing identity, e.g. import
    /// (spec §4.4 `SetSessions`) — never used for ordinary session
    /// creation, which always generates a fresh id.
    pub fn restore(meta: SessionMeta, history_limit: Option<usize>) -> Self {
        Self {
            meta: RwLock::new(meta),
            data: Mutex::new(SessionData { mocks: Vec::new(), history: Vec::new() }),
            history_limit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub mocks_verified: bool,
    pub all_used: bool,
    pub history_verified: bool,
    pub failing_mock_ids: Vec<String>,
    pub unused_mock_ids: Vec<String>,
}

/// The top-level collection of sessions (spec §4.4). A fresh store
/// starts empty; [`SessionStore::last_session`] lazily creates the
/// default session on first access rather than eagerly at construction,
/// matching the teacher's `State::default()` + lazy-init pattern in
/// `server/state.rs`.
pub struct SessionStore {
    sessions: RwLock<Vec<Arc<Session>>>,
    history_limit: Option<usize>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(Vec::new()), history_limit: None }
    }

    /// Caps every session's retained history length (ambient operational
    /// knob; spec.md itself imposes no limit).
    pub fn with_history_limit(history_limit: Option<usize>) -> Self {
        Self { sessions: RwLock::new(Vec::new()), history_limit }
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().unwrap().clone()
    }

    pub fn session_metas(&self) -> Vec<SessionMeta> {
        self.sessions.read().unwrap().iter().map(|s| s.meta()).collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().iter().find(|s| s.id() == id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().iter().find(|s| s.name() == name).cloned()
    }

    pub fn history_limit(&self) -> Option<usize> {
        self.history_limit
    }

    /// The most recently created session, auto-creating the default
    /// session if the store is empty (spec §4.4 `GetLastSession`).
    pub fn last_session(&self) -> Arc<Session> {
        if let Some(last) = self.sessions.read().unwrap().last() {
            return last.clone();
        }
        let mut sessions = self.sessions.write().unwrap();
        if let Some(last) = sessions.last() {
            return last.clone();
        }
        let session = Arc::new(Session::new(DEFAULT_SESSION_NAME.to_string(), self.history_limit));
        sessions.push(session.clone());
        session
    }

    /// Creates a brand-new, empty session; never mutates an existing one
    /// (spec §9 Open Question, resolved — see DESIGN.md).
    pub fn new_session(&self, name: Option<String>) -> Arc<Session> {
        let name = name.unwrap_or_else(|| format!("session-{}", Uuid::new_v4()));
        let session = Arc::new(Session::new(name, self.history_limit));
        self.sessions.write().unwrap().push(session.clone());
        session
    }

    pub fn rename(&self, id: &str, name: String) -> Result<(), Error> {
        let session = self.get(id).ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        session.rename(name);
        Ok(())
    }

    /// Replaces the entire session list, e.g. import (spec §4.4
    /// `SetSessions`).
    pub fn replace_all(&self, sessions: Vec<Arc<Session>>) {
        *self.sessions.write().unwrap() = sessions;
    }

    /// Discards every session and leaves exactly one, empty, default
    /// session (spec §4.4 `Reset`, invariant 4).
    pub fn reset_all(&self) {
        let mut sessions = self.sessions.write().unwrap();
        *sessions = vec![Arc::new(Session::new(DEFAULT_SESSION_NAME.to_string(), self.history_limit))];
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
