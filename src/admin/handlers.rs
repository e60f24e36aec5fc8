//! The admin surface operations (spec §4.5/§6): CRUD over
//! sessions/mocks/history plus Verify. Each function is a plain,
//! synchronous operation over a [`SessionStore`] — no HTTP types appear
//! here, so these are driven directly by tests and by
//! [`crate::server`]'s routing layer alike, mirroring how the teacher
//! keeps `server/state.rs`'s operations free of any hyper dependency.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::{HistoryEntry, SessionMeta};
use crate::store::{Session, SessionStore, VerifyReport};
use crate::wire::{MockRecord, WireMock};

fn resolve_session(store: &SessionStore, session: Option<&str>) -> Result<Arc<Session>, Error> {
    match session {
        None => Ok(store.last_session()),
        Some(s) => store
            .get(s)
            .or_else(|| store.get_by_name(s))
            .ok_or_else(|| Error::SessionNotFound(s.to_string())),
    }
}

pub fn list_mocks(store: &SessionStore, session: Option<&str>, id: Option<&str>) -> Result<Vec<MockRecord>, Error> {
    let session = resolve_session(store, session)?;
    let mocks = session.mocks();
    match id {
        Some(id) => match mocks.iter().find(|m| m.id == id) {
            Some(mock) => Ok(vec![MockRecord::from(mock)]),
            None => Err(Error::MockNotFound(id.to_string())),
        },
        None => Ok(mocks.iter().map(MockRecord::from).collect()),
    }
}

/// Registers a batch of mocks (spec §4.2 "rejected as a batch"). `reset`
/// discards every session store-wide, the same as a dedicated `POST
/// /reset`, before the registration target is resolved or created;
/// `new_session` creates a fresh session to register into rather than
/// reusing the resolved one (see DESIGN.md for why these are independent
/// flags).
pub fn register_mocks(
    store: &SessionStore,
    session: Option<&str>,
    reset: bool,
    new_session: bool,
    body: &[u8],
    format: super::codec::Format,
) -> Result<Vec<MockRecord>, Error> {
    let wire_mocks: Vec<WireMock> = super::codec::decode(body, format)?;
    let parsed: Vec<_> = wire_mocks
        .into_iter()
        .map(WireMock::into_parts)
        .collect::<Result<Vec<_>, _>>()?;

    if reset {
        store.reset_all();
    }

    let target = if new_session {
        store.new_session(None)
    } else {
        resolve_session(store, session)?
    };

    let records = parsed
        .into_iter()
        .map(|(request, response, times)| MockRecord::from(&target.add_mock(request, response, times)))
        .collect();
    Ok(records)
}

pub fn list_history(store: &SessionStore, session: Option<&str>, filter: Option<&str>) -> Result<Vec<HistoryEntry>, Error> {
    let session = resolve_session(store, session)?;
    Ok(session.history_by_path(filter))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionFull {
    #[serde(flatten)]
    pub meta: SessionMeta,
    pub mocks: Vec<MockRecord>,
    pub history: Vec<HistoryEntry>,
}

pub fn list_sessions_full(store: &SessionStore) -> Vec<SessionFull> {
    store
        .sessions()
        .iter()
        .map(|s| SessionFull {
            meta: s.meta(),
            mocks: s.mocks().iter().map(MockRecord::from).collect(),
            history: s.history(),
        })
        .collect()
}

pub fn list_sessions_summary(store: &SessionStore) -> Vec<SessionMeta> {
    store.session_metas()
}

pub fn create_session(store: &SessionStore, name: Option<String>) -> SessionMeta {
    store.new_session(name).meta()
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub id: String,
    pub name: String,
}

pub fn rename_session(store: &SessionStore, request: RenameRequest) -> Result<(), Error> {
    store.rename(&request.id, request.name)
}

pub fn import_sessions(store: &SessionStore, body: &[u8], format: super::codec::Format) -> Result<(), Error> {
    let imported: Vec<SessionFull> = super::codec::decode(body, format)?;
    let mut sessions = Vec::with_capacity(imported.len());
    for entry in imported {
        let session = Arc::new(Session::restore(entry.meta, store.history_limit()));
        let mut mocks = Vec::with_capacity(entry.mocks.len());
        for record in entry.mocks {
            mocks.push(record.into_mock().map_err(Error::Validation)?);
        }
        session.set_mocks(mocks);
        for history_entry in entry.history {
            session.append_history(history_entry);
        }
        sessions.push(session);
    }
    store.replace_all(sessions);
    Ok(())
}

pub fn reset(store: &SessionStore) {
    store.reset_all();
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub mocks_verified: bool,
    pub mocks_all_used: bool,
    pub history_verified: bool,
    pub failing_mocks: Vec<String>,
    pub unused_mocks: Vec<String>,
}

impl From<VerifyReport> for VerifyResponse {
    fn from(report: VerifyReport) -> Self {
        VerifyResponse {
            mocks_verified: report.mocks_verified,
            mocks_all_used: report.all_used,
            history_verified: report.history_verified,
            failing_mocks: report.failing_mock_ids,
            unused_mocks: report.unused_mock_ids,
        }
    }
}

pub fn verify(store: &SessionStore, session: Option<&str>) -> Result<VerifyResponse, Error> {
    let session = resolve_session(store, session)?;
    Ok(session.verify().into())
}
