//! End-to-end scenarios from the design notes, driven directly against
//! [`mockyard::store::SessionStore`] and [`mockyard::dispatcher::Dispatcher`]
//! rather than over a real socket — mirrors how the teacher's deleted
//! `tests/server_tests.rs` exercised the dispatch path without binding a
//! port for every case.

use mockyard::admin::handlers;
use mockyard::dispatcher::{Dispatcher, NO_MATCH_STATUS};
use mockyard::matchers::{RequestMatcher, StringMatcher};
use mockyard::model::{Request, ResponseRecipe, StaticResponse};
use mockyard::store::SessionStore;

fn matcher(path: &str) -> RequestMatcher {
    RequestMatcher { path: Some(StringMatcher::equal(path)), ..Default::default() }
}

fn static_response(status: u16, body: &str) -> ResponseRecipe {
    ResponseRecipe::Static(StaticResponse { status, body: body.as_bytes().to_vec(), ..Default::default() })
}

#[tokio::test]
async fn basic_static_mock() {
    let store = SessionStore::new();
    let session = store.last_session();
    session.add_mock(
        RequestMatcher { method: Some(StringMatcher::equal("GET")), path: Some(StringMatcher::equal("/hello")), ..Default::default() },
        static_response(200, "hi"),
        None,
    );

    let dispatcher = Dispatcher::new();
    let resp = dispatcher.dispatch(&session, Request::new("GET", "/hello")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body_str(), "hi");
    assert_eq!(session.history().len(), 1);
    assert_eq!(session.mocks()[0].served, 1);
}

#[tokio::test]
async fn quota_exhaustion() {
    let store = SessionStore::new();
    let session = store.last_session();
    session.add_mock(matcher("/hello"), static_response(200, "hi"), Some(2));

    let dispatcher = Dispatcher::new();
    let mut statuses = Vec::new();
    for _ in 0..3 {
        statuses.push(dispatcher.dispatch(&session, Request::new("GET", "/hello")).await.status);
    }
    assert_eq!(statuses, vec![200, 200, NO_MATCH_STATUS]);
    assert_eq!(session.mocks()[0].served, 2);

    let report = handlers::verify(&store, None).unwrap();
    assert!(report.mocks_all_used);
    assert!(report.mocks_verified);
    assert!(!report.history_verified);
}

#[tokio::test]
async fn newest_registration_wins() {
    let store = SessionStore::new();
    let session = store.last_session();
    session.add_mock(matcher("/x"), static_response(201, ""), None);
    session.add_mock(matcher("/x"), static_response(202, ""), None);

    let dispatcher = Dispatcher::new();
    let resp = dispatcher.dispatch(&session, Request::new("GET", "/x")).await;
    assert_eq!(resp.status, 202);
}

#[tokio::test]
async fn regex_header_match() {
    let store = SessionStore::new();
    let session = store.last_session();
    let mut headers = std::collections::BTreeMap::new();
    headers.insert(
        "x-trace".to_string(),
        mockyard::matchers::StringMatcherSlice::single(StringMatcher::new("ShouldMatch", "^[0-9a-f]{8}$")),
    );
    let req_matcher = RequestMatcher {
        path: Some(StringMatcher::equal("/p")),
        headers: Some(mockyard::matchers::MultiMapMatcher(headers)),
        ..Default::default()
    };
    session.add_mock(req_matcher, static_response(204, ""), None);

    let dispatcher = Dispatcher::new();
    let ok = dispatcher.dispatch(&session, Request::new("GET", "/p").with_header("X-Trace", "deadbeef")).await;
    assert_eq!(ok.status, 204);

    let bad = dispatcher.dispatch(&session, Request::new("GET", "/p").with_header("X-Trace", "zzz")).await;
    assert_eq!(bad.status, NO_MATCH_STATUS);
}

#[tokio::test]
async fn json_body_path_match() {
    let store = SessionStore::new();
    let session = store.last_session();
    let mut paths = std::collections::BTreeMap::new();
    paths.insert("user.name".to_string(), StringMatcher::new("ShouldEqual", "alice"));
    let req_matcher = RequestMatcher {
        path: Some(StringMatcher::equal("/users")),
        body: Some(mockyard::matchers::BodyMatcher::Paths(paths)),
        ..Default::default()
    };
    session.add_mock(req_matcher, static_response(200, "ok"), None);

    let dispatcher = Dispatcher::new();
    let matched = dispatcher
        .dispatch(&session, Request::new("POST", "/users").with_body(r#"{"user":{"name":"alice","age":30}}"#))
        .await;
    assert_eq!(matched.status, 200);

    let unmatched = dispatcher
        .dispatch(&session, Request::new("POST", "/users").with_body(r#"{"user":{"name":"bob"}}"#))
        .await;
    assert_eq!(unmatched.status, NO_MATCH_STATUS);
}

#[tokio::test]
async fn verify_with_mixed_usage() {
    let store = SessionStore::new();
    let session = store.last_session();
    session.add_mock(matcher("/twice"), static_response(200, ""), None);
    session.add_mock(matcher("/once"), static_response(200, ""), None);
    session.add_mock(matcher("/never"), static_response(200, ""), None);

    let dispatcher = Dispatcher::new();
    dispatcher.dispatch(&session, Request::new("GET", "/twice")).await;
    dispatcher.dispatch(&session, Request::new("GET", "/twice")).await;
    dispatcher.dispatch(&session, Request::new("GET", "/once")).await;

    let report = handlers::verify(&store, None).unwrap();
    assert!(!report.mocks_all_used);
    assert_eq!(report.unused_mocks.len(), 1);
    assert!(report.mocks_verified);
    assert!(report.history_verified);
}
