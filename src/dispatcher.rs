//! Turns a matched (or unmatched) request into a response (spec §4.3).
//! Synthesizes static/template responses directly; proxies others
//! upstream via `hyper-util`'s legacy client. The no-match path returns
//! the sentinel status `666` with an optional closest-miss diagnostic.
//! A cancelled proxy wait (spec §5) returns the distinct sentinel `667`
//! instead.
//!
//! Lock discipline: [`Dispatcher::dispatch`] never holds the session
//! lock across the `.await` in [`proxy`] — [`crate::store::Session`]
//! only exposes synchronous, lock-scoped methods, so the compiler
//! refuses to let a `MutexGuard` survive into the proxy I/O. History is
//! appended in a second, separate lock acquisition after the response is
//! in hand, mirroring the two-phase "reserve, then record" flow the
//! teacher uses for request buffering in `server/server.rs`.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::model::{HistoryEntry, Mock, Request, Response, ResponseRecipe};
use crate::store::Session;
use crate::template;

pub const NO_MATCH_STATUS: u16 = 666;

/// Distinct from [`NO_MATCH_STATUS`]: recorded when a proxy wait is
/// abandoned because the client went away first (spec §5 "Cancellation").
pub const CANCELLED_STATUS: u16 = 667;

pub struct Dispatcher {
    client: Client<hyper_util::client::legacy::connect::HttpConnector, Full<Bytes>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self { client: Client::builder(TokioExecutor::new()).build_http() }
    }

    pub async fn dispatch(&self, session: &Arc<Session>, req: Request) -> Response {
        self.dispatch_cancellable(session, req, std::future::pending()).await
    }

    /// Like [`Dispatcher::dispatch`], but races a `Proxy` recipe's upstream
    /// wait against `cancelled` — static and template responses synthesize
    /// instantly and are never worth racing. If `cancelled` resolves
    /// first, the upstream call is abandoned and a [`CANCELLED_STATUS`]
    /// entry is recorded instead of whatever the upstream eventually
    /// returns (spec §5 "Cancellation"). Pass `std::future::pending()` for
    /// callers with no cancellation source.
    pub async fn dispatch_cancellable(
        &self,
        session: &Arc<Session>,
        req: Request,
        cancelled: impl Future<Output = ()> + Send,
    ) -> Response {
        let reserved = session.reserve_match(&req);

        let (response, mock_id) = match reserved {
            Some(mock) if matches!(mock.response, ResponseRecipe::Proxy(_)) => {
                tokio::pin!(cancelled);
                tokio::select! {
                    resp = self.synthesize(&mock, &req) => (resp, mock.id.clone()),
                    _ = &mut cancelled => (cancelled_response(), mock.id.clone()),
                }
            }
            Some(mock) => (self.synthesize(&mock, &req).await, mock.id.clone()),
            None => (no_match_response(session, &req), String::new()),
        };

        session.append_history(HistoryEntry { request: req, response: response.clone(), mock_id });
        response
    }

    async fn synthesize(&self, mock: &Mock, req: &Request) -> Response {
        match &mock.response {
            ResponseRecipe::Static(s) => {
                let mut resp = Response::new(s.status).with_body(s.body.clone());
                resp.headers = s.headers.clone();
                resp
            }
            ResponseRecipe::Template(t) => {
                let rendered = template::render(&t.body, req);
                let body = serde_json::to_vec(&rendered).unwrap_or_default();
                let mut resp = Response::new(t.status).with_body(body);
                resp.headers = t.headers.clone();
                resp
            }
            ResponseRecipe::Proxy(p) => self.proxy(p, req).await,
        }
    }

    async fn proxy(&self, recipe: &crate::model::ProxyRecipe, req: &Request) -> Response {
        match self.forward(recipe, req).await {
            Ok(resp) => resp,
            Err(err) => {
                tracing::warn!(upstream = %recipe.upstream, error = %err, "proxy request failed");
                Response::new(502).with_body(format!("proxy error: {err}"))
            }
        }
    }

    async fn forward(
        &self,
        recipe: &crate::model::ProxyRecipe,
        req: &Request,
    ) -> Result<Response, Box<dyn std::error::Error + Send + Sync>> {
        let mut query = String::new();
        for (k, values) in &req.query {
            for v in values {
                query.push(if query.is_empty() { '?' } else { '&' });
                query.push_str(&format!("{k}={v}"));
            }
        }
        let uri: hyper::Uri =
            format!("{}{}{}", recipe.upstream.trim_end_matches('/'), req.path, query).parse()?;

        let mut builder = hyper::Request::builder().method(req.method.as_str()).uri(uri);
        for (k, values) in &req.headers {
            for v in values {
                builder = builder.header(k.as_str(), v.as_str());
            }
        }
        let upstream_req = builder.body(Full::new(Bytes::from(req.body_raw.clone())))?;

        let upstream_resp = self.client.request(upstream_req).await?;
        let status = upstream_resp.status().as_u16();
        let mut resp = Response::new(status);
        for (name, value) in upstream_resp.headers() {
            resp = resp.with_header(name.as_str(), value.to_str().unwrap_or_default());
        }
        // header_overrides apply to the response emitted to the client, not
        // the outgoing upstream request (spec §4.3), same as Static/Template.
        for (k, values) in &recipe.header_overrides {
            resp.headers.insert(k.clone(), values.clone());
        }
        let body = upstream_resp.into_body().collect().await?.to_bytes();
        Ok(resp.with_body(body.to_vec()))
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Synthesizes the response recorded when a proxy wait is cancelled
/// because the client disconnected before the upstream answered.
fn cancelled_response() -> Response {
    Response::new(CANCELLED_STATUS).with_body("client disconnected before upstream responded")
}

/// Synthesizes the sentinel no-match response (spec §4.3), with an
/// `X-Mockyard-Closest-Miss`/`X-Mockyard-Failing-Facets` diagnostic when
/// at least one mock is registered in the session.
fn no_match_response(session: &Arc<Session>, req: &Request) -> Response {
    let mut resp = Response::new(NO_MATCH_STATUS).with_body("no mock matched this request");
    if let Some((mock_id, failing)) = session.closest_miss(req) {
        resp = resp
            .with_header("x-mockyard-closest-miss", mock_id)
            .with_header("x-mockyard-failing-facets", failing.join(","));
    }
    resp
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::matchers::{RequestMatcher, StringMatcher};
    use crate::model::{ProxyRecipe, StaticResponse};
    use crate::store::SessionStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accepts one connection, drains the request, and writes back a
    /// fixed HTTP/1.1 response carrying an `x-upstream: yes` header.
    async fn spawn_fake_upstream() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let body = b"upstream body";
            let response = format!(
                "HTTP/1.1 200 OK\r\nx-upstream: yes\r\ncontent-length: {}\r\n\r\n",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.write_all(body).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn dispatch_synthesizes_static_response_and_records_history() {
        let store = SessionStore::new();
        let session = store.last_session();
        let matcher = RequestMatcher { path: Some(StringMatcher::equal("/hello")), ..Default::default() };
        session.add_mock(
            matcher,
            ResponseRecipe::Static(StaticResponse { status: 201, body: b"hi".to_vec(), ..Default::default() }),
            None,
        );

        let dispatcher = Dispatcher::new();
        let resp = dispatcher.dispatch(&session, Request::new("GET", "/hello")).await;
        assert_eq!(resp.status, 201);
        assert_eq!(resp.body, b"hi");
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn dispatch_returns_sentinel_status_when_nothing_matches() {
        let store = SessionStore::new();
        let session = store.last_session();
        let dispatcher = Dispatcher::new();
        let resp = dispatcher.dispatch(&session, Request::new("GET", "/missing")).await;
        assert_eq!(resp.status, NO_MATCH_STATUS);
    }

    #[tokio::test]
    async fn dispatch_renders_template_responses_against_the_request() {
        let store = SessionStore::new();
        let session = store.last_session();
        let matcher = RequestMatcher { path: Some(StringMatcher::equal("/echo")), ..Default::default() };
        session.add_mock(
            matcher,
            ResponseRecipe::Template(crate::model::TemplateRecipe {
                status: 200,
                headers: Default::default(),
                body: serde_json::json!({"method": "{{request.method}}"}),
            }),
            None,
        );

        let dispatcher = Dispatcher::new();
        let resp = dispatcher.dispatch(&session, Request::new("PUT", "/echo")).await;
        assert_eq!(resp.status, 200);
        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body, serde_json::json!({"method": "PUT"}));
    }

    #[tokio::test]
    async fn proxy_header_overrides_apply_to_the_emitted_response_not_the_upstream_request() {
        let addr = spawn_fake_upstream().await;
        let store = SessionStore::new();
        let session = store.last_session();
        let matcher = RequestMatcher { path: Some(StringMatcher::equal("/forward")), ..Default::default() };
        let mut header_overrides = crate::model::MultiMap::new();
        header_overrides.insert("x-upstream".to_string(), vec!["overridden".to_string()]);
        session.add_mock(
            matcher,
            ResponseRecipe::Proxy(ProxyRecipe { upstream: format!("http://{addr}"), header_overrides }),
            None,
        );

        let dispatcher = Dispatcher::new();
        let resp = dispatcher.dispatch(&session, Request::new("GET", "/forward")).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"upstream body");
        assert_eq!(resp.headers.get("x-upstream").unwrap(), &vec!["overridden".to_string()]);
    }

    #[tokio::test]
    async fn cancelled_proxy_wait_records_a_distinct_status_instead_of_the_upstream_response() {
        let addr = spawn_fake_upstream().await;
        let store = SessionStore::new();
        let session = store.last_session();
        let matcher = RequestMatcher { path: Some(StringMatcher::equal("/slow")), ..Default::default() };
        session.add_mock(
            matcher,
            ResponseRecipe::Proxy(ProxyRecipe { upstream: format!("http://{addr}"), header_overrides: Default::default() }),
            None,
        );

        let dispatcher = Dispatcher::new();
        let already_cancelled = std::future::ready(());
        let resp = dispatcher.dispatch_cancellable(&session, Request::new("GET", "/slow"), already_cancelled).await;
        assert_eq!(resp.status, CANCELLED_STATUS);
        assert_ne!(resp.status, NO_MATCH_STATUS);
        assert_eq!(session.history().len(), 1);
    }
}
