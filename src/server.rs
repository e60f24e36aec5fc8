//! The HTTP listener (spec §6): binds a TCP socket, accepts connections
//! with `hyper_util`'s auto (h1/h2) connection builder, and routes each
//! request either to the admin surface or to the dispatcher. Grounded on
//! `server/server.rs` in the teacher — the accept loop, `TokioExecutor`
//! connection builder and `thiserror` bind-error variant are carried
//! over directly; the TLS/CONNECT-tunnel machinery is dropped; proxying
//! here means forwarding *mocked* requests upstream, not operating as a
//! transparent HTTP(S) proxy.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request as HyperRequest, Response as HyperResponse, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ServerBuilder;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::spawn;

use crate::admin::{codec, handlers};
use crate::dispatcher::Dispatcher;
use crate::error::Error as AppError;
use crate::model::Request;
use crate::store::SessionStore;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot bind to socket addr {0}: {1}")]
    SocketBind(SocketAddr, std::io::Error),
    #[error("server connection error: {0}")]
    Connection(#[from] Box<dyn std::error::Error + Send + Sync>),
}

pub struct MockServer {
    store: Arc<SessionStore>,
    dispatcher: Arc<Dispatcher>,
    bind_address: IpAddr,
    port: u16,
    shutting_down: Arc<std::sync::atomic::AtomicBool>,
    shutdown_notify: Arc<tokio::sync::Notify>,
}

impl MockServer {
    pub fn new(store: Arc<SessionStore>, bind_address: IpAddr, port: u16) -> Self {
        Self {
            store,
            dispatcher: Arc::new(Dispatcher::new()),
            bind_address,
            port,
            shutting_down: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            shutdown_notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<(), Error> {
        let addr = SocketAddr::new(self.bind_address, self.port);
        let listener = TcpListener::bind(addr).await.map_err(|e| Error::SocketBind(addr, e))?;
        let local_addr = listener.local_addr().map_err(|e| Error::SocketBind(addr, e))?;
        tracing::info!(address = %local_addr, "listening");

        let server = Arc::new(self);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let server = server.clone();
                            spawn(async move {
                                if let Err(err) = server.serve_connection(stream).await {
                                    tracing::warn!(error = %err, "connection error");
                                }
                            });
                        }
                        Err(err) => tracing::warn!(error = %err, "accept error"),
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("shutting down");
                    server.shutting_down.store(true, std::sync::atomic::Ordering::Release);
                    server.shutdown_notify.notify_waiters();
                    return Ok(());
                }
            }
        }
    }

    /// Resolves once the server starts shutting down — raced against the
    /// proxy wait in [`MockServer::route_mock`] (spec §5 "Cancellation").
    /// Checking `shutting_down` before awaiting `notified()` (rather than
    /// after) avoids the missed-wakeup race where shutdown fires between
    /// the check and the await.
    async fn shutdown_signal(&self) {
        let notified = self.shutdown_notify.notified();
        if self.shutting_down.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }
        notified.await;
    }

    async fn serve_connection(self: Arc<Self>, stream: TcpStream) -> Result<(), Error> {
        ServerBuilder::new(TokioExecutor::new())
            .serve_connection(
                TokioIo::new(stream),
                service_fn(move |req| {
                    let server = self.clone();
                    async move { Ok::<_, std::convert::Infallible>(server.route(req).await) }
                }),
            )
            .await
            .map_err(|e| Error::Connection(e))
    }

    async fn route(&self, req: HyperRequest<Incoming>) -> HyperResponse<Full<Bytes>> {
        let path = req.uri().path().to_string();
        if path == "/mocks"
            || path == "/history"
            || path == "/sessions"
            || path == "/sessions/summary"
            || path == "/sessions/import"
            || path == "/sessions/verify"
            || path == "/reset"
        {
            return self.route_admin(req, path).await;
        }
        self.route_mock(req).await
    }

    async fn route_admin(&self, req: HyperRequest<Incoming>, path: String) -> HyperResponse<Full<Bytes>> {
        let method = req.method().clone();
        let accept = header_str(&req, "accept");
        let response_format = codec::response_format(accept.as_deref());
        let content_type = header_str(&req, "content-type");
        let query = parse_query(req.uri().query().unwrap_or(""));
        let body = match req.into_body().collect().await {
            Ok(b) => b.to_bytes(),
            Err(_) => return text_response(StatusCode::BAD_REQUEST, "failed to read request body"),
        };

        let result = self.dispatch_admin(&method, &path, &query, &body, content_type.as_deref(), response_format);
        match result {
            Ok(payload) => {
                let (bytes, content_type) = payload;
                HyperResponse::builder()
                    .status(StatusCode::OK)
                    .header("content-type", content_type)
                    .body(Full::new(Bytes::from(bytes)))
                    .unwrap()
            }
            Err(err) => {
                let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let (bytes, content_type) = codec::encode(&ErrorBody { error: err.to_string() }, response_format);
                HyperResponse::builder()
                    .status(status)
                    .header("content-type", content_type)
                    .body(Full::new(Bytes::from(bytes)))
                    .unwrap()
            }
        }
    }

    fn dispatch_admin(
        &self,
        method: &Method,
        path: &str,
        query: &BTreeMap<String, Vec<String>>,
        body: &[u8],
        content_type: Option<&str>,
        response_format: codec::Format,
    ) -> Result<(Vec<u8>, &'static str), AppError> {
        let session = first(query, "session");
        let id = first(query, "id");

        match (method.as_str(), path) {
            ("GET", "/mocks") => {
                let mocks = handlers::list_mocks(&self.store, session, id)?;
                Ok(codec::encode(&mocks, response_format))
            }
            ("POST", "/mocks") => {
                let reset = first(query, "reset").map(|v| v == "true").unwrap_or(false);
                let new_session = first(query, "newSession").map(|v| v == "true").unwrap_or(false);
                let format = codec::request_format(content_type)?;
                let mocks = handlers::register_mocks(&self.store, session, reset, new_session, body, format)?;
                Ok(codec::encode(&mocks, response_format))
            }
            ("GET", "/history") => {
                let filter = first(query, "filter");
                let history = handlers::list_history(&self.store, session, filter)?;
                Ok(codec::encode(&history, response_format))
            }
            ("GET", "/sessions") => {
                Ok(codec::encode(&handlers::list_sessions_full(&self.store), response_format))
            }
            ("GET", "/sessions/summary") => {
                Ok(codec::encode(&handlers::list_sessions_summary(&self.store), response_format))
            }
            ("POST", "/sessions") => {
                let name = first(query, "name").map(String::from);
                Ok(codec::encode(&handlers::create_session(&self.store, name), response_format))
            }
            ("PUT", "/sessions") => {
                let format = codec::request_format(content_type)?;
                let request: handlers::RenameRequest = codec::decode(body, format)?;
                handlers::rename_session(&self.store, request)?;
                Ok((Vec::new(), "application/json"))
            }
            ("POST", "/sessions/import") => {
                let format = codec::request_format(content_type)?;
                handlers::import_sessions(&self.store, body, format)?;
                Ok((Vec::new(), "application/json"))
            }
            ("POST", "/reset") => {
                handlers::reset(&self.store);
                Ok((Vec::new(), "application/json"))
            }
            ("POST", "/sessions/verify") => {
                let report = handlers::verify(&self.store, session)?;
                Ok(codec::encode(&report, response_format))
            }
            _ => Err(AppError::Validation(format!("no admin route for {method} {path}"))),
        }
    }

    async fn route_mock(&self, req: HyperRequest<Incoming>) -> HyperResponse<Full<Bytes>> {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let query = parse_query(req.uri().query().unwrap_or(""));
        let mut headers = BTreeMap::new();
        for (name, value) in req.headers() {
            headers
                .entry(name.as_str().to_ascii_lowercase())
                .or_insert_with(Vec::new)
                .push(value.to_str().unwrap_or_default().to_string());
        }
        let body_bytes = match req.into_body().collect().await {
            Ok(b) => b.to_bytes(),
            Err(_) => return text_response(StatusCode::BAD_REQUEST, "failed to read request body"),
        };
        let body_raw = String::from_utf8_lossy(&body_bytes).into_owned();

        let mut request = Request::new(method, path).with_body(body_raw);
        request.query = query;
        request.headers = headers;

        let session = self.store.last_session();
        let response = self.dispatcher.dispatch_cancellable(&session, request, self.shutdown_signal()).await;

        let mut builder = HyperResponse::builder().status(
            StatusCode::from_u16(response.status.min(999) as u16).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        );
        for (name, values) in &response.headers {
            for value in values {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        builder.body(Full::new(Bytes::from(response.body))).unwrap()
    }
}

#[derive(serde::Serialize)]
struct ErrorBody {
    error: String,
}

fn header_str(req: &HyperRequest<Incoming>, name: &str) -> Option<String> {
    req.headers().get(name).and_then(|v| v.to_str().ok()).map(String::from)
}

fn first<'a>(query: &'a BTreeMap<String, Vec<String>>, key: &str) -> Option<&'a str> {
    query.get(key).and_then(|v| v.first()).map(String::as_str)
}

fn parse_query(query: &str) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        map.entry(decode_component(key)).or_default().push(decode_component(value));
    }
    map
}

fn decode_component(s: &str) -> String {
    s.replace('+', " ")
}

fn text_response(status: StatusCode, body: &str) -> HyperResponse<Full<Bytes>> {
    HyperResponse::builder().status(status).body(Full::new(Bytes::from(body.to_string()))).unwrap()
}
