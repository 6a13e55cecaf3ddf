//! Debug HTTP surface
//!
//! A small read-only HTTP/1.1 responder for the debug tracker's queries,
//! plus an endpoint to trigger one synthetic feed batch. One request per
//! connection; every body is JSON.
//!
//! - `GET /debug/interactions?limit&componentId&operation&since`
//! - `GET /debug/stats`
//! - `GET /debug/overview`
//! - `GET /debug/timeline?minutes`
//! - `GET|POST /feed`

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use tungstenite::http::StatusCode;
use url::Url;

use crate::debug::query::DEFAULT_TIMELINE_MINUTES;
use crate::debug::{InteractionQuery, Operation, TrackerHandle};
use crate::ingest::{IngestQueue, SharedFeed, feed};
use crate::utils::Result;

const MAX_HEAD_BYTES: usize = 8 * 1024;
const MAX_HEADERS: usize = 32;

/// A response ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl Reply {
    fn ok(body: impl Serialize) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self {
                status: StatusCode::OK,
                body,
            },
            Err(e) => Self::error(StatusCode::INTERNAL_SERVER_ERROR, e),
        }
    }

    fn error(status: StatusCode, message: impl ToString) -> Self {
        Self {
            status,
            body: json!({ "error": message.to_string() }),
        }
    }

    fn to_http(&self) -> String {
        let body = self.body.to_string();
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or(""),
            body.len(),
            body
        )
    }
}

/// The synthetic feed and the queue its batches go into.
#[derive(Clone)]
pub struct FeedControl {
    pub feed: SharedFeed,
    pub queue: IngestQueue,
}

#[derive(Clone, Default)]
pub struct DebugApi {
    tracker: Option<TrackerHandle>,
    feed: Option<FeedControl>,
}

impl DebugApi {
    pub fn new(tracker: Option<TrackerHandle>, feed: Option<FeedControl>) -> Self {
        Self { tracker, feed }
    }

    /// Answers one request. `target` is the request-target, path plus query.
    pub async fn route(&self, method: &str, target: &str) -> Reply {
        let url = match Url::parse("http://localhost").and_then(|base| base.join(target)) {
            Ok(url) => url,
            Err(e) => return Reply::error(StatusCode::BAD_REQUEST, e),
        };

        match (method, url.path()) {
            ("GET", "/debug/interactions") => match parse_interaction_query(&url) {
                Ok(query) => self.with_tracker(|t| async move { t.interactions(query).await.map(Reply::ok) }).await,
                Err(e) => Reply::error(StatusCode::BAD_REQUEST, e),
            },
            ("GET", "/debug/stats") => {
                self.with_tracker(|t| async move { t.stats().await.map(Reply::ok) }).await
            }
            ("GET", "/debug/overview") => {
                self.with_tracker(|t| async move { t.overview().await.map(Reply::ok) }).await
            }
            ("GET", "/debug/timeline") => match parse_minutes(&url) {
                Ok(minutes) => {
                    self.with_tracker(|t| async move { t.timeline(minutes).await.map(Reply::ok) })
                        .await
                }
                Err(e) => Reply::error(StatusCode::BAD_REQUEST, e),
            },
            ("GET" | "POST", "/feed") => self.generate_feed().await,
            (_, "/debug/interactions" | "/debug/stats" | "/debug/overview" | "/debug/timeline" | "/feed") => {
                Reply::error(StatusCode::METHOD_NOT_ALLOWED, format!("{method} not allowed"))
            }
            (_, path) => Reply::error(StatusCode::NOT_FOUND, format!("no route for {path}")),
        }
    }

    async fn with_tracker<F, Fut>(&self, query: F) -> Reply
    where
        F: FnOnce(TrackerHandle) -> Fut,
        Fut: Future<Output = Result<Reply>>,
    {
        let Some(tracker) = self.tracker.clone() else {
            return Reply::error(StatusCode::SERVICE_UNAVAILABLE, "debug tracking is disabled");
        };
        match query(tracker).await {
            Ok(reply) => reply,
            Err(e) => Reply::error(StatusCode::SERVICE_UNAVAILABLE, e),
        }
    }

    async fn generate_feed(&self) -> Reply {
        let Some(control) = &self.feed else {
            return Reply::error(StatusCode::SERVICE_UNAVAILABLE, "feed is not available");
        };
        match feed::generate(&control.feed, &control.queue).await {
            Ok(enqueued) => Reply::ok(json!({
                "enqueued": enqueued,
                "ingest": control.queue.stats(),
            })),
            Err(e) => Reply::error(StatusCode::SERVICE_UNAVAILABLE, e),
        }
    }
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn parse_param<T: std::str::FromStr>(url: &Url, name: &str) -> std::result::Result<Option<T>, String> {
    match query_param(url, name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| format!("invalid {name}: '{raw}'")),
        None => Ok(None),
    }
}

pub fn parse_interaction_query(url: &Url) -> std::result::Result<InteractionQuery, String> {
    let operation = match query_param(url, "operation") {
        Some(raw) => Some(raw.parse::<Operation>()?),
        None => None,
    };
    Ok(InteractionQuery {
        limit: parse_param(url, "limit")?,
        component_id: query_param(url, "componentId"),
        operation,
        since: parse_param(url, "since")?,
    })
}

fn parse_minutes(url: &Url) -> std::result::Result<u32, String> {
    Ok(parse_param(url, "minutes")?.unwrap_or(DEFAULT_TIMELINE_MINUTES))
}

/// Binds `addr` and serves the debug API.
pub async fn start_debug_server(addr: &str, api: Arc<DebugApi>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("debug API listening on http://{addr}/debug");
    serve(listener, api).await;
    Ok(())
}

pub async fn serve(listener: TcpListener, api: Arc<DebugApi>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let api = api.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_request(stream, &api).await {
                        debug!(%peer, "debug request failed: {e}");
                    }
                });
            }
            Err(e) => warn!("accept failed: {e}"),
        }
    }
}

/// Method and request-target, once the head is complete.
fn parse_head(buf: &[u8]) -> std::result::Result<Option<(String, String)>, httparse::Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    match request.parse(buf)? {
        httparse::Status::Complete(_) => Ok(Some((
            request.method.unwrap_or_default().to_string(),
            request.path.unwrap_or("/").to_string(),
        ))),
        httparse::Status::Partial => Ok(None),
    }
}

async fn handle_request(mut stream: TcpStream, api: &DebugApi) -> Result<()> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let reply = loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..read]);
        match parse_head(&buf) {
            Ok(Some((method, target))) => {
                debug!(%method, %target, "debug request");
                break api.route(&method, &target).await;
            }
            Ok(None) if buf.len() < MAX_HEAD_BYTES => continue,
            Ok(None) => break Reply::error(StatusCode::BAD_REQUEST, "request head too large"),
            Err(e) => break Reply::error(StatusCode::BAD_REQUEST, e),
        }
    };

    stream.write_all(reply.to_http().as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
