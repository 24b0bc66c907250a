//! HTTP transport
//!
//! Exposes the hub over plain HTTP with `axum`:
//! - `GET /events`: long-lived event stream. Channels come from the hub's
//!   resolver (query parameters), the replay watermark from the
//!   `Last-Event-ID` header or the `lastEventId` query parameter.
//! - `POST /publish`: JSON publish request, answers with the assigned id.
//! - `GET /stats`: hub counters.
//!
//! Cross-origin access is limited to the configured origins; with none
//! configured no CORS headers are sent.
//!
//! A stream registers before it replays so nothing published in between is
//! missed; live records already covered by the replay are skipped. The
//! subscriber is unregistered when the response body is dropped.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::time::{Interval, MissedTickBehavior};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::broker::{ConnectContext, Hub, HubStats, Subscription};
use crate::transport::wire;
use crate::utils::error::HubError;

const LAST_EVENT_ID: &str = "last-event-id";
const LAST_EVENT_ID_PARAM: &str = "lastEventId";

/// Per-stream behaviour of the HTTP surface.
#[derive(Debug, Clone, Default)]
pub struct StreamSettings {
    /// Interval between keep-alive comments. `None` disables them.
    pub heartbeat: Option<Duration>,
    /// Origins allowed to call the server from a browser. `*` allows any.
    pub allowed_origins: Vec<String>,
}

#[derive(Clone)]
struct AppState {
    hub: Arc<Hub>,
    settings: StreamSettings,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishRequest {
    pub channels: Vec<String>,
    #[serde(default, rename = "type")]
    pub event_type: String,
    pub payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    pub id: u64,
}

pub fn router(hub: Arc<Hub>, settings: StreamSettings) -> Router {
    let cors = cors_layer(&settings.allowed_origins);
    let router = Router::new()
        .route("/events", get(events))
        .route("/publish", post(publish))
        .route("/stats", get(stats))
        .with_state(AppState { hub, settings });
    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let origins: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };
    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([
                header::CONTENT_TYPE,
                header::CACHE_CONTROL,
                header::HeaderName::from_static(LAST_EVENT_ID),
            ]),
    )
}

pub async fn serve(addr: &str, hub: Arc<Hub>, settings: StreamSettings) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(listener, hub, settings).await
}

pub async fn serve_listener(
    listener: TcpListener,
    hub: Arc<Hub>,
    settings: StreamSettings,
) -> std::io::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!("SSE server listening on http://{addr}");
    axum::serve(listener, router(hub, settings)).await
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = match &self {
            HubError::NoChannels(_) | HubError::InvalidEventType(_) => StatusCode::BAD_REQUEST,
            HubError::Unauthorized(_) => StatusCode::FORBIDDEN,
            HubError::DuplicateConnection(_) => StatusCode::CONFLICT,
            HubError::TooManySubscribers(_) => StatusCode::SERVICE_UNAVAILABLE,
            HubError::NoResolver => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

fn watermark(headers: &HeaderMap, params: &HashMap<String, String>) -> Option<u64> {
    headers
        .get(LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok())
        .or_else(|| params.get(LAST_EVENT_ID_PARAM).map(String::as_str))
        .and_then(|v| v.trim().parse().ok())
}

async fn events(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, HubError> {
    let last_event_id = watermark(&headers, &params);
    let ctx = ConnectContext {
        connection_id: state.hub.next_connection_id(),
        params,
        last_event_id,
    };

    let subscription = state.hub.connect(&ctx)?;
    let replay = state.hub.replay_since(last_event_id);

    let mut backlog: Vec<Bytes> = Vec::with_capacity(replay.records.len() + 1);
    if let Some(gap) = &replay.gap {
        warn!(
            connection_id = %ctx.connection_id,
            requested = gap.requested,
            missed = gap.missed(),
            "client resumed past the replay window"
        );
        backlog.push(wire::encode_gap(gap));
    }
    // Live records at or below the floor were replayed or are known lost.
    let floor = match (replay.records.last(), &replay.gap) {
        (Some(last), _) => last.id,
        (None, Some(gap)) => gap.requested.min(gap.latest),
        (None, None) => last_event_id.unwrap_or(0),
    };
    backlog.extend(replay.records.iter().map(|m| wire::encode(m)));
    debug!(
        connection_id = %ctx.connection_id,
        replayed = replay.records.len(),
        "stream opened"
    );

    let live = LiveStream {
        guard: Unregister {
            hub: state.hub.clone(),
            connection_id: ctx.connection_id,
        },
        subscription,
        backlog: backlog.into(),
        floor,
        heartbeat: state.settings.heartbeat.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        }),
    };

    let body = stream::unfold(live, |mut live| async move {
        let chunk = live.next_chunk().await?;
        Some((Ok::<Bytes, Infallible>(chunk), live))
    });

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (
                header::HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            ),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

async fn publish(
    State(state): State<AppState>,
    Json(req): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, HubError> {
    let id = state
        .hub
        .publish_event(req.payload, req.channels, &req.event_type)?;
    Ok(Json(PublishResponse { id }))
}

async fn stats(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats())
}

/// Unregisters its connection when the response body goes away.
struct Unregister {
    hub: Arc<Hub>,
    connection_id: String,
}

impl Drop for Unregister {
    fn drop(&mut self) {
        self.hub.unregister(&self.connection_id);
        debug!(connection_id = %self.connection_id, "stream closed");
    }
}

struct LiveStream {
    guard: Unregister,
    subscription: Subscription,
    backlog: std::collections::VecDeque<Bytes>,
    floor: u64,
    heartbeat: Option<Interval>,
}

impl LiveStream {
    async fn next_chunk(&mut self) -> Option<Bytes> {
        if let Some(chunk) = self.backlog.pop_front() {
            return Some(chunk);
        }

        loop {
            let message = match &mut self.heartbeat {
                Some(interval) => tokio::select! {
                    message = self.subscription.recv() => message,
                    _ = interval.tick() => return Some(Bytes::from_static(wire::HEARTBEAT)),
                },
                None => self.subscription.recv().await,
            };

            let Some(message) = message else {
                debug!(connection_id = %self.guard.connection_id, "subscription ended");
                return None;
            };
            if message.id <= self.floor {
                continue;
            }
            return Some(wire::encode(&message));
        }
    }
}
