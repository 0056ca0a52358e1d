//! Per-exchange routing for the Streamable HTTP transport
//!
//! Every exchange on the protocol endpoint passes the security policy first,
//! then resolves its session, then reaches the engine. Status codes:
//!
//! | Condition                              | Status |
//! |----------------------------------------|--------|
//! | success                                | 200    |
//! | notification accepted                  | 202    |
//! | malformed body / missing session id    | 400    |
//! | origin or host rejected                | 403    |
//! | unknown or expired session             | 404    |
//! | engine failure                         | 500    |
//! | session capacity reached               | 503    |

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use http::header;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::config::HttpConfig;
use crate::engine::{is_initialize_request, Outbound, ProtocolEngine, SessionContext};
use crate::error::{SecurityRejection, SessionError};
use crate::http::streams::StreamRegistry;
use crate::security::{header_str, SecurityPolicy, SESSION_ID_HEADER};
use crate::session::{SessionId, SessionManager};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const INTERNAL_ERROR: i64 = -32603;
pub const MISSING_SESSION: i64 = -32000;
pub const SESSION_NOT_FOUND: i64 = -32001;
pub const CAPACITY_EXCEEDED: i64 = -32002;
pub const FORBIDDEN: i64 = -32003;

/// JSON-RPC error body with a null id
pub fn rpc_error(status: StatusCode, code: i64, message: &str) -> Response {
    (
        status,
        Json(json!({
            "jsonrpc": "2.0",
            "error": { "code": code, "message": message },
            "id": Value::Null,
        })),
    )
        .into_response()
}

fn session_not_found() -> Response {
    rpc_error(
        StatusCode::NOT_FOUND,
        SESSION_NOT_FOUND,
        "Session not found or expired, send a new initialize request",
    )
}

impl IntoResponse for SecurityRejection {
    fn into_response(self) -> Response {
        // The body stays generic; the reason is only logged.
        rpc_error(StatusCode::FORBIDDEN, FORBIDDEN, "Forbidden")
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        match self {
            SessionError::NotFound(_) => session_not_found(),
            SessionError::CapacityExceeded { .. } => {
                let mut response = rpc_error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    CAPACITY_EXCEEDED,
                    "Session capacity reached, retry later",
                );
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from_static("5"));
                response
            }
        }
    }
}

/// Routes protocol exchanges to sessions and the engine
#[derive(Clone)]
pub struct HttpTransportManager {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: String,
    keep_alive: Duration,
    policy: SecurityPolicy,
    sessions: Arc<SessionManager>,
    streams: Arc<StreamRegistry>,
    engine: Arc<dyn ProtocolEngine>,
}

impl HttpTransportManager {
    pub fn new(
        config: &HttpConfig,
        sessions: Arc<SessionManager>,
        streams: Arc<StreamRegistry>,
        engine: Arc<dyn ProtocolEngine>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint: config.endpoint.clone(),
                keep_alive: config.sse_keep_alive(),
                policy: SecurityPolicy::new(config.security.clone()),
                sessions,
                streams,
                engine,
            }),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.inner.sessions
    }

    pub fn streams(&self) -> &Arc<StreamRegistry> {
        &self.inner.streams
    }

    /// Router serving the protocol endpoint
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                &self.inner.endpoint,
                post(handle_post)
                    .get(handle_get)
                    .delete(handle_delete)
                    .options(handle_preflight)
                    .fallback(method_not_allowed),
            )
            // Only the endpoint is guarded; the fallback stays reachable.
            .route_layer(middleware::from_fn_with_state(self.clone(), enforce_security))
            .fallback(fallback_handler)
            .layer(middleware::from_fn(trace_exchange))
            .with_state(self.clone())
    }

    fn context(&self, session_id: &SessionId) -> SessionContext {
        SessionContext {
            session_id: session_id.clone(),
            outbound: Outbound::streams(session_id.clone(), Arc::downgrade(&self.inner.streams)),
        }
    }

    /// Resolve the session named by the request headers and refresh it.
    async fn resolve(&self, headers: &HeaderMap) -> Result<SessionId, Response> {
        let Some(raw) = headers.get(SESSION_ID_HEADER) else {
            return Err(rpc_error(
                StatusCode::BAD_REQUEST,
                MISSING_SESSION,
                "Missing session id",
            ));
        };
        // Unreadable header bytes are a malformed id, not a missing one.
        let Some(id) = raw.to_str().ok().and_then(SessionId::parse) else {
            debug!("Rejecting malformed session id");
            return Err(session_not_found());
        };
        self.inner
            .sessions
            .touch(&id)
            .await
            .map_err(IntoResponse::into_response)?;
        Ok(id)
    }
}

/// Logs each exchange with its outcome
async fn trace_exchange(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let session = request
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    debug!(%method, %uri, session = ?session, "HTTP exchange started");
    let response = next.run(request).await;
    debug!(%method, %uri, status = %response.status(), "HTTP exchange finished");

    response
}

async fn enforce_security(
    State(transport): State<HttpTransportManager>,
    request: Request,
    next: Next,
) -> Response {
    let policy = &transport.inner.policy;
    let origin = header_str(request.headers(), &header::ORIGIN).map(str::to_string);

    if let Err(rejection) = policy.check(request.headers()) {
        warn!(method = %request.method(), "Rejected exchange: {}", rejection);
        let mut response = rejection.into_response();
        policy.apply_security_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    policy.apply_security_headers(response.headers_mut());
    policy.apply_cors_headers(origin.as_deref(), response.headers_mut());
    response
}

fn is_jsonrpc_shaped(message: &Value) -> bool {
    match message {
        Value::Object(_) => true,
        Value::Array(batch) => !batch.is_empty() && batch.iter().all(Value::is_object),
        _ => false,
    }
}

async fn handle_post(
    State(transport): State<HttpTransportManager>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let message: Value = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            debug!("Rejecting unparsable body: {}", e);
            return rpc_error(StatusCode::BAD_REQUEST, PARSE_ERROR, "Parse error");
        }
    };
    if !is_jsonrpc_shaped(&message) {
        return rpc_error(StatusCode::BAD_REQUEST, INVALID_REQUEST, "Invalid Request");
    }

    let sessions = &transport.inner.sessions;
    let has_session_header = headers.contains_key(SESSION_ID_HEADER);

    let (session_id, handshake) = if has_session_header {
        match transport.resolve(&headers).await {
            Ok(id) => (id, false),
            Err(response) => return response,
        }
    } else if is_initialize_request(&message) {
        let client_info = message
            .get("params")
            .and_then(|p| p.get("clientInfo"))
            .cloned();
        match sessions.create(client_info).await {
            Ok(session) => {
                transport.inner.streams.register(&session.id);
                (session.id, true)
            }
            Err(e) => return e.into_response(),
        }
    } else {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            MISSING_SESSION,
            "No valid session id provided",
        );
    };

    let result = transport
        .inner
        .engine
        .handle(transport.context(&session_id), message)
        .await;

    let mut response = match result {
        Ok(Some(reply)) => (StatusCode::OK, Json(reply)).into_response(),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            error!(session_id = %session_id, "Protocol engine failed: {:#}", e);
            if handshake {
                let _ = sessions.evict(&session_id).await;
            }
            return rpc_error(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR, "Internal error");
        }
    };

    if handshake {
        if let Err(e) = sessions.activate(&session_id).await {
            // Evicted while the engine was running.
            return e.into_response();
        }
        info!(session_id = %session_id, "Session initialized");
    }
    if let Ok(value) = HeaderValue::from_str(session_id.as_str()) {
        response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    response
}

async fn handle_get(
    State(transport): State<HttpTransportManager>,
    headers: HeaderMap,
) -> Response {
    let session_id = match transport.resolve(&headers).await {
        Ok(id) => id,
        Err(response) => return response,
    };
    if let Some(last_event_id) = header_str(&headers, &header::HeaderName::from_static("last-event-id")) {
        info!(session_id = %session_id, last_event_id, "Client reconnecting");
    }

    let (handle, events) = match transport.inner.streams.open(&session_id).await {
        Ok(opened) => opened,
        Err(_) => return SessionError::NotFound(session_id).into_response(),
    };
    if let Err(e) = transport.inner.sessions.bind_outbound(&session_id, handle).await {
        // Evicted during the handover; dropping `events` returns the queue.
        return e.into_response();
    }
    info!(session_id = %session_id, generation = handle.generation, "Outbound stream opened");

    let events = events.map(|event| {
        Ok::<_, Infallible>(
            Event::default()
                .event("message")
                .id(event.id.to_string())
                .data(event.message.to_string()),
        )
    });
    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::new().interval(transport.inner.keep_alive))
        .into_response();
    if let Ok(value) = HeaderValue::from_str(session_id.as_str()) {
        response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    response
}

async fn handle_delete(
    State(transport): State<HttpTransportManager>,
    headers: HeaderMap,
) -> Response {
    let session_id = match transport.resolve(&headers).await {
        Ok(id) => id,
        Err(response) => return response,
    };
    info!(session_id = %session_id, "Session termination requested");
    match transport.inner.sessions.evict(&session_id).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_preflight(
    State(transport): State<HttpTransportManager>,
    headers: HeaderMap,
) -> Response {
    let origin = header_str(&headers, &header::ORIGIN);
    let cors = transport.inner.policy.preflight_headers(origin);
    (StatusCode::NO_CONTENT, cors).into_response()
}

async fn method_not_allowed(method: Method) -> Response {
    debug!(%method, "Method not allowed on protocol endpoint");
    let mut response = StatusCode::METHOD_NOT_ALLOWED.into_response();
    response.headers_mut().insert(
        header::ALLOW,
        HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
    );
    response
}

/// Unmatched paths get a hint pointing at the protocol endpoint
async fn fallback_handler(
    State(transport): State<HttpTransportManager>,
    request: Request,
) -> Response {
    warn!(method = %request.method(), path = %request.uri().path(), "No route for request");
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Route not found",
            "path": request.uri().path(),
            "hint": format!(
                "The protocol endpoint is {}; send an initialize request first.",
                transport.inner.endpoint
            ),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OriginRule, SessionConfig};
    use crate::session::OutboundRelease;
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::Body;
    use std::sync::Weak;
    use tower::ServiceExt;

    /// Echoes requests back and pushes a copy of `notify` requests.
    struct EchoEngine;

    #[async_trait]
    impl ProtocolEngine for EchoEngine {
        async fn handle(&self, ctx: SessionContext, message: Value) -> Result<Option<Value>> {
            if message["method"] == "fail" || message["params"]["fail"] == true {
                anyhow::bail!("engine failure");
            }
            if message.get("id").is_none() {
                return Ok(None);
            }
            if message["method"] == "notify" {
                ctx.outbound.push(json!({ "pushed": message["params"] }))?;
            }
            Ok(Some(json!({
                "jsonrpc": "2.0",
                "id": message["id"],
                "result": { "session": ctx.session_id.as_str(), "method": message["method"] }
            })))
        }
    }

    const ORIGIN: &str = "https://a.test";

    fn transport(max_sessions: usize) -> HttpTransportManager {
        let mut config = HttpConfig::new(0);
        config.security.allowed_origins = [OriginRule::parse(ORIGIN).unwrap()].into();
        config.session = SessionConfig {
            max_sessions,
            ..SessionConfig::default()
        };
        let streams = Arc::new(StreamRegistry::new(16, Duration::from_secs(1)));
        let outbound: Weak<dyn OutboundRelease> = Arc::downgrade(&streams) as Weak<dyn OutboundRelease>;
        let sessions = Arc::new(SessionManager::new(config.session.clone()).with_outbound(outbound));
        HttpTransportManager::new(&config, sessions, streams, Arc::new(EchoEngine))
    }

    fn request(method: &str, session: Option<&str>, body: Option<Value>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder()
            .method(method)
            .uri("/mcp")
            .header("host", "localhost:6280")
            .header("origin", ORIGIN)
            .header("content-type", "application/json");
        if let Some(session) = session {
            builder = builder.header(SESSION_ID_HEADER, session);
        }
        let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
        builder.body(body).unwrap()
    }

    fn initialize() -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "clientInfo": { "name": "test-client", "version": "1.0" } }
        })
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn handshake(transport: &HttpTransportManager) -> String {
        let response = transport
            .router()
            .oneshot(request("POST", None, Some(initialize())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response.headers()[SESSION_ID_HEADER].to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn initialize_creates_active_session() {
        let transport = transport(10);
        let id = handshake(&transport).await;

        let session = transport
            .sessions()
            .get(&SessionId::parse(&id).unwrap())
            .await
            .unwrap();
        assert_eq!(session.state, crate::session::SessionState::Active);
        assert_eq!(session.client_info.unwrap()["name"], "test-client");
    }

    #[tokio::test]
    async fn responses_carry_security_and_cors_headers() {
        let transport = transport(10);
        let response = transport
            .router()
            .oneshot(request("POST", None, Some(initialize())))
            .await
            .unwrap();
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        assert_eq!(response.headers()["access-control-allow-origin"], ORIGIN);
    }

    #[tokio::test]
    async fn request_with_session_is_dispatched() {
        let transport = transport(10);
        let id = handshake(&transport).await;

        let response = transport
            .router()
            .oneshot(request(
                "POST",
                Some(&id),
                Some(json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["result"]["session"], id.as_str());
    }

    #[tokio::test]
    async fn notification_is_accepted() {
        let transport = transport(10);
        let id = handshake(&transport).await;
        let response = transport
            .router()
            .oneshot(request(
                "POST",
                Some(&id),
                Some(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn non_handshake_without_session_is_rejected() {
        let transport = transport(10);
        let response = transport
            .router()
            .oneshot(request(
                "POST",
                None,
                Some(json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(transport.sessions().is_empty());
    }

    #[tokio::test]
    async fn unknown_session_is_not_recreated() {
        let transport = transport(10);
        let stale = SessionId::generate();
        let response = transport
            .router()
            .oneshot(request("POST", Some(stale.as_str()), Some(initialize())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], SESSION_NOT_FOUND);
        assert!(transport.sessions().is_empty());
    }

    #[tokio::test]
    async fn malformed_session_id_is_unknown() {
        let transport = transport(10);
        let response = transport
            .router()
            .oneshot(request("GET", Some("../../etc/passwd"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn non_utf8_session_id_is_unknown() {
        let transport = transport(10);
        let mut req = request(
            "POST",
            None,
            Some(json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" })),
        );
        req.headers_mut().insert(
            SESSION_ID_HEADER,
            HeaderValue::from_bytes(b"\xff\xfe-session").unwrap(),
        );
        let response = transport.router().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], SESSION_NOT_FOUND);
        assert!(transport.sessions().is_empty());
    }

    #[tokio::test]
    async fn malformed_body_is_a_parse_error() {
        let transport = transport(10);
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("host", "localhost")
            .header("origin", ORIGIN)
            .body(Body::from("{not json"))
            .unwrap();
        let response = transport.router().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], PARSE_ERROR);

        let response = transport
            .router()
            .oneshot(request("POST", None, Some(json!(42))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn capacity_exceeded_is_service_unavailable() {
        let transport = transport(1);
        handshake(&transport).await;
        let response = transport
            .router()
            .oneshot(request("POST", None, Some(initialize())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get(SESSION_ID_HEADER).is_none());
        assert_eq!(transport.sessions().len(), 1);
    }

    #[tokio::test]
    async fn security_rejection_happens_before_session_lookup() {
        let transport = transport(10);
        let id = handshake(&transport).await;
        let before = transport
            .sessions()
            .get(&SessionId::parse(&id).unwrap())
            .await
            .unwrap()
            .last_active_at;

        let mut req = request(
            "POST",
            Some(&id),
            Some(json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" })),
        );
        req.headers_mut()
            .insert("origin", HeaderValue::from_static("https://b.test"));
        let response = transport.router().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let after = transport
            .sessions()
            .get(&SessionId::parse(&id).unwrap())
            .await
            .unwrap()
            .last_active_at;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn rebinding_protection_checks_host() {
        let transport = transport(10);
        let mut req = request("POST", None, Some(initialize()));
        req.headers_mut()
            .insert("host", HeaderValue::from_static("attacker.test"));
        let response = transport.router().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(transport.sessions().is_empty());
    }

    #[tokio::test]
    async fn engine_failure_on_handshake_discards_session() {
        let transport = transport(10);
        let response = transport
            .router()
            .oneshot(request(
                "POST",
                None,
                Some(json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": { "fail": true } })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(SESSION_ID_HEADER).is_none());
        assert_eq!(body_json(response).await["error"]["code"], INTERNAL_ERROR);
        assert!(transport.sessions().is_empty());
        assert!(transport.streams().is_empty());
    }

    #[tokio::test]
    async fn engine_failure_after_handshake_keeps_session() {
        let transport = transport(10);
        let id = handshake(&transport).await;
        let response = transport
            .router()
            .oneshot(request(
                "POST",
                Some(&id),
                Some(json!({ "jsonrpc": "2.0", "id": 2, "method": "fail" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(transport.sessions().len(), 1);
    }

    #[tokio::test]
    async fn delete_terminates_session() {
        let transport = transport(10);
        let id = handshake(&transport).await;

        let response = transport
            .router()
            .oneshot(request("DELETE", Some(&id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(transport.sessions().is_empty());
        assert!(!transport.streams().contains(&SessionId::parse(&id).unwrap()));

        let response = transport
            .router()
            .oneshot(request("DELETE", Some(&id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_opens_event_stream_and_binds_channel() {
        let transport = transport(10);
        let id = handshake(&transport).await;

        let response = transport
            .router()
            .oneshot(request("GET", Some(&id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let session = transport
            .sessions()
            .get(&SessionId::parse(&id).unwrap())
            .await
            .unwrap();
        assert!(session.outbound.is_some());
    }

    #[tokio::test]
    async fn pushed_messages_arrive_on_event_stream() {
        let transport = transport(10);
        let id = handshake(&transport).await;

        let response = transport
            .router()
            .oneshot(request(
                "POST",
                Some(&id),
                Some(json!({ "jsonrpc": "2.0", "id": 3, "method": "notify", "params": "hello" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = transport
            .router()
            .oneshot(request("GET", Some(&id), None))
            .await
            .unwrap();
        let mut body = response.into_body().into_data_stream();
        let chunk = body.next().await.unwrap().unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(text.contains("event: message"), "{text}");
        assert!(text.contains(r#"{"pushed":"hello"}"#), "{text}");
    }

    #[tokio::test]
    async fn get_without_session_is_bad_request() {
        let transport = transport(10);
        let response = transport
            .router()
            .oneshot(request("GET", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn preflight_returns_cors_headers() {
        let transport = transport(10);
        let response = transport
            .router()
            .oneshot(request("OPTIONS", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()["access-control-allow-methods"],
            "GET, POST, DELETE, OPTIONS"
        );
    }

    #[tokio::test]
    async fn other_methods_are_not_allowed() {
        let transport = transport(10);
        let response = transport
            .router()
            .oneshot(request("PUT", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn unmatched_path_returns_hint() {
        let transport = transport(10);
        let response = transport
            .router()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/elsewhere")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_json(response).await["hint"]
            .as_str()
            .unwrap()
            .contains("/mcp"));
    }
}
