//! REST API server for the crypto analyst
//!
//! Exposes sessions over HTTP. Sessions are keyed by `conversation_id`;
//! requests without one share the default session.

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::agent::LoopDriver;
use crate::config::Settings;
use crate::error::AnalystError;
use crate::models::{Language, StreamEvent};
use crate::session::AnalystSession;
use crate::stream::EventStream;
use crate::validators::{validate_conversation_id, validate_language, COMMON_SYMBOLS};

// =============================
// Request Models
// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnalyzeRequest {
    pub symbol: String,
    pub question: String,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
}

// =============================
// Response Wrapper
// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

// =============================
// Session Registry
// =============================

struct RegistryEntry {
    session: AnalystSession,
    last_used: Instant,
}

/// Sessions share one loop driver and own separate histories.
///
/// Keyed sessions idle for longer than `idle_timeout` are dropped when a new
/// one is created, and the least recently used go first once `max_sessions`
/// is reached. The default session is never evicted.
pub struct SessionRegistry {
    driver: Arc<LoopDriver>,
    default: AnalystSession,
    sessions: RwLock<HashMap<String, RegistryEntry>>,
    max_sessions: usize,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(driver: Arc<LoopDriver>, max_sessions: usize, idle_timeout: Duration) -> Self {
        Self {
            default: AnalystSession::new(driver.clone()),
            driver,
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            idle_timeout,
        }
    }

    /// Existing session for the id, or the default when no id is given.
    pub async fn get(&self, conversation_id: Option<&str>) -> Option<AnalystSession> {
        let Some(id) = conversation_id else {
            return Some(self.default.clone());
        };

        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(id)?;
        entry.last_used = Instant::now();
        Some(entry.session.clone())
    }

    /// Like `get`, but creates the session on first use.
    pub async fn session(&self, conversation_id: Option<&str>) -> AnalystSession {
        let Some(id) = conversation_id else {
            return self.default.clone();
        };

        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(id) {
            entry.last_used = now;
            return entry.session.clone();
        }

        self.evict(&mut sessions, now);
        info!(conversation_id = %id, "Creating session");
        let session = AnalystSession::new(self.driver.clone());
        sessions.insert(
            id.to_string(),
            RegistryEntry {
                session: session.clone(),
                last_used: now,
            },
        );
        session
    }

    /// Makes room for one more entry.
    fn evict(&self, sessions: &mut HashMap<String, RegistryEntry>, now: Instant) {
        let before = sessions.len();
        sessions.retain(|_, entry| now.duration_since(entry.last_used) < self.idle_timeout);

        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| id.clone());
            let Some(id) = oldest else { break };
            sessions.remove(&id);
        }

        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, remaining = sessions.len(), "Evicted sessions");
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

// =============================
// API State
// =============================

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<SessionRegistry>,
    pub settings: Arc<Settings>,
}

impl ApiState {
    pub fn new(driver: Arc<LoopDriver>, settings: Settings) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new(
                driver,
                settings.max_sessions,
                settings.session_idle_timeout,
            )),
            settings: Arc::new(settings),
        }
    }
}

// =============================
// Error Mapping
// =============================

fn status_for(error: &AnalystError) -> StatusCode {
    match error {
        AnalystError::Validation(_) => StatusCode::BAD_REQUEST,
        AnalystError::NotFound(_) => StatusCode::NOT_FOUND,
        AnalystError::DecisionProcess(_) | AnalystError::Http(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Client errors echo their message; server errors carry detail only in debug.
fn public_message(kind: &str, message: String, action: &str, debug: bool) -> String {
    if AnalystError::is_client_kind(kind) || debug {
        message
    } else {
        format!("{} failed ({})", action, kind)
    }
}

fn error_message(error: &AnalystError, action: &str, debug: bool) -> String {
    public_message(error.kind(), error.to_string(), action, debug)
}

fn error_response(error: AnalystError, action: &str, debug: bool) -> ApiResult {
    let status = status_for(&error);
    if status.is_server_error() {
        warn!(error = %error, kind = error.kind(), "{} failed", action);
    }
    (status, Json(ApiResponse::error(error_message(&error, action, debug))))
}

/// Parses the optional language and conversation id shared by all bodies.
fn request_scope(lang: Option<&str>, conversation_id: Option<&str>) -> crate::Result<(Language, Option<String>)> {
    Ok((
        validate_language(lang.unwrap_or_default())?,
        validate_conversation_id(conversation_id)?,
    ))
}

// =============================
// SSE Framing
// =============================

type SseStream = BoxStream<'static, Result<Event, Infallible>>;

fn sse_frame(kind: &str, data: &str) -> Result<Event, Infallible> {
    let payload = serde_json::json!({ "type": kind, "data": data });
    Ok(Event::default().event("message").data(payload.to_string()))
}

fn event_frame(event: StreamEvent, action: &str, debug: bool) -> Result<Event, Infallible> {
    match event {
        StreamEvent::TextDelta { content } => sse_frame("chunk", &content),
        StreamEvent::CapabilityStarted { name } => sse_frame("tool_start", &name),
        StreamEvent::CapabilityFinished { name } => sse_frame("tool_end", &name),
        StreamEvent::Completed => sse_frame("complete", ""),
        StreamEvent::Failed { kind, reason } => sse_frame("error", &public_message(&kind, reason, action, debug)),
    }
}

/// Validation failures become a single error frame.
fn sse_response(events: crate::Result<EventStream>, action: &'static str, debug: bool) -> Sse<SseStream> {
    let stream: SseStream = match events {
        Ok(events) => events.map(move |event| event_frame(event, action, debug)).boxed(),
        Err(e) => {
            let message = error_message(&e, action, debug);
            stream::once(async move { sse_frame("error", &message) }).boxed()
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// =============================
// Handlers
// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": state.settings.app_version,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn root(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": state.settings.app_name,
        "version": state.settings.app_version,
        "api_prefix": state.settings.api_prefix,
    }))
}

async fn list_tools(State(state): State<ApiState>) -> ApiResult {
    let tools = state.registry.session(None).await.list_capabilities();
    let count = tools.len();
    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({ "tools": tools, "count": count }))),
    )
}

async fn analyze(State(state): State<ApiState>, Json(req): Json<AnalyzeRequest>) -> ApiResult {
    let debug = state.settings.debug;
    info!(symbol = %req.symbol, "Analyze request");

    let (lang, conversation_id) = match request_scope(req.lang.as_deref(), req.conversation_id.as_deref()) {
        Ok(scope) => scope,
        Err(e) => return error_response(e, "analysis", debug),
    };
    let session = state.registry.session(conversation_id.as_deref()).await;

    match session.analyze(&req.symbol, &req.question, lang).await {
        Ok(result) => (StatusCode::OK, Json(ApiResponse::success(result))),
        Err(e) => error_response(e, "analysis", debug),
    }
}

async fn analyze_stream(State(state): State<ApiState>, Json(req): Json<AnalyzeRequest>) -> Sse<SseStream> {
    info!(symbol = %req.symbol, "Analyze stream request");

    let events = match request_scope(req.lang.as_deref(), req.conversation_id.as_deref()) {
        Ok((lang, conversation_id)) => state
            .registry
            .session(conversation_id.as_deref())
            .await
            .analyze_events(&req.symbol, &req.question, lang),
        Err(e) => Err(e),
    };
    sse_response(events, "analysis", state.settings.debug)
}

async fn chat(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> ApiResult {
    let debug = state.settings.debug;

    let (lang, conversation_id) = match request_scope(req.lang.as_deref(), req.conversation_id.as_deref()) {
        Ok(scope) => scope,
        Err(e) => return error_response(e, "chat", debug),
    };
    info!(conversation_id = ?conversation_id, "Chat request");
    let session = state.registry.session(conversation_id.as_deref()).await;

    match session.chat(&req.message, lang).await {
        Ok(result) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "message": result.message,
                "answer": result.answer,
                "language": result.language,
                "capabilities": result.capabilities,
                "conversation_id": conversation_id,
            }))),
        ),
        Err(e) => error_response(e, "chat", debug),
    }
}

async fn chat_stream(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> Sse<SseStream> {
    let events = match request_scope(req.lang.as_deref(), req.conversation_id.as_deref()) {
        Ok((lang, conversation_id)) => state
            .registry
            .session(conversation_id.as_deref())
            .await
            .chat_events(&req.message, lang),
        Err(e) => Err(e),
    };
    sse_response(events, "chat", state.settings.debug)
}

async fn clear(State(state): State<ApiState>, body: Option<Json<ClearRequest>>) -> ApiResult {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let conversation_id = match validate_conversation_id(req.conversation_id.as_deref()) {
        Ok(id) => id,
        Err(e) => return error_response(e, "clear", state.settings.debug),
    };

    // Unknown ids have nothing to clear.
    if let Some(session) = state.registry.get(conversation_id.as_deref()).await {
        session.reset_session().await;
    }
    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "message": "对话记忆已清除",
            "conversation_id": conversation_id,
        }))),
    )
}

async fn symbols() -> ApiResult {
    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "symbols": COMMON_SYMBOLS,
            "count": COMMON_SYMBOLS.len(),
            "note": "支持更多币种，但常见币种数据更完整",
        }))),
    )
}

// =============================
// Router
// =============================

pub fn create_router(state: ApiState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/tools", get(list_tools))
        .route("/analyze", post(analyze))
        .route("/analyze/stream", post(analyze_stream))
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .route("/clear", post(clear))
        .route("/symbols", get(symbols));

    let prefix = state.settings.api_prefix.trim_end_matches('/').to_string();
    let router = Router::new().route("/", get(root)).route("/health", get(health));
    let router = if prefix.is_empty() {
        router.merge(api)
    } else {
        router.nest(&prefix, api)
    };

    router
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// =============================
// Server Startup
// =============================

pub async fn start_server(state: ApiState) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", state.settings.api_host, state.settings.api_port);
    let prefix = state.settings.api_prefix.clone();
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("API server listening on http://{}", addr);
    info!("API prefix: {}", prefix);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::catalog;
    use crate::decision::{Decision, ScriptStep, ScriptedDecisionProcess};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state(steps: Vec<ScriptStep>) -> ApiState {
        let process = Arc::new(ScriptedDecisionProcess::new(steps));
        let driver = Arc::new(LoopDriver::new(process, catalog(), 5).unwrap());
        ApiState::new(driver, Settings::default())
    }

    fn answers(texts: &[&str]) -> Vec<ScriptStep> {
        texts
            .iter()
            .map(|t| ScriptStep::Reply(Decision::Final(t.to_string())))
            .collect()
    }

    async fn send(state: &ApiState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, String) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn send_json(state: &ApiState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, text) = send(state, method, uri, body).await;
        (status, serde_json::from_str(&text).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let state = state(vec![]);
        let (status, body) = send_json(&state, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, _) = send_json(&state, "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_tools_listing() {
        let state = state(vec![]);
        let (status, body) = send_json(&state, "GET", "/api/v1/tools", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["count"], 3);
        assert_eq!(body["data"]["tools"][0]["name"], "get_echo");
    }

    #[tokio::test]
    async fn test_analyze_success() {
        let state = state(answers(&["Sideways."]));
        let (status, body) = send_json(
            &state,
            "POST",
            "/api/v1/analyze",
            Some(json!({"symbol": "btc", "question": "Trend?", "lang": "en"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["topic"], "BTC");
        assert_eq!(body["data"]["answer"], "Sideways.");
        assert_eq!(state.registry.session(None).await.history().await.len(), 2);
    }

    #[tokio::test]
    async fn test_analyze_validation_error() {
        let state = state(vec![]);
        let (status, body) = send_json(
            &state,
            "POST",
            "/api/v1/analyze",
            Some(json!({"symbol": "BTC", "question": "Trend?", "lang": "fr"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("unsupported language"));
    }

    #[tokio::test]
    async fn test_decision_failure_hides_detail() {
        let state = state(vec![ScriptStep::Fail("secret upstream detail".into())]);
        let (status, body) = send_json(
            &state,
            "POST",
            "/api/v1/chat",
            Some(json!({"message": "hello there"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let error = body["error"].as_str().unwrap();
        assert!(!error.contains("secret"));
        assert!(error.contains("decision_process"));
    }

    #[tokio::test]
    async fn test_stream_failure_hides_detail() {
        let state = state(vec![ScriptStep::Fail("secret upstream detail".into())]);
        let (status, text) = send(
            &state,
            "POST",
            "/api/v1/chat/stream",
            Some(json!({"message": "hello there"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(text.contains(r#""type":"error""#));
        assert!(text.contains("chat failed (decision_process)"));
        assert!(!text.contains("secret"));
    }

    #[tokio::test]
    async fn test_stream_failure_detail_in_debug() {
        let process = Arc::new(ScriptedDecisionProcess::new(vec![ScriptStep::Fail(
            "upstream quota".into(),
        )]));
        let driver = Arc::new(LoopDriver::new(process, catalog(), 5).unwrap());
        let settings = Settings {
            debug: true,
            ..Settings::default()
        };
        let state = ApiState::new(driver, settings);

        let (_, text) = send(
            &state,
            "POST",
            "/api/v1/chat/stream",
            Some(json!({"message": "hello there"})),
        )
        .await;
        assert!(text.contains("upstream quota"));
    }

    #[tokio::test]
    async fn test_conversations_are_isolated() {
        let state = state(answers(&["one", "two"]));
        let (status, body) = send_json(
            &state,
            "POST",
            "/api/v1/chat",
            Some(json!({"message": "hello there", "conversation_id": "conv_1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["conversation_id"], "conv_1");

        send_json(&state, "POST", "/api/v1/chat", Some(json!({"message": "and you?"}))).await;

        assert_eq!(state.registry.len().await, 1);
        assert_eq!(state.registry.session(Some("conv_1")).await.history().await.len(), 2);
        assert_eq!(state.registry.session(None).await.history().await.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_resets_session() {
        let state = state(answers(&["one"]));
        send_json(&state, "POST", "/api/v1/chat", Some(json!({"message": "hello there"}))).await;

        let (status, body) = send_json(&state, "POST", "/api/v1/clear", Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(state.registry.session(None).await.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_unknown_ids_creates_nothing() {
        let state = state(vec![]);
        for i in 0..50 {
            let (status, _) = send_json(
                &state,
                "POST",
                "/api/v1/clear",
                Some(json!({"conversation_id": format!("conv_{}", i)})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
        assert_eq!(state.registry.len().await, 0);
        assert!(state.registry.get(Some("conv_0")).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_resets_keyed_session() {
        let state = state(answers(&["one"]));
        let body = json!({"message": "hello there", "conversation_id": "conv_1"});
        send_json(&state, "POST", "/api/v1/chat", Some(body)).await;

        let (status, _) = send_json(&state, "POST", "/api/v1/clear", Some(json!({"conversation_id": "conv_1"}))).await;
        assert_eq!(status, StatusCode::OK);
        let session = state.registry.get(Some("conv_1")).await.unwrap();
        assert!(session.history().await.is_empty());
    }

    fn registry(max_sessions: usize, idle_timeout: Duration) -> SessionRegistry {
        let process = Arc::new(ScriptedDecisionProcess::new(vec![]));
        let driver = Arc::new(LoopDriver::new(process, catalog(), 5).unwrap());
        SessionRegistry::new(driver, max_sessions, idle_timeout)
    }

    #[tokio::test]
    async fn test_registry_is_bounded() {
        let registry = registry(3, Duration::from_secs(3600));
        for i in 0..10 {
            registry.session(Some(&format!("conv_{}", i))).await;
        }
        assert_eq!(registry.len().await, 3);
        assert!(registry.get(Some("conv_9")).await.is_some());
        assert!(registry.get(None).await.is_some());
    }

    #[tokio::test]
    async fn test_registry_evicts_least_recently_used() {
        let registry = registry(2, Duration::from_secs(3600));
        registry.session(Some("a")).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.session(Some("b")).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(registry.get(Some("a")).await.is_some());
        tokio::time::sleep(Duration::from_millis(5)).await;

        registry.session(Some("c")).await;
        assert!(registry.get(Some("a")).await.is_some());
        assert!(registry.get(Some("b")).await.is_none());
        assert!(registry.get(Some("c")).await.is_some());
    }

    #[tokio::test]
    async fn test_registry_drops_idle_sessions() {
        let registry = registry(100, Duration::ZERO);
        registry.session(Some("a")).await;
        registry.session(Some("b")).await;
        assert_eq!(registry.len().await, 1);
        assert!(registry.get(Some("b")).await.is_some());
    }

    #[tokio::test]
    async fn test_stream_frames() {
        let state = state(answers(&["Up only."]));
        let (status, text) = send(
            &state,
            "POST",
            "/api/v1/chat/stream",
            Some(json!({"message": "BTC outlook?"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(text.contains(r#""type":"chunk""#));
        assert!(text.contains("Up only."));
        assert!(text.contains(r#""type":"complete""#));
    }

    #[tokio::test]
    async fn test_stream_validation_is_error_frame() {
        let state = state(vec![]);
        let (status, text) = send(
            &state,
            "POST",
            "/api/v1/analyze/stream",
            Some(json!({"symbol": "???", "question": "Trend?"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(text.contains(r#""type":"error""#));
        assert!(!text.contains("complete"));
    }

    #[tokio::test]
    async fn test_symbols() {
        let state = state(vec![]);
        let (_, body) = send_json(&state, "GET", "/api/v1/symbols", None).await;
        assert_eq!(body["data"]["count"], 20);
        assert_eq!(body["data"]["symbols"][0], "BTC");
    }
}
