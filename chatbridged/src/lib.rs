mod adapters;
mod app;
mod domain;
mod ports;
mod telemetry;
#[cfg(test)]
mod test_support;

pub use adapters::framing::QuiescenceFraming;
pub use adapters::transport::{LoopbackPeer, LoopbackTransport, TcpBackendTransport};
pub use app::bridge::{BridgeError, BridgeService, ReplyTimings};
pub use app::session::SessionRegistry;
pub use domain::protocol::PROTOCOL_REVISION;
pub use ports::{BackendTransport, TransportError};

use anyhow::Context;
use app::bridge::BridgeResult;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use domain::protocol::BackendCommand;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

type Bridge = BridgeService<QuiescenceFraming>;

#[derive(Clone)]
struct AppState {
    bridge: Arc<Bridge>,
    started_at: Instant,
    telemetry_ready: bool,
}

impl AppState {
    fn new(bridge: Arc<Bridge>, telemetry_ready: bool) -> Self {
        Self {
            bridge,
            started_at: Instant::now(),
            telemetry_ready,
        }
    }

    fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: SocketAddr,
    pub backend_host: String,
    pub backend_port: u16,
    pub tick: Duration,
    pub timings: ReplyTimings,
    pub static_dir: Option<PathBuf>,
    pub otlp_endpoint: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 5000)),
            backend_host: "127.0.0.1".to_string(),
            backend_port: 6789,
            tick: Duration::from_millis(50),
            timings: ReplyTimings::default(),
            static_dir: None,
            otlp_endpoint: None,
        }
    }
}

pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let (metrics, provider) = if let Some(endpoint) = settings.otlp_endpoint.as_deref() {
        let (provider, metrics) = telemetry::init_telemetry(endpoint, "chatbridged")?;
        (Some(Arc::new(metrics)), Some(provider))
    } else {
        (None, None)
    };

    let transport = Arc::new(TcpBackendTransport::new(
        settings.backend_host.clone(),
        settings.backend_port,
    ));
    let registry = SessionRegistry::new(transport, metrics.clone());
    let bridge = Arc::new(BridgeService::new(
        registry.clone(),
        Arc::new(QuiescenceFraming::new(settings.tick)),
        settings.timings,
        metrics.clone(),
    ));
    let state = AppState::new(bridge, metrics.is_some());
    let app = router(state, settings.static_dir.as_deref());

    let listener = TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("binding HTTP listener on {}", settings.listen))?;
    info!(
        listen = %settings.listen,
        backend = %registry.backend_target(),
        "chatbridged started"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown().await;

    if let Some(provider) = provider {
        if let Err(e) = telemetry::shutdown_telemetry(provider) {
            warn!(error = %e, "telemetry shutdown failed");
        }
    }

    Ok(())
}

fn router(state: AppState, static_dir: Option<&Path>) -> Router {
    let api = Router::new()
        .route("/healthz", get(health))
        .route("/status", get(status))
        .route("/api/login", post(login))
        .route("/api/message/private", post(private_message))
        .route("/api/group", post(create_group))
        .route("/api/message/group", post(group_message))
        .route("/api/history/private", get(private_history))
        .route("/api/history/group", get(group_history))
        .route("/api/connected-users", get(connected_users))
        .route("/api/user-groups", get(user_groups))
        .route("/api/logout", post(logout))
        .with_state(state);

    let api = match static_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    };
    api.layer(CorsLayer::permissive())
}

async fn shutdown_signal() {
    wait_for_shutdown(ctrl_c()).await
}

/// Resolves once `signal` fires. A listener that failed to install never
/// resolves, so the server keeps running.
async fn wait_for_shutdown<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => {
            warn!(%err, "cannot listen for ctrl-c; serving until the process is killed");
            std::future::pending::<()>().await;
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[derive(Serialize)]
struct StatusResponse {
    version: &'static str,
    protocol_revision: &'static str,
    uptime_ms: u128,
    backend: String,
    active_sessions: usize,
    telemetry_ready: bool,
    reply_timings: TimingsView,
    sessions: Vec<SessionView>,
}

#[derive(Serialize)]
struct SessionView {
    user: String,
    status: &'static str,
    opened_at: DateTime<Utc>,
    connected_at: Option<DateTime<Utc>>,
    age_ms: i64,
}

#[derive(Serialize)]
struct TimingsView {
    quiet_ms: u128,
    max_wait_ms: u128,
    group_list_max_wait_ms: u128,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let registry = state.bridge().registry();
    let timings = state.bridge().timings();
    let now = Utc::now();
    let sessions: Vec<SessionView> = registry
        .sessions()
        .await
        .iter()
        .map(|session| {
            let opened_at = session.opened_at();
            SessionView {
                user: session.user().to_string(),
                status: session.status().as_str(),
                opened_at,
                connected_at: session.connected_at(),
                age_ms: (now - opened_at).num_milliseconds(),
            }
        })
        .collect();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        protocol_revision: PROTOCOL_REVISION,
        uptime_ms: state.uptime().as_millis(),
        backend: registry.backend_target(),
        active_sessions: sessions.len(),
        telemetry_ready: state.telemetry_ready,
        reply_timings: TimingsView {
            quiet_ms: timings.quiet.as_millis(),
            max_wait_ms: timings.max.as_millis(),
            group_list_max_wait_ms: timings.group_list_max.as_millis(),
        },
        sessions,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UserRequest {
    username: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PrivateMessageRequest {
    username: String,
    to: String,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CreateGroupRequest {
    username: String,
    group: String,
    members: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GroupMessageRequest {
    username: String,
    group: String,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PrivateHistoryQuery {
    username: String,
    with: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GroupHistoryQuery {
    username: String,
    group: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputResponse {
    ok: bool,
    output: String,
}

impl OutputResponse {
    fn new(output: String) -> Self {
        Self { ok: true, output }
    }
}

#[derive(Debug, Serialize)]
struct UsersResponse {
    ok: bool,
    users: Vec<String>,
}

#[derive(Debug, Serialize)]
struct GroupsResponse {
    ok: bool,
    groups: Vec<String>,
    output: String,
}

#[derive(Debug, Serialize)]
struct LogoutResponse {
    ok: bool,
    closed: bool,
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<UserRequest>, JsonRejection>,
) -> Result<Json<OutputResponse>, ApiError> {
    let Json(request) = payload?;
    let reply = state.bridge().login(&request.username).await?;
    Ok(Json(OutputResponse::new(reply.text)))
}

async fn private_message(
    State(state): State<AppState>,
    payload: Result<Json<PrivateMessageRequest>, JsonRejection>,
) -> Result<Json<OutputResponse>, ApiError> {
    let Json(request) = payload?;
    let command = BackendCommand::PrivateMessage {
        to: request.to,
        message: request.message,
    };
    run_command(&state, &request.username, command).await
}

async fn create_group(
    State(state): State<AppState>,
    payload: Result<Json<CreateGroupRequest>, JsonRejection>,
) -> Result<Json<OutputResponse>, ApiError> {
    let Json(request) = payload?;
    let command = BackendCommand::CreateGroup {
        group: request.group,
        members: request.members,
    };
    run_command(&state, &request.username, command).await
}

async fn group_message(
    State(state): State<AppState>,
    payload: Result<Json<GroupMessageRequest>, JsonRejection>,
) -> Result<Json<OutputResponse>, ApiError> {
    let Json(request) = payload?;
    let command = BackendCommand::GroupMessage {
        group: request.group,
        message: request.message,
    };
    run_command(&state, &request.username, command).await
}

async fn private_history(
    State(state): State<AppState>,
    query: Result<Query<PrivateHistoryQuery>, QueryRejection>,
) -> Result<Json<OutputResponse>, ApiError> {
    let Query(query) = query?;
    let command = BackendCommand::PrivateHistory { with: query.with };
    run_command(&state, &query.username, command).await
}

async fn group_history(
    State(state): State<AppState>,
    query: Result<Query<GroupHistoryQuery>, QueryRejection>,
) -> Result<Json<OutputResponse>, ApiError> {
    let Query(query) = query?;
    let command = BackendCommand::GroupHistory { group: query.group };
    run_command(&state, &query.username, command).await
}

async fn connected_users(
    State(state): State<AppState>,
    query: Result<Query<UserRequest>, QueryRejection>,
) -> Result<Json<UsersResponse>, ApiError> {
    let Query(query) = query?;
    let users = state.bridge().connected_users(&query.username).await?;
    Ok(Json(UsersResponse {
        ok: true,
        users: users.into_iter().map(|user| user.to_string()).collect(),
    }))
}

async fn user_groups(
    State(state): State<AppState>,
    query: Result<Query<UserRequest>, QueryRejection>,
) -> Result<Json<GroupsResponse>, ApiError> {
    let Query(query) = query?;
    let listing = state.bridge().list_groups(&query.username).await?;
    Ok(Json(GroupsResponse {
        ok: true,
        groups: listing.groups,
        output: listing.reply.text,
    }))
}

async fn logout(
    State(state): State<AppState>,
    payload: Result<Json<UserRequest>, JsonRejection>,
) -> Result<Json<LogoutResponse>, ApiError> {
    let Json(request) = payload?;
    let closed = state.bridge().logout(&request.username).await?;
    Ok(Json(LogoutResponse { ok: true, closed }))
}

async fn run_command(
    state: &AppState,
    username: &str,
    command: BackendCommand,
) -> Result<Json<OutputResponse>, ApiError> {
    let operation = command.name();
    let result: BridgeResult<_> = state.bridge().execute(username, command).await;
    let reply = result.map_err(|err| {
        warn!(operation, %err, "rejected bridge request");
        ApiError::from(err)
    })?;
    Ok(Json(OutputResponse::new(reply.text)))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                ok: false,
                error: message.into(),
            },
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::InvalidIdentifier => ApiError::invalid(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::invalid(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::invalid(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status;
        let body = Json(self.body);
        (status, body).into_response()
    }
}
