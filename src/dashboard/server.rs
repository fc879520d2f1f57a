//! HTTP API and WebSocket dashboard server

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{ClassifierSettings, Config};
use crate::error::{SettingsError, StateError};
use crate::modules::monitor::{MonitorStats, WalletMonitor};
use crate::modules::phishing::{PhishingAlert, TrackedDomain};
use crate::modules::pipeline::{ClassificationPipeline, PipelineStats};
use crate::modules::suspicious::{SuspiciousAlert, WalletGroup};
use crate::utils::database::{DbStats, StoredAlert, TransactionRow};
use crate::utils::{AlertRecord, SolanaService};

/// Query params for list endpoints
#[derive(Debug, Deserialize)]
pub struct ListParams {
    limit: Option<usize>,
    #[serde(default)]
    flagged: bool,
}

/// Settings override request body
#[derive(Debug, Deserialize)]
pub struct SettingRequest {
    key: String,
    value: f64,
}

/// Whitelist request body
#[derive(Debug, Deserialize)]
pub struct AddressRequest {
    address: String,
}

/// API success response
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    success: bool,
    message: String,
}

impl ApiResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }
}

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: String,
    uptime: f64,
    monitor_running: bool,
}

/// Stats response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pipeline: PipelineStats,
    monitor: MonitorStats,
    database: Option<DbStats>,
    telegram_sent_today: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoneypotsResponse {
    known: BTreeSet<String>,
    whitelisted: BTreeSet<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspiciousResponse {
    addresses: BTreeSet<String>,
    unsellable_mints: Vec<(String, i64)>,
    wallet_groups: Vec<WalletGroup>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhishingResponse {
    addresses: BTreeSet<String>,
    domains: Vec<TrackedDomain>,
}

/// WebSocket message types
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    #[serde(rename = "init")]
    Init {
        stats: StatsResponse,
        recent_alerts: Vec<AlertRecord>,
    },
    #[serde(rename = "alert")]
    Alert(AlertRecord),
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pipeline: ClassificationPipeline<SolanaService>,
    pub monitor: WalletMonitor,
    pub start_time: std::time::Instant,
}

impl AppState {
    fn stats(&self) -> StatsResponse {
        StatsResponse {
            pipeline: self.pipeline.get_stats(),
            monitor: self.monitor.get_stats(),
            database: self.pipeline.database().get_stats().ok(),
            telegram_sent_today: self.pipeline.alerts().telegram_sent_today(),
        }
    }
}

/// Dashboard server
pub struct DashboardServer {
    config: Config,
    state: AppState,
}

impl DashboardServer {
    /// Create a new dashboard server
    pub fn new(
        config: Config,
        pipeline: ClassificationPipeline<SolanaService>,
        monitor: WalletMonitor,
    ) -> Self {
        let state = AppState {
            config: config.clone(),
            pipeline,
            monitor,
            start_time: std::time::Instant::now(),
        };

        Self { config, state }
    }

    /// Build the router without binding a listener
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/api/stats", get(get_stats))
            .route("/api/transactions", get(get_transactions))
            // Honeypots
            .route("/api/honeypots", get(get_honeypots))
            .route("/api/honeypots/:mint", get(get_honeypot))
            .route("/api/whitelist", post(add_to_whitelist))
            .route("/api/token/:mint", get(get_token))
            // Suspicious activity
            .route("/api/suspicious", get(get_suspicious))
            .route("/api/suspicious/alerts", get(get_suspicious_alerts))
            // Phishing
            .route("/api/phishing", get(get_phishing))
            .route("/api/phishing/alerts", get(get_phishing_alerts))
            // Alerts
            .route("/api/alerts", get(get_alerts))
            .route("/api/alerts/history", get(get_alert_history))
            // Settings
            .route("/api/settings", get(get_settings).post(set_setting))
            // Prometheus metrics
            .route("/metrics", get(get_metrics))
            // Health checks
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            // WebSocket
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Start the dashboard server
    pub async fn start(&self) -> anyhow::Result<()> {
        let app = self.router();

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.dashboard_port));
        info!(target: "DASHBOARD", "✅ Dashboard running at http://localhost:{}", self.config.dashboard_port);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

// ============================================
// HANDLERS
// ============================================

fn state_unavailable(e: StateError) -> Response {
    error!(target: "DASHBOARD", "{}", e);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({"error": e.to_string()})),
    )
        .into_response()
}

async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(state.stats())
}

async fn get_transactions(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<TransactionRow>> {
    let limit = params.limit.unwrap_or(50) as i64;
    match state.pipeline.database().recent_transactions(limit, params.flagged) {
        Ok(rows) => Json(rows),
        Err(e) => {
            warn!(target: "DASHBOARD", "Transaction query failed: {:#}", e);
            Json(vec![])
        }
    }
}

// Honeypot handlers
async fn get_honeypots(State(state): State<AppState>) -> Response {
    let honeypot = state.pipeline.honeypot();
    let result = honeypot
        .known_honeypots()
        .and_then(|known| Ok((known, honeypot.whitelisted()?)));
    match result {
        Ok((known, whitelisted)) => Json(HoneypotsResponse { known, whitelisted }).into_response(),
        Err(e) => state_unavailable(e),
    }
}

async fn get_honeypot(State(state): State<AppState>, Path(mint): Path<String>) -> Response {
    match state.pipeline.honeypot().is_honeypot(&mint) {
        Ok(honeypot) => Json(serde_json::json!({"mint": mint, "honeypot": honeypot})).into_response(),
        Err(e) => state_unavailable(e),
    }
}

async fn get_token(State(state): State<AppState>, Path(mint): Path<String>) -> Response {
    match state.pipeline.token_info(&mint).await {
        Ok(info) => Json(info).into_response(),
        Err(e) => state_unavailable(e),
    }
}

async fn add_to_whitelist(
    State(state): State<AppState>,
    Json(req): Json<AddressRequest>,
) -> Response {
    match state.pipeline.whitelist(&req.address) {
        Ok(true) => ApiResponse::ok(format!("{} whitelisted and removed from honeypots", req.address)).into_response(),
        Ok(false) => ApiResponse::ok(format!("{} whitelisted", req.address)).into_response(),
        Err(e) => state_unavailable(e),
    }
}

// Suspicious activity handlers
async fn get_suspicious(State(state): State<AppState>) -> Response {
    let suspicious = state.pipeline.suspicious();
    match suspicious.suspicious_addresses() {
        Ok(addresses) => Json(SuspiciousResponse {
            addresses,
            unsellable_mints: suspicious.unsellable_mints(),
            wallet_groups: suspicious.wallet_groups(),
        })
        .into_response(),
        Err(e) => state_unavailable(e),
    }
}

async fn get_suspicious_alerts(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    match state.pipeline.suspicious().recent_alerts(params.limit.unwrap_or(20)) {
        Ok(alerts) => Json::<Vec<SuspiciousAlert>>(alerts).into_response(),
        Err(e) => state_unavailable(e),
    }
}

// Phishing handlers
async fn get_phishing(State(state): State<AppState>) -> Response {
    let phishing = state.pipeline.phishing();
    match phishing.phishing_addresses() {
        Ok(addresses) => Json(PhishingResponse {
            addresses,
            domains: phishing.tracked_domains(),
        })
        .into_response(),
        Err(e) => state_unavailable(e),
    }
}

async fn get_phishing_alerts(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    match state.pipeline.phishing().recent_alerts(params.limit.unwrap_or(50)) {
        Ok(alerts) => Json::<Vec<PhishingAlert>>(alerts).into_response(),
        Err(e) => state_unavailable(e),
    }
}

// Alerts handlers
async fn get_alerts(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<AlertRecord>> {
    let limit = params.limit.unwrap_or(50);
    Json(state.pipeline.alerts().get_recent_alerts(limit))
}

async fn get_alert_history(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<StoredAlert>> {
    let limit = params.limit.unwrap_or(50) as i64;
    match state.pipeline.database().get_recent_alerts(limit) {
        Ok(alerts) => Json(alerts),
        Err(_) => Json(vec![]),
    }
}

// Settings handlers
async fn get_settings(State(state): State<AppState>) -> Response {
    match state.pipeline.settings().snapshot() {
        Ok(settings) => Json::<ClassifierSettings>(settings).into_response(),
        Err(e) => state_unavailable(e),
    }
}

async fn set_setting(
    State(state): State<AppState>,
    Json(req): Json<SettingRequest>,
) -> Response {
    match state.pipeline.apply_setting(&req.key, req.value) {
        Ok(()) => ApiResponse::ok(format!("{} set to {}", req.key, req.value)).into_response(),
        Err(SettingsError::State(e)) => state_unavailable(e),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse {
                success: false,
                message: e.to_string(),
            }),
        )
            .into_response(),
    }
}

// Metrics handler
async fn get_metrics(State(state): State<AppState>) -> Response {
    match state.pipeline.metrics().get_metrics() {
        Ok(metrics) => (
            [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            metrics,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// Health check handlers
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime: state.start_time.elapsed().as_secs_f64(),
        monitor_running: state.monitor.get_stats().is_running,
    })
}

async fn readiness_check(State(state): State<AppState>) -> Response {
    if state.monitor.get_stats().is_running {
        Json(serde_json::json!({"ready": true})).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({"ready": false}))).into_response()
    }
}

// WebSocket handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    info!(target: "DASHBOARD", "WebSocket client connected");

    let init_msg = WsMessage::Init {
        stats: state.stats(),
        recent_alerts: state.pipeline.alerts().get_recent_alerts(20),
    };

    if let Ok(json) = serde_json::to_string(&init_msg) {
        let _ = sender.send(Message::Text(json)).await;
    }

    let mut alert_rx = state.pipeline.alerts().subscribe();

    let send_task = tokio::spawn(async move {
        while let Ok(alert) = alert_rx.recv().await {
            let msg = WsMessage::Alert(alert);
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(target: "DASHBOARD", "WebSocket client disconnected");
}
