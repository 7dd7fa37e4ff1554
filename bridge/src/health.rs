//! Health check and metrics HTTP server
//!
//! Provides endpoints for Kubernetes probes and monitoring:
//! - GET /health - Liveness probe (always returns 200 if server is running)
//! - GET /ready - Readiness probe (recent successful contract read)
//! - GET /metrics - Prometheus-compatible metrics
//! - GET /stats - JSON draw and payout statistics

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::BridgeConfig;
use crate::types::BridgeStats;

/// Health server state shared across handlers
pub struct HealthState {
    /// Service start time for uptime calculation
    pub start_time: Instant,

    /// Bridge statistics
    pub stats: Arc<RwLock<BridgeStats>>,

    pub config: BridgeConfig,

    /// Last successful contract read
    pub last_chain_check: RwLock<Option<Instant>>,

    /// Whether the draw loop is running
    pub is_ready: RwLock<bool>,
}

impl HealthState {
    pub fn new(config: BridgeConfig, stats: Arc<RwLock<BridgeStats>>) -> Self {
        Self {
            start_time: Instant::now(),
            stats,
            config,
            last_chain_check: RwLock::new(None),
            is_ready: RwLock::new(false),
        }
    }

    /// Update readiness status
    pub async fn set_ready(&self, ready: bool) {
        *self.is_ready.write().await = ready;
    }

    pub async fn mark_chain_healthy(&self) {
        *self.last_chain_check.write().await = Some(Instant::now());
    }

    /// A contract read counts as recent within two draw check intervals
    fn chain_staleness_secs(&self) -> u64 {
        (self.config.draw_check_interval_secs * 2).max(60)
    }
}

/// Liveness response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

/// Readiness response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub chain_connected: bool,
    pub circuit_breaker: &'static str,
    pub last_chain_check_secs_ago: Option<u64>,
}

/// Stats response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub draws_initiated: u64,
    pub draws_confirmed: u64,
    pub draws_skipped_duplicate: u64,
    pub draws_reconciled: u64,
    pub draw_failures: u64,
    pub payouts_completed: u64,
    pub payouts_failed: u64,
    pub payouts_timed_out: u64,
    pub success_rate: f64,
    pub last_draw_time: Option<String>,
    pub last_period_key: Option<u64>,
    pub circuit_breaker: &'static str,
    pub uptime_secs: u64,
}

/// Health check handler - liveness probe
async fn health_handler(State(state): State<Arc<HealthState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Readiness check handler - readiness probe
async fn ready_handler(State(state): State<Arc<HealthState>>) -> Response {
    let is_ready = *state.is_ready.read().await;
    let last_chain = *state.last_chain_check.read().await;
    let breaker = state.stats.read().await.circuit_breaker_state;

    let chain_healthy = last_chain
        .map(|t| t.elapsed().as_secs() < state.chain_staleness_secs())
        .unwrap_or(false);

    let response = ReadyResponse {
        ready: is_ready && chain_healthy && breaker.as_str() != "open",
        chain_connected: chain_healthy,
        circuit_breaker: breaker.as_str(),
        last_chain_check_secs_ago: last_chain.map(|t| t.elapsed().as_secs()),
    };

    if response.ready {
        (StatusCode::OK, Json(response)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response)).into_response()
    }
}

/// Metrics handler - Prometheus format
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> String {
    let stats = state.stats.read().await;
    let uptime = state.start_time.elapsed().as_secs();
    let is_ready = if *state.is_ready.read().await { 1 } else { 0 };

    format!(
        r#"# HELP lottery_bridge_draws_total Draw cycles by outcome
# TYPE lottery_bridge_draws_total counter
lottery_bridge_draws_total{{outcome="initiated"}} {}
lottery_bridge_draws_total{{outcome="confirmed"}} {}
lottery_bridge_draws_total{{outcome="duplicate_skipped"}} {}
lottery_bridge_draws_total{{outcome="reconciled"}} {}
lottery_bridge_draws_total{{outcome="failed"}} {}

# HELP lottery_bridge_payouts_total Payout workflows by outcome
# TYPE lottery_bridge_payouts_total counter
lottery_bridge_payouts_total{{outcome="completed"}} {}
lottery_bridge_payouts_total{{outcome="failed"}} {}
lottery_bridge_payouts_total{{outcome="timed_out"}} {}

# HELP lottery_bridge_errors_total Failures by source
# TYPE lottery_bridge_errors_total counter
lottery_bridge_errors_total{{source="contract"}} {}
lottery_bridge_errors_total{{source="gateway"}} {}

# HELP lottery_bridge_consecutive_failures Consecutive failed draw cycles
# TYPE lottery_bridge_consecutive_failures gauge
lottery_bridge_consecutive_failures {}

# HELP lottery_bridge_circuit_breaker_state Circuit breaker state (0=closed, 1=half_open, 2=open)
# TYPE lottery_bridge_circuit_breaker_state gauge
lottery_bridge_circuit_breaker_state {}

# HELP lottery_bridge_success_rate Percentage of draw cycles without failure
# TYPE lottery_bridge_success_rate gauge
lottery_bridge_success_rate {}

# HELP lottery_bridge_uptime_seconds Service uptime in seconds
# TYPE lottery_bridge_uptime_seconds gauge
lottery_bridge_uptime_seconds {}

# HELP lottery_bridge_ready Whether the service is ready
# TYPE lottery_bridge_ready gauge
lottery_bridge_ready {}
"#,
        stats.draws_initiated,
        stats.draws_confirmed,
        stats.draws_skipped_duplicate,
        stats.draws_reconciled,
        stats.draw_failures,
        stats.payouts_completed,
        stats.payouts_failed,
        stats.payouts_timed_out,
        stats.contract_call_failures,
        stats.gateway_failures,
        stats.consecutive_failures,
        stats.circuit_breaker_state.as_metric(),
        stats.success_percent(),
        uptime,
        is_ready,
    )
}

/// Stats handler - JSON statistics
async fn stats_handler(State(state): State<Arc<HealthState>>) -> Json<StatsResponse> {
    let stats = state.stats.read().await;

    Json(StatsResponse {
        draws_initiated: stats.draws_initiated,
        draws_confirmed: stats.draws_confirmed,
        draws_skipped_duplicate: stats.draws_skipped_duplicate,
        draws_reconciled: stats.draws_reconciled,
        draw_failures: stats.draw_failures,
        payouts_completed: stats.payouts_completed,
        payouts_failed: stats.payouts_failed,
        payouts_timed_out: stats.payouts_timed_out,
        success_rate: stats.success_percent(),
        last_draw_time: stats.last_draw_time.map(|t| t.to_rfc3339()),
        last_period_key: stats.last_period_key,
        circuit_breaker: stats.circuit_breaker_state.as_str(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health server that runs alongside the draw service
pub struct HealthServer {
    state: Arc<HealthState>,
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Shared state for updates from the draw service
    pub fn state(&self) -> Arc<HealthState> {
        Arc::clone(&self.state)
    }

    /// Run the health server
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = create_router(Arc::clone(&self.state));

        info!(port = self.port, "Health server starting");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
