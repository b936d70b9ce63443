//! HTTP API
//!
//! - POST /attest - Verify a transfer claim and return a signed attestation
//! - GET /attestations/{tx_hash} - Records issued for a transaction
//! - GET /fulfillment/{chain_id}/{message_id} - Live `isFulfilled` lookup
//! - GET /health - Full status (JSON)
//! - GET /healthz - Liveness probe
//! - GET /readyz - Readiness probe
//! - GET /metrics - Prometheus metrics

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use eyre::eyre;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tracing::{info, warn};

use crate::attestation::{AttestationClaim, AttestationResponse, AttestationVerifier};
use crate::db::AttestationRecord;
use crate::error::AttestationError;
use crate::hash::{bytes32_to_hex, parse_bytes32};
use crate::metrics::Metrics;
use crate::relay::SharedRelayStats;
use crate::types::parse_chain_id;

/// Combined app state
#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<AttestationVerifier>,
    pub metrics: Arc<Metrics>,
    /// `None` when the relay is not running in this process
    pub relay: Option<SharedRelayStats>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        verifier: Arc<AttestationVerifier>,
        metrics: Arc<Metrics>,
        relay: Option<SharedRelayStats>,
    ) -> Self {
        Self {
            verifier,
            metrics,
            relay,
            started_at: Instant::now(),
        }
    }
}

/// Rejection body: `{"error": <code>, "reason": <text>}`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub reason: String,
}

pub struct ApiError(AttestationError);

impl From<AttestationError> for ApiError {
    fn from(e: AttestationError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.0.code().to_string(),
            reason: self.0.to_string(),
        };
        (self.0.status(), Json(body)).into_response()
    }
}

async fn attest(
    State(state): State<AppState>,
    payload: Result<Json<AttestationClaim>, JsonRejection>,
) -> Result<Json<AttestationResponse>, ApiError> {
    let result = match payload {
        Ok(Json(claim)) => state.verifier.attest(&claim).await,
        Err(rejection) => Err(AttestationError::invalid("body", rejection.body_text())),
    };

    match result {
        Ok(response) => {
            state
                .metrics
                .attestations_total
                .with_label_values(&["Issued"])
                .inc();
            Ok(Json(response))
        }
        Err(e) => {
            state
                .metrics
                .attestations_total
                .with_label_values(&[e.code()])
                .inc();
            warn!(code = e.code(), reason = %e, "Attestation rejected");
            Err(e.into())
        }
    }
}

async fn attestations_by_tx(
    State(state): State<AppState>,
    Path(tx_hash): Path<String>,
) -> Result<Json<Vec<AttestationRecord>>, ApiError> {
    let tx_hash =
        parse_bytes32(tx_hash.trim()).map_err(|e| AttestationError::invalid("txHash", e))?;
    let records = state
        .verifier
        .replay_guard()
        .find_by_tx(&bytes32_to_hex(&tx_hash))
        .await
        .map_err(AttestationError::from)?;
    Ok(Json(records))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentStatus {
    pub chain_id: u16,
    pub message_id: String,
    pub fulfilled: bool,
}

async fn fulfillment_status(
    State(state): State<AppState>,
    Path((chain_id, message_id)): Path<(u64, String)>,
) -> Result<Json<FulfillmentStatus>, ApiError> {
    let chain = parse_chain_id(chain_id)
        .and_then(|id| state.verifier.chain(id))
        .ok_or(AttestationError::UnsupportedChain(chain_id))?;
    let message_id = parse_bytes32(message_id.trim())
        .map_err(|e| AttestationError::invalid("messageId", e))?;

    let fulfilled = chain
        .ledger
        .is_fulfilled(chain.contract, message_id)
        .await
        .map_err(AttestationError::upstream)?;

    Ok(Json(FulfillmentStatus {
        chain_id: chain.chain_id,
        message_id: bytes32_to_hex(&message_id),
        fulfilled,
    }))
}

/// Health check response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub attestation_configured: bool,
    pub attestation_signer: Option<String>,
    pub replay_guard: String,
    pub relay: Option<crate::relay::RelayStats>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let relay = match &state.relay {
        Some(stats) => Some(stats.read().await.clone()),
        None => None,
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        attestation_configured: state.verifier.is_configured(),
        attestation_signer: state.verifier.signer_address().map(|a| a.to_string()),
        replay_guard: state.verifier.replay_guard().backend().to_string(),
        relay,
    })
}

/// Liveness probe (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Ready once the relay has scanned at least one block, or immediately
/// when no relay runs in this process
async fn readiness(State(state): State<AppState>) -> (StatusCode, &'static str) {
    let ready = match &state.relay {
        Some(stats) => !stats.read().await.last_scanned_block.is_empty(),
        None => true,
    };
    if ready {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY")
    }
}

/// Prometheus metrics endpoint
async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry.gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/attest", post(attest))
        .route("/attestations/{tx_hash}", get(attestations_by_tx))
        .route("/fulfillment/{chain_id}/{message_id}", get(fulfillment_status))
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(bind_address: &str, port: u16, state: AppState) -> eyre::Result<()> {
    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .map_err(|e| eyre!("Invalid bind address {}:{}: {}", bind_address, port, e))?;
    info!("API server listening on {}", addr);
    info!("  /attest  - Transfer attestation (POST)");
    info!("  /health  - Full health status (JSON)");
    info!("  /metrics - Prometheus metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}
