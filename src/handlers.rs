use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::warn;

use crate::errors::ServiceError;
use crate::gateway::PaymentGateway;
use crate::models::{InvoiceRecord, WebhookPayload};
use crate::services::{InvoiceService, RefundService};

/// Header carrying the webhook's out-of-band signature.
const SIGNATURE_HEADER: &str = "x-signature";

#[derive(Clone)]
pub struct AppState {
    pub invoices: Arc<InvoiceService>,
    pub refunds: Arc<RefundService>,
    pub gateway: Arc<dyn PaymentGateway>,
}

/// HTTP adapter over the engine: the signature-verified webhook entry
/// point plus read-only queries. Commands (creation, refunds) come from
/// the bot layer, which calls the services directly.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/payment", post(payment_webhook))
        .route("/invoices/summary", get(invoice_summary))
        .route("/invoices/:invoice_id", get(invoice_status))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Verifies the gateway signature before trusting anything in the body;
/// a mismatched or missing signature discards the payload with no state
/// change.
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(ServiceError::InvalidSignature)?;

    if !state.gateway.verify_webhook(&payload, signature) {
        warn!("webhook signature mismatch, payload discarded");
        return Err(ServiceError::InvalidSignature);
    }

    let payload: WebhookPayload = serde_json::from_value(payload)?;
    let applied = state.invoices.process_webhook(&payload).await;

    Ok(Json(json!({ "received": true, "applied": applied })))
}

async fn invoice_status(
    State(state): State<AppState>,
    Path(invoice_id): Path<String>,
) -> Result<Json<InvoiceRecord>, ServiceError> {
    state
        .invoices
        .get_invoice_status(&invoice_id)
        .map(Json)
        .ok_or_else(|| ServiceError::NotFound(format!("invoice {invoice_id}")))
}

async fn invoice_summary(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "live_invoices": state.invoices.live_count(),
        "pending_total": state.invoices.pending_total(),
        "open_refunds": state.refunds.open_count(),
    }))
}
