use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::payment::{self, PaymentIntent, VerifyPayment, WebhookOutcome};
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::order::Order;
use crate::state::AppState;

pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-gateway-signature";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payments/intent", post(create_intent))
        .route("/payments/verify", post(verify))
        .route("/payments/webhook", post(webhook))
}

#[derive(Deserialize)]
pub struct IntentRequest {
    pub order_id: Uuid,
}

#[derive(Serialize)]
struct WebhookResponse {
    status: WebhookOutcome,
}

async fn create_intent(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<IntentRequest>,
) -> Result<Json<PaymentIntent>, AppError> {
    Ok(Json(
        payment::create_payment_intent(&state, &actor, payload.order_id).await?,
    ))
}

async fn verify(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<VerifyPayment>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(payment::verify_payment(&state, &actor, payload).await?))
}

async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let status = payment::handle_webhook(&state, &body, signature).await?;
    Ok(Json(WebhookResponse { status }))
}
