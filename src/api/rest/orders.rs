use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::{assignment, invoice, orders};
use crate::engine::orders::{NewOrder, OrderQuery, TrackingUpdate};
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::invoice::Invoice;
use crate::models::order::{Order, OrderStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", patch(update_status))
        .route("/orders/:id/tracking", patch(update_tracking))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/assign", post(assign_courier))
        .route("/orders/:id/invoice", get(get_invoice))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Deserialize, Default)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct AssignRequest {
    pub max_distance_m: Option<f64>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<NewOrder>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let order = orders::create_order(&state, &actor, payload).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<OrderQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(orders::list_orders(&state, &actor, &query).await?))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(orders::get_order(&state, &actor, id).await?))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(orders::transition(&state, &actor, id, payload.status).await?))
}

async fn update_tracking(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<TrackingUpdate>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(orders::update_tracking(&state, &actor, id, payload).await?))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    payload: Option<Json<CancelRequest>>,
) -> Result<Json<Order>, AppError> {
    let Json(payload) = payload.unwrap_or_default();
    Ok(Json(orders::cancel(&state, &actor, id, payload.reason).await?))
}

async fn assign_courier(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    payload: Option<Json<AssignRequest>>,
) -> Result<Json<Order>, AppError> {
    let Json(payload) = payload.unwrap_or_default();
    Ok(Json(
        assignment::assign_nearest(&state, &actor, id, payload.max_distance_m).await?,
    ))
}

async fn get_invoice(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Invoice>, AppError> {
    Ok(Json(invoice::get_invoice_for_order(&state, &actor, id).await?))
}
