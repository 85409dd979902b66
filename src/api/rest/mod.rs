pub mod auth;
pub mod couriers;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod ws;

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::AppError;
use crate::fanout::{Activity, ClientInfo};
use crate::models::actor::Actor;
use crate::models::courier::GeoPoint;
use crate::models::dish::Dish;
use crate::state::AppState;
use crate::store::{DishCatalog, InvoiceStore, Repository};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(couriers::router())
        .merge(notifications::router())
        .merge(orders::router())
        .merge(payments::router())
        .route("/dishes", post(upsert_dish))
        .route("/activity/recent", get(recent_activity))
        .route("/activity/clients", get(clients))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    couriers: usize,
    orders: usize,
    invoices: usize,
    connections: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, AppError> {
    Ok(Json(HealthResponse {
        status: "ok",
        couriers: state.couriers.count().await?,
        orders: state.orders.count().await?,
        invoices: state.invoices.count().await?,
        connections: state.bus.client_count(),
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}

fn require_admin(actor: &Actor) -> Result<(), AppError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(AppError::AccessDenied("admin only".to_string()))
    }
}

#[derive(Deserialize)]
pub struct DishRequest {
    pub id: Option<Uuid>,
    pub name: String,
    pub price: f64,
    #[serde(default = "default_available")]
    pub available: bool,
    pub restaurant_location: Option<GeoPoint>,
}

fn default_available() -> bool {
    true
}

async fn upsert_dish(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<DishRequest>,
) -> Result<Json<Dish>, AppError> {
    require_admin(&actor)?;
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    if !payload.price.is_finite() || payload.price < 0.0 {
        return Err(AppError::BadRequest("price must be >= 0".to_string()));
    }

    let dish = Dish {
        id: payload.id.unwrap_or_else(Uuid::new_v4),
        name: payload.name.trim().to_string(),
        price: payload.price,
        available: payload.available,
        restaurant_location: payload.restaurant_location,
    };
    Ok(Json(state.catalog.upsert_dish(dish).await?))
}

#[derive(Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

async fn recent_activity(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<Activity>>, AppError> {
    require_admin(&actor)?;
    Ok(Json(state.bus.recent_activity(query.limit.unwrap_or(50))))
}

async fn clients(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<Vec<ClientInfo>>, AppError> {
    require_admin(&actor)?;
    Ok(Json(state.bus.clients()))
}
