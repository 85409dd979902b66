use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post, put};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::registry::{CourierProfile, LocationUpdate, NearbyCourier};
use crate::engine::{assignment, registry};
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::courier::{Courier, GeoPoint};
use crate::models::order::Order;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers/me", put(upsert_profile).get(my_profile))
        .route("/couriers/nearby", get(nearby))
        .route("/couriers/:id", get(get_courier))
        .route("/couriers/:id/location", patch(update_location))
        .route("/couriers/:id/jobs/:order_id/accept", post(accept_job))
        .route("/couriers/:id/jobs/:order_id/reject", post(reject_job))
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_m: Option<f64>,
}

async fn upsert_profile(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<CourierProfile>,
) -> Result<Json<Courier>, AppError> {
    Ok(Json(registry::upsert_courier(&state, &actor, payload).await?))
}

async fn my_profile(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<Courier>, AppError> {
    Ok(Json(registry::courier_for_user(&state, &actor).await?))
}

async fn nearby(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<NearbyCourier>>, AppError> {
    let point = GeoPoint {
        lat: query.lat,
        lng: query.lng,
    };
    Ok(Json(registry::find_nearby(&state, point, query.radius_m).await?))
}

async fn get_courier(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Courier>, AppError> {
    Ok(Json(registry::get_courier(&state, id).await?))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<LocationUpdate>,
) -> Result<Json<Courier>, AppError> {
    Ok(Json(registry::update_location(&state, &actor, id, payload).await?))
}

async fn accept_job(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path((courier_id, order_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(
        assignment::accept_job(&state, &actor, courier_id, order_id).await?,
    ))
}

async fn reject_job(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path((courier_id, order_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(
        assignment::reject_job(&state, &actor, courier_id, order_id).await?,
    ))
}
