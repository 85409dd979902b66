use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::engine::{ensure_courier_operator, load_courier, modify_courier};
use crate::error::AppError;
use crate::fanout::COURIER_LOCATION;
use crate::geo;
use crate::models::actor::{Actor, Role};
use crate::models::courier::{Courier, CourierStatus, GeoPoint, VehicleType};
use crate::state::AppState;
use crate::store::{CourierFilter, CourierStore, Repository};

#[derive(Debug, Clone, Deserialize)]
pub struct CourierProfile {
    pub name: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub vehicle_type: VehicleType,
    /// Required when the profile is first created.
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationUpdate {
    pub lat: f64,
    pub lng: f64,
    pub available: Option<bool>,
    pub status: Option<CourierStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NearbyCourier {
    pub courier: Courier,
    pub distance_m: f64,
}

/// Creates or updates the caller's own courier profile.
pub async fn upsert_courier(
    state: &AppState,
    actor: &Actor,
    profile: CourierProfile,
) -> Result<Courier, AppError> {
    if actor.role != Role::Courier {
        return Err(AppError::AccessDenied("only couriers have a courier profile".to_string()));
    }

    let name = profile.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    if let Some(location) = &profile.location {
        if !geo::is_valid(location) {
            return Err(AppError::BadRequest("invalid coordinates".to_string()));
        }
    }

    if let Some(existing) = state.couriers.find_by_user(actor.id).await? {
        let modified = modify_courier(state, existing.id, |courier| {
            courier.name = name.clone();
            courier.phone = profile.phone.clone();
            courier.vehicle_type = profile.vehicle_type;
            if let Some(location) = profile.location {
                courier.location = location;
            }
            Ok(())
        })
        .await?;
        return Ok(modified.doc);
    }

    let location = profile
        .location
        .ok_or_else(|| AppError::BadRequest("location is required for a new courier".to_string()))?;
    let mut courier = Courier::new(Some(actor.id), name, location);
    courier.phone = profile.phone;
    courier.vehicle_type = profile.vehicle_type;

    let courier = state.couriers.create(courier).await?;
    info!(courier_id = %courier.id, user_id = %actor.id, "courier registered");
    Ok(courier)
}

pub async fn get_courier(state: &AppState, courier_id: Uuid) -> Result<Courier, AppError> {
    load_courier(state, courier_id).await
}

pub async fn courier_for_user(state: &AppState, actor: &Actor) -> Result<Courier, AppError> {
    state
        .couriers
        .find_by_user(actor.id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("courier profile for user {}", actor.id)))
}

/// Location ping, optionally with an availability or status override.
/// Overrides are refused while the courier holds an active job.
pub async fn update_location(
    state: &AppState,
    actor: &Actor,
    courier_id: Uuid,
    update: LocationUpdate,
) -> Result<Courier, AppError> {
    let location = GeoPoint {
        lat: update.lat,
        lng: update.lng,
    };
    if !geo::is_valid(&location) {
        return Err(AppError::BadRequest("invalid coordinates".to_string()));
    }

    let courier = load_courier(state, courier_id).await?;
    ensure_courier_operator(actor, &courier)?;

    let modified = modify_courier(state, courier_id, |courier| {
        let overrides = update.available.is_some() || update.status.is_some();
        if overrides && courier.active_order.is_some() {
            return Err(AppError::InvalidStatus(
                "courier availability is locked while a job is active".to_string(),
            ));
        }

        courier.location = location;
        courier.last_seen_at = Some(Utc::now());

        match (update.available, update.status) {
            (_, Some(CourierStatus::Assigned | CourierStatus::Picking | CourierStatus::Delivering)) => {
                return Err(AppError::BadRequest(
                    "job statuses are set by accepting a job".to_string(),
                ));
            }
            (_, Some(CourierStatus::OffDuty)) | (Some(false), _) => {
                courier.available = false;
                courier.status = CourierStatus::OffDuty;
            }
            (_, Some(CourierStatus::Idle)) | (Some(true), None) => {
                courier.available = true;
                courier.status = CourierStatus::Idle;
            }
            (None, None) => {}
        }
        Ok(())
    })
    .await?;
    let courier = modified.doc;

    let payload = json!({
        "courier_id": courier.id,
        "location": courier.location,
        "available": courier.available,
        "status": courier.status,
    });
    state
        .bus
        .broadcast_to_user(courier.channel_id(), COURIER_LOCATION, payload.clone());
    state.bus.broadcast_to_admins(COURIER_LOCATION, payload);

    Ok(courier)
}

/// Available couriers around `point`, nearest first.
pub async fn find_nearby(
    state: &AppState,
    point: GeoPoint,
    radius_m: Option<f64>,
) -> Result<Vec<NearbyCourier>, AppError> {
    if !geo::is_valid(&point) {
        return Err(AppError::BadRequest("invalid coordinates".to_string()));
    }
    let radius = radius_m.unwrap_or(state.config.nearby_radius_m);
    if !radius.is_finite() || radius <= 0.0 {
        return Err(AppError::BadRequest("radius must be positive".to_string()));
    }

    let filter = CourierFilter {
        available_only: true,
    };
    let nearby = state
        .couriers
        .geo_near(point, radius, filter, state.config.nearby_limit)
        .await?;

    Ok(nearby
        .into_iter()
        .map(|(courier, distance_m)| NearbyCourier {
            courier,
            distance_m,
        })
        .collect())
}
