use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch};
use axum::Json;
use axum::Router;
use serde::Serialize;

use crate::engine::notifications::{self, NotificationQuery, ReadTarget};
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::notification::Notification;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/notifications", get(list))
        .route("/notifications/:id/read", patch(mark_read))
}

#[derive(Serialize)]
struct NotificationList {
    notifications: Vec<Notification>,
}

#[derive(Serialize)]
struct MarkReadResponse {
    ok: bool,
    updated: usize,
}

async fn list(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<NotificationList>, AppError> {
    let notifications = notifications::list_notifications(&state, &actor, &query).await?;
    Ok(Json(NotificationList { notifications }))
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<MarkReadResponse>, AppError> {
    let target: ReadTarget = id.parse()?;
    let updated = notifications::mark_read(&state, &actor, target).await?;
    Ok(Json(MarkReadResponse { ok: true, updated }))
}
