pub mod assignment;
pub mod commands;
pub mod invoice;
pub mod lifecycle;
pub mod notifications;
pub mod orders;
pub mod payment;
pub mod registry;

use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::actor::{Actor, Role};
use crate::models::courier::Courier;
use crate::models::order::{Order, OrderStatus};
use crate::state::AppState;
use crate::store::{self, find_with_retry, CourierStore, Modified, Repository};

pub(crate) async fn load_order(state: &AppState, id: Uuid) -> Result<Order, AppError> {
    find_with_retry(state.orders.as_ref(), id, state.config.store_read_retries)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {id}")))
}

pub(crate) async fn load_courier(state: &AppState, id: Uuid) -> Result<Courier, AppError> {
    find_with_retry(state.couriers.as_ref(), id, state.config.store_read_retries)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("courier {id}")))
}

fn note_conflict<T>(state: &AppState, kind: &str, id: Uuid, result: &Result<T, AppError>) {
    if let Err(AppError::Conflict(_)) = result {
        state.metrics.store_conflicts_total.inc();
        warn!(kind, id = %id, "gave up after repeated version conflicts");
    }
}

/// Serialized read-modify-write of one order.
pub(crate) async fn modify_order<F, R>(
    state: &AppState,
    id: Uuid,
    mutate: F,
) -> Result<Modified<Order, R>, AppError>
where
    F: FnMut(&mut Order) -> Result<R, AppError>,
{
    let result = store::modify(
        state.orders.as_ref(),
        id,
        state.config.store_conflict_retries,
        mutate,
    )
    .await;
    note_conflict(state, "order", id, &result);
    result
}

pub(crate) async fn modify_courier<F, R>(
    state: &AppState,
    id: Uuid,
    mutate: F,
) -> Result<Modified<Courier, R>, AppError>
where
    F: FnMut(&mut Courier) -> Result<R, AppError>,
{
    let result = store::modify(
        state.couriers.as_ref(),
        id,
        state.config.store_conflict_retries,
        mutate,
    )
    .await;
    note_conflict(state, "courier", id, &result);
    result
}

/// Courier profile the actor operates, if any.
pub(crate) async fn acting_courier(
    state: &AppState,
    actor: &Actor,
) -> Result<Option<Courier>, AppError> {
    if actor.role != Role::Courier {
        return Ok(None);
    }
    if let Some(courier) = state.couriers.find_by_user(actor.id).await? {
        return Ok(Some(courier));
    }
    Ok(state.couriers.find_by_id(actor.id).await?)
}

/// Admins, or the actor operating `courier`.
pub(crate) fn ensure_courier_operator(actor: &Actor, courier: &Courier) -> Result<(), AppError> {
    if actor.is_admin() || courier.is_operated_by(actor.id) || courier.id == actor.id {
        return Ok(());
    }
    Err(AppError::AccessDenied(
        "courier profile belongs to someone else".to_string(),
    ))
}

/// Admins, the owning customer, or the courier the order is assigned to.
pub(crate) async fn ensure_order_visible(
    state: &AppState,
    actor: &Actor,
    order: &Order,
) -> Result<(), AppError> {
    if actor.is_admin() || order.customer_id == actor.id {
        return Ok(());
    }
    if let Some(courier) = acting_courier(state, actor).await? {
        if order.courier_ref == Some(courier.id) {
            return Ok(());
        }
    }
    Err(AppError::AccessDenied(format!("order {} is not yours", order.id)))
}

/// Mirrors a committed order change to its owner and the admin group.
pub(crate) fn publish_order(state: &AppState, order: &Order, event: &str) {
    let payload = json!({ "order": order });
    state.bus.broadcast_to_user(order.customer_id, event, payload.clone());
    state.bus.broadcast_to_admins(event, payload);
}

pub(crate) fn count_transition(state: &AppState, status: OrderStatus) {
    state
        .metrics
        .order_transitions_total
        .with_label_values(&[status.as_str()])
        .inc();
}
