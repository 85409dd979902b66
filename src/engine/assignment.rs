use std::time::Instant;

use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::commands::{
    ensure_unassigned, AcceptJobCommand, AssignCourierCommand, Outcome, RejectJobCommand,
};
use crate::engine::lifecycle::{
    cancel_for_failed_payment, next_status, payment_clearance, LifecycleEvent, PaymentViolation,
};
use crate::engine::{
    count_transition, ensure_courier_operator, load_courier, load_order, modify_courier,
    modify_order, publish_order,
};
use crate::error::AppError;
use crate::fanout::{
    JOB_ACCEPTED, JOB_ASSIGNED, ORDER_ACCEPTED, ORDER_ASSIGNED, ORDER_CANCELLED,
    ORDER_STATUS_CHANGED, ORDER_UNASSIGNED,
};
use crate::models::actor::Actor;
use crate::models::courier::{Courier, CourierStatus};
use crate::models::order::{CourierSnapshot, Order, OrderStatus};
use crate::state::AppState;
use crate::store::{CourierFilter, CourierStore};

/// Attaches the nearest available courier to the order. The courier stays
/// available until it accepts, so two orders may briefly share one courier;
/// `accept_job` lets only one of them through.
pub async fn assign_nearest(
    state: &AppState,
    actor: &Actor,
    order_id: Uuid,
    max_distance_m: Option<f64>,
) -> Result<Order, AppError> {
    if !actor.is_admin() {
        return Err(AppError::AccessDenied("only admins can dispatch couriers".to_string()));
    }

    let start = Instant::now();
    let result = assign(state, order_id, max_distance_m).await;
    let elapsed = start.elapsed().as_secs_f64();

    let outcome = match &result {
        Ok(_) => "success",
        Err(AppError::NoCourierAvailable) => "no_courier",
        Err(_) => "error",
    };
    state
        .metrics
        .assignment_latency_seconds
        .with_label_values(&[outcome])
        .observe(elapsed);
    state
        .metrics
        .assignments_total
        .with_label_values(&[outcome])
        .inc();

    if let Err(err) = &result {
        warn!(order_id = %order_id, error = %err, "courier assignment failed");
    }
    result
}

async fn assign(
    state: &AppState,
    order_id: Uuid,
    max_distance_m: Option<f64>,
) -> Result<Order, AppError> {
    let order = load_order(state, order_id).await?;

    match payment_clearance(&order) {
        Ok(()) => {}
        Err(PaymentViolation::Failed) => return fail_closed(state, order_id).await,
        Err(violation) => return Err(violation.into()),
    }
    ensure_unassigned(&order)?;
    next_status(order.status, LifecycleEvent::CourierAssigned)?;

    let pickup = order
        .pickup_location()
        .ok_or_else(|| AppError::BadRequest("order has no pickup location".to_string()))?;
    let radius = max_distance_m.unwrap_or(state.config.assign_radius_m);
    if !radius.is_finite() || radius <= 0.0 {
        return Err(AppError::BadRequest("max distance must be positive".to_string()));
    }

    let filter = CourierFilter {
        available_only: true,
    };
    let (courier, distance_m) = state
        .couriers
        .geo_near(pickup, radius, filter, 1)
        .await?
        .into_iter()
        .next()
        .ok_or(AppError::NoCourierAvailable)?;

    let command = AssignCourierCommand {
        courier_id: courier.id,
        snapshot: CourierSnapshot::from(&courier),
    };
    let modified = modify_order(state, order_id, |order| command.apply(order)).await?;
    let order = modified.doc;

    if let Outcome::Refused(err) = modified.output {
        if modified.written {
            count_transition(state, order.status);
            publish_order(state, &order, ORDER_CANCELLED);
        }
        return Err(err);
    }

    info!(
        order_id = %order.id,
        courier_id = %courier.id,
        distance_m,
        "courier assigned"
    );
    count_transition(state, order.status);
    notify_assignment(state, &order, &courier);

    Ok(order)
}

async fn fail_closed(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    let modified = modify_order(state, order_id, |order| Ok(cancel_for_failed_payment(order))).await?;
    if modified.written {
        count_transition(state, modified.doc.status);
        publish_order(state, &modified.doc, ORDER_CANCELLED);
    }
    Err(AppError::PaymentFailed)
}

fn notify_assignment(state: &AppState, order: &Order, courier: &Courier) {
    let payload = json!({ "order": order, "courier_id": courier.id });
    state
        .bus
        .broadcast_to_user(order.customer_id, ORDER_ASSIGNED, payload.clone());
    state
        .bus
        .broadcast_to_user(courier.channel_id(), JOB_ASSIGNED, payload.clone());
    state.bus.broadcast_to_admins(ORDER_STATUS_CHANGED, payload);
}

/// Courier takes the job. The courier document is claimed first, so a
/// courier double-assigned by racing dispatches ends up on one order only.
pub async fn accept_job(
    state: &AppState,
    actor: &Actor,
    courier_id: Uuid,
    order_id: Uuid,
) -> Result<Order, AppError> {
    let courier = load_courier(state, courier_id).await?;
    ensure_courier_operator(actor, &courier)?;

    let order = load_order(state, order_id).await?;
    if order.courier_ref != Some(courier_id) {
        return Err(AppError::InvalidStatus(
            "order is not assigned to this courier".to_string(),
        ));
    }
    if order.status == OrderStatus::Accepted && courier.active_order == Some(order_id) {
        return Ok(order);
    }
    next_status(order.status, LifecycleEvent::CourierAccepted)?;

    let claim = modify_courier(state, courier_id, |courier| match courier.active_order {
        Some(active) if active == order_id => Ok(()),
        Some(active) => Err(AppError::InvalidStatus(format!(
            "courier is already delivering order {active}"
        ))),
        None if !courier.available => {
            Err(AppError::InvalidStatus("courier is not available".to_string()))
        }
        None => {
            courier.available = false;
            courier.status = CourierStatus::Delivering;
            courier.active_order = Some(order_id);
            Ok(())
        }
    })
    .await?;

    let command = AcceptJobCommand {
        courier_id,
        snapshot: CourierSnapshot::from(&claim.doc),
    };
    let modified = match modify_order(state, order_id, |order| command.apply(order)).await {
        Ok(modified) => modified,
        Err(err) => {
            if claim.written {
                release_courier(state, courier_id, order_id).await;
            }
            return Err(err);
        }
    };
    let order = modified.doc;

    if modified.written {
        info!(order_id = %order_id, courier_id = %courier_id, "courier accepted job");
        count_transition(state, order.status);

        let payload = json!({ "order": &order, "courier_id": courier_id });
        state
            .bus
            .broadcast_to_user(order.customer_id, ORDER_ACCEPTED, payload.clone());
        state
            .bus
            .broadcast_to_user(claim.doc.channel_id(), JOB_ACCEPTED, payload.clone());
        state.bus.broadcast_to_admins(ORDER_STATUS_CHANGED, payload);
    }

    Ok(order)
}

/// Courier declines; the order goes back to the pool without re-dispatch.
pub async fn reject_job(
    state: &AppState,
    actor: &Actor,
    courier_id: Uuid,
    order_id: Uuid,
) -> Result<Order, AppError> {
    let courier = load_courier(state, courier_id).await?;
    ensure_courier_operator(actor, &courier)?;

    let command = RejectJobCommand { courier_id };
    let modified = modify_order(state, order_id, |order| command.apply(order)).await?;
    let order = modified.doc;

    release_courier(state, courier_id, order_id).await;

    info!(order_id = %order_id, courier_id = %courier_id, "courier rejected job");
    count_transition(state, order.status);

    let payload = json!({ "order": &order, "courier_id": courier_id });
    state
        .bus
        .broadcast_to_user(order.customer_id, ORDER_UNASSIGNED, payload.clone());
    state.bus.broadcast_to_admins(ORDER_STATUS_CHANGED, payload);

    Ok(order)
}

/// Frees the courier if `order_id` is the job it holds.
pub(crate) async fn release_courier(state: &AppState, courier_id: Uuid, order_id: Uuid) {
    let result = modify_courier(state, courier_id, |courier| {
        if courier.active_order == Some(order_id) {
            courier.active_order = None;
            courier.available = true;
            courier.status = CourierStatus::Idle;
        }
        Ok(())
    })
    .await;

    match result {
        Ok(modified) if modified.written => {
            info!(courier_id = %courier_id, order_id = %order_id, "courier released");
        }
        Ok(_) => {}
        Err(err) => {
            error!(courier_id = %courier_id, order_id = %order_id, error = %err, "failed to release courier");
        }
    }
}
