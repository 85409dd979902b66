use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::assignment::release_courier;
use crate::engine::commands::{
    CancelCommand, CourierContact, Outcome, TrackingCommand, TransitionStatusCommand,
};
use crate::engine::invoice::ensure_invoice;
use crate::engine::notifications::notify_admins;
use crate::engine::{
    acting_courier, count_transition, ensure_order_visible, load_order, modify_order,
    publish_order,
};
use crate::error::AppError;
use crate::fanout::{ORDER_CANCELLED, ORDER_CREATED, ORDER_DELIVERY_UPDATE, ORDER_UPDATED};
use crate::models::actor::{Actor, Role};
use crate::models::courier::GeoPoint;
use crate::models::notification::NotificationKind;
use crate::models::order::{CancelledBy, Order, OrderItem, OrderStatus, PaymentMethod};
use crate::state::AppState;
use crate::store::{DishCatalog, OrderFilter, OrderStore, Repository};

const DEFAULT_PAGE_SIZE: usize = 10;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrderItem {
    pub dish_id: Uuid,
    pub quantity: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub items: Vec<NewOrderItem>,
    pub address: String,
    pub city: String,
    #[serde(default)]
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackingUpdate {
    pub location: Option<GeoPoint>,
    pub courier_name: Option<String>,
    pub courier_phone: Option<String>,
    pub status: Option<OrderStatus>,
    pub note: Option<String>,
}

/// Customer checkout. Items are snapshotted from the catalog and payment
/// always starts out pending.
pub async fn create_order(
    state: &AppState,
    actor: &Actor,
    request: NewOrder,
) -> Result<Order, AppError> {
    if actor.role != Role::Customer {
        return Err(AppError::AccessDenied("only customers can place orders".to_string()));
    }
    if request.items.is_empty() {
        return Err(AppError::BadRequest("order must contain at least one item".to_string()));
    }
    if request.address.trim().is_empty() || request.city.trim().is_empty() {
        return Err(AppError::BadRequest("delivery address and city are required".to_string()));
    }

    let mut items = Vec::with_capacity(request.items.len());
    for line in &request.items {
        if line.quantity == 0 {
            return Err(AppError::BadRequest("quantity must be at least 1".to_string()));
        }

        let dish = state
            .catalog
            .find_dish(line.dish_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("dish {}", line.dish_id)))?;
        if !dish.available {
            return Err(AppError::BadRequest(format!("{} is not available", dish.name)));
        }

        items.push(OrderItem {
            dish_id: dish.id,
            name: dish.name,
            quantity: line.quantity,
            unit_price: dish.price,
            pickup: dish.restaurant_location,
        });
    }

    let order = Order::new(
        actor.id,
        items,
        request.address.trim().to_string(),
        request.city.trim().to_string(),
        request.payment_method,
    );
    let order = state.orders.create(order).await?;

    info!(
        order_id = %order.id,
        customer_id = %order.customer_id,
        total = order.total_price,
        payment_method = ?order.payment_method,
        "order placed"
    );
    count_transition(state, OrderStatus::Pending);
    publish_order(state, &order, ORDER_CREATED);
    notify_admins(state, NotificationKind::OrderCreated, actor.id, &order).await;

    Ok(order)
}

pub async fn get_order(state: &AppState, actor: &Actor, order_id: Uuid) -> Result<Order, AppError> {
    let order = load_order(state, order_id).await?;
    ensure_order_visible(state, actor, &order).await?;
    Ok(order)
}

/// Admins see every order, customers their own, couriers the ones assigned to them.
pub async fn list_orders(
    state: &AppState,
    actor: &Actor,
    query: &OrderQuery,
) -> Result<Vec<Order>, AppError> {
    let mut filter = OrderFilter {
        status: query.status,
        ..OrderFilter::default()
    };

    match actor.role {
        Role::Admin => {}
        Role::Customer => filter.customer_id = Some(actor.id),
        Role::Courier => match acting_courier(state, actor).await? {
            Some(courier) => filter.courier_id = Some(courier.id),
            None => return Ok(Vec::new()),
        },
    }

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let skip = query.page.unwrap_or(1).saturating_sub(1) * limit;

    Ok(state.orders.query(&filter, limit, skip).await?)
}

/// Courier id the actor may act on this order under; `None` for admins.
async fn delivery_operator(
    state: &AppState,
    actor: &Actor,
    order_id: Uuid,
) -> Result<Option<Uuid>, AppError> {
    if actor.is_admin() {
        return Ok(None);
    }

    let order = load_order(state, order_id).await?;
    match acting_courier(state, actor).await? {
        Some(courier) if order.courier_ref == Some(courier.id) => Ok(Some(courier.id)),
        _ => Err(AppError::AccessDenied(
            "only an admin or the assigned courier can update this order".to_string(),
        )),
    }
}

/// Side effects after an order write has committed.
async fn after_commit(state: &AppState, before: Option<OrderStatus>, order: &Order, event: &str) {
    if before != Some(order.status) {
        count_transition(state, order.status);
    }
    publish_order(state, order, event);

    if order.status.is_terminal() {
        if let Some(courier_id) = order.courier_ref {
            release_courier(state, courier_id, order.id).await;
        }
    }
    if order.status == OrderStatus::Delivered {
        ensure_invoice(state, order.id).await;
    }
}

pub async fn transition(
    state: &AppState,
    actor: &Actor,
    order_id: Uuid,
    target: OrderStatus,
) -> Result<Order, AppError> {
    if target == OrderStatus::Cancelled {
        return cancel(state, actor, order_id, None).await;
    }

    let courier_id = delivery_operator(state, actor, order_id).await?;
    let command = TransitionStatusCommand { target, courier_id };

    let mut before = None;
    let modified = modify_order(state, order_id, |order| {
        before = Some(order.status);
        command.apply(order)
    })
    .await?;
    let order = modified.doc;

    if let Outcome::Refused(err) = modified.output {
        warn!(order_id = %order_id, target = %target, "payment failed; order cancelled");
        if modified.written {
            after_commit(state, before, &order, ORDER_CANCELLED).await;
        }
        return Err(err);
    }

    if modified.written {
        info!(order_id = %order_id, from = ?before, to = %order.status, actor = %actor.id, "order status changed");
        after_commit(state, before, &order, ORDER_UPDATED).await;
    } else if order.status == OrderStatus::Delivered {
        ensure_invoice(state, order.id).await;
    }

    Ok(order)
}

pub async fn update_tracking(
    state: &AppState,
    actor: &Actor,
    order_id: Uuid,
    update: TrackingUpdate,
) -> Result<Order, AppError> {
    let courier_id = delivery_operator(state, actor, order_id).await?;

    let courier = (update.courier_name.is_some() || update.courier_phone.is_some()).then(|| {
        CourierContact {
            name: update.courier_name.clone(),
            phone: update.courier_phone.clone(),
        }
    });
    let command = TrackingCommand {
        location: update.location,
        courier,
        status: update.status,
        note: update.note,
        courier_id,
    };

    let mut before = None;
    let modified = modify_order(state, order_id, |order| {
        before = Some(order.status);
        command.apply(order)
    })
    .await?;
    let order = modified.doc;

    if let Outcome::Refused(err) = modified.output {
        warn!(order_id = %order_id, "payment failed; order cancelled");
        if modified.written {
            after_commit(state, before, &order, ORDER_CANCELLED).await;
        }
        return Err(err);
    }

    if modified.written {
        after_commit(state, before, &order, ORDER_DELIVERY_UPDATE).await;
    }
    Ok(order)
}

/// Cancels a live order on behalf of its owner or an admin.
pub async fn cancel(
    state: &AppState,
    actor: &Actor,
    order_id: Uuid,
    reason: Option<String>,
) -> Result<Order, AppError> {
    let order = load_order(state, order_id).await?;
    if !actor.is_admin() && order.customer_id != actor.id {
        return Err(AppError::AccessDenied(
            "only the customer or an admin can cancel this order".to_string(),
        ));
    }

    let command = CancelCommand {
        by: if actor.is_admin() {
            CancelledBy::Admin
        } else {
            CancelledBy::User
        },
        reason: reason.filter(|reason| !reason.trim().is_empty()),
    };

    let mut before = None;
    let modified = modify_order(state, order_id, |order| {
        before = Some(order.status);
        command.apply(order)
    })
    .await?;

    info!(order_id = %order_id, by = ?command.by, "order cancelled");
    after_commit(state, before, &modified.doc, ORDER_CANCELLED).await;
    notify_admins(state, NotificationKind::OrderCancelled, actor.id, &modified.doc).await;
    Ok(modified.doc)
}
