//! Order lifecycle state machine.
//!
//! ```text
//! pending ──assign──► assigned ──courier accepts──► accepted ──► preparing
//!    │  ▲                │                              ▲          │
//!    │  └─courier rejects┘                              │          ▼
//!    └──────────payment confirmed / admin accept────────┘   ready-for-pickup
//!                                                                  │
//!                       cancelled ◄── any non-terminal             ▼
//!                                               delivered ◄── out-for-delivery
//! ```
//!
//! Forward progress may skip intermediate delivery stages. `delivered` and
//! `cancelled` are terminal. Every delivery-stage move, tracking update and
//! courier assignment consults [`payment_clearance`] first.

use crate::error::AppError;
use crate::models::order::{CancelledBy, Order, OrderStatus, PaymentMethod, PaymentStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    PaymentConfirmed,
    CourierAssigned,
    CourierAccepted,
    CourierRejected,
    /// Operator-driven forward move to the given status.
    Advance(OrderStatus),
    Cancel,
}

fn rank(status: OrderStatus) -> u8 {
    match status {
        OrderStatus::Pending => 0,
        OrderStatus::Assigned => 1,
        OrderStatus::Accepted => 2,
        OrderStatus::Preparing => 3,
        OrderStatus::ReadyForPickup => 4,
        OrderStatus::OutForDelivery => 5,
        OrderStatus::Delivered => 6,
        OrderStatus::Cancelled => 7,
    }
}

pub fn next_status(current: OrderStatus, event: LifecycleEvent) -> Result<OrderStatus, AppError> {
    use LifecycleEvent::*;
    use OrderStatus::*;

    let next = match (current, event) {
        (Delivered | Cancelled, _) => None,
        (Pending, PaymentConfirmed) => Some(Accepted),
        (status, PaymentConfirmed) => Some(status),
        (Pending | Accepted, CourierAssigned) => Some(Assigned),
        (Assigned, CourierAccepted) => Some(Accepted),
        (Assigned | Accepted, CourierRejected) => Some(Pending),
        (Pending, Advance(Accepted)) => Some(Accepted),
        (Assigned, Advance(_)) => None,
        (status, Advance(target))
            if target.is_delivery_stage() && rank(target) > rank(status) =>
        {
            Some(target)
        }
        (_, Cancel) => Some(Cancelled),
        _ => None,
    };

    next.ok_or_else(|| {
        AppError::InvalidStatus(match event {
            Advance(target) => format!("cannot move order from {current} to {target}"),
            other => format!("{other:?} is not allowed while the order is {current}"),
        })
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentViolation {
    /// Payment is not settled yet; carries the current payment status.
    Required(PaymentStatus),
    /// Payment failed; the order can only end cancelled.
    Failed,
}

impl From<PaymentViolation> for AppError {
    fn from(violation: PaymentViolation) -> Self {
        match violation {
            PaymentViolation::Required(payment_status) => AppError::PaymentRequired { payment_status },
            PaymentViolation::Failed => AppError::PaymentFailed,
        }
    }
}

/// Whether delivery work may happen on this order. Cash-on-delivery orders
/// are always cleared.
pub fn payment_clearance(order: &Order) -> Result<(), PaymentViolation> {
    if order.payment_method == PaymentMethod::Cod {
        return Ok(());
    }

    match order.payment_status {
        PaymentStatus::Paid => Ok(()),
        PaymentStatus::Failed => Err(PaymentViolation::Failed),
        status => Err(PaymentViolation::Required(status)),
    }
}

/// Ends an order whose payment failed. Returns whether anything changed.
pub fn cancel_for_failed_payment(order: &mut Order) -> bool {
    if order.status.is_terminal() {
        return false;
    }
    order.mark_cancelled(CancelledBy::System, Some("payment failed".to_string()));
    true
}
