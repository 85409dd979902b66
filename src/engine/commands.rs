//! Typed order mutations.
//!
//! Each command carries exactly the fields its operation may change and is
//! applied inside an optimistic read-modify-write, so `apply` re-validates
//! against the freshest copy of the order and may run more than once.

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::engine::lifecycle::{
    cancel_for_failed_payment, next_status, payment_clearance, LifecycleEvent, PaymentViolation,
};
use crate::error::AppError;
use crate::models::courier::GeoPoint;
use crate::models::order::{
    CancelledBy, CourierSnapshot, Order, OrderStatus, PaymentMethod, PaymentSource, PaymentStatus,
};

/// Result of a command that may end the order instead of applying.
#[derive(Debug)]
pub enum Outcome {
    Applied,
    /// The order was cancelled for a failed payment; report this after the write.
    Refused(AppError),
}

fn enforce_payment(order: &mut Order) -> Result<Option<Outcome>, AppError> {
    match payment_clearance(order) {
        Ok(()) => Ok(None),
        Err(PaymentViolation::Failed) => {
            cancel_for_failed_payment(order);
            Ok(Some(Outcome::Refused(AppError::PaymentFailed)))
        }
        Err(violation) => Err(violation.into()),
    }
}

fn advance(
    order: &mut Order,
    target: OrderStatus,
    location: Option<GeoPoint>,
    note: Option<String>,
) -> Result<(), AppError> {
    let next = next_status(order.status, LifecycleEvent::Advance(target))?;
    order.record_status(next, location, note);
    Ok(())
}

#[derive(Debug, Clone)]
pub struct TransitionStatusCommand {
    pub target: OrderStatus,
    /// Set when a courier drives the change; the order must still be theirs.
    pub courier_id: Option<Uuid>,
}

impl TransitionStatusCommand {
    pub fn apply(&self, order: &mut Order) -> Result<Outcome, AppError> {
        if let Some(courier_id) = self.courier_id {
            if order.courier_ref != Some(courier_id) {
                return Err(AppError::AccessDenied(
                    "order is no longer assigned to this courier".to_string(),
                ));
            }
        }

        if order.status == self.target {
            return Ok(Outcome::Applied);
        }

        if self.target.is_delivery_stage() {
            if let Some(outcome) = enforce_payment(order)? {
                return Ok(outcome);
            }
        }

        advance(order, self.target, order.current_location, None)?;
        Ok(Outcome::Applied)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CourierContact {
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TrackingCommand {
    pub location: Option<GeoPoint>,
    pub courier: Option<CourierContact>,
    pub status: Option<OrderStatus>,
    pub note: Option<String>,
    pub courier_id: Option<Uuid>,
}

impl TrackingCommand {
    pub fn apply(&self, order: &mut Order) -> Result<Outcome, AppError> {
        if let Some(courier_id) = self.courier_id {
            if order.courier_ref != Some(courier_id) {
                return Err(AppError::AccessDenied(
                    "order is no longer assigned to this courier".to_string(),
                ));
            }
        }

        if let Some(outcome) = enforce_payment(order)? {
            return Ok(outcome);
        }

        if let Some(location) = self.location {
            order.current_location = Some(location);
        }

        if let Some(contact) = &self.courier {
            let snapshot = order.courier.get_or_insert(CourierSnapshot {
                id: None,
                name: None,
                phone: None,
                vehicle_type: None,
                rating: None,
            });
            if contact.name.is_some() {
                snapshot.name = contact.name.clone();
            }
            if contact.phone.is_some() {
                snapshot.phone = contact.phone.clone();
            }
            order.delivery_assigned = true;
        }

        match self.status {
            Some(OrderStatus::Cancelled) => Err(AppError::InvalidStatus(
                "tracking updates cannot cancel an order".to_string(),
            )),
            Some(target) if target != order.status => {
                advance(order, target, order.current_location, self.note.clone())?;
                Ok(Outcome::Applied)
            }
            _ => Ok(Outcome::Applied),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancelCommand {
    pub by: CancelledBy,
    pub reason: Option<String>,
}

impl CancelCommand {
    pub fn apply(&self, order: &mut Order) -> Result<(), AppError> {
        if order.status.is_terminal() {
            return Err(AppError::InvalidStatus(format!(
                "cannot cancel an order that is already {}",
                order.status
            )));
        }
        next_status(order.status, LifecycleEvent::Cancel)?;
        order.mark_cancelled(self.by, self.reason.clone());
        Ok(())
    }
}

/// An order carries at most one courier; a second one must wait for a reject.
pub fn ensure_unassigned(order: &Order) -> Result<(), AppError> {
    if order.courier_ref.is_some() {
        return Err(AppError::InvalidStatus(
            "order already has a courier".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct AssignCourierCommand {
    pub courier_id: Uuid,
    pub snapshot: CourierSnapshot,
}

impl AssignCourierCommand {
    pub fn apply(&self, order: &mut Order) -> Result<Outcome, AppError> {
        if let Some(outcome) = enforce_payment(order)? {
            return Ok(outcome);
        }
        ensure_unassigned(order)?;

        let next = next_status(order.status, LifecycleEvent::CourierAssigned)?;
        order.courier = Some(self.snapshot.clone());
        order.courier_ref = Some(self.courier_id);
        order.delivery_assigned = true;
        order.record_status(next, None, None);
        Ok(Outcome::Applied)
    }
}

#[derive(Debug, Clone)]
pub struct AcceptJobCommand {
    pub courier_id: Uuid,
    pub snapshot: CourierSnapshot,
}

impl AcceptJobCommand {
    pub fn apply(&self, order: &mut Order) -> Result<(), AppError> {
        if order.courier_ref != Some(self.courier_id) {
            return Err(AppError::InvalidStatus(
                "order is not assigned to this courier".to_string(),
            ));
        }
        if order.status == OrderStatus::Accepted {
            return Ok(());
        }

        let next = next_status(order.status, LifecycleEvent::CourierAccepted)?;
        order.courier = Some(self.snapshot.clone());
        order.delivery_assigned = true;
        order.record_status(next, None, None);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RejectJobCommand {
    pub courier_id: Uuid,
}

impl RejectJobCommand {
    pub fn apply(&self, order: &mut Order) -> Result<(), AppError> {
        if order.courier_ref != Some(self.courier_id) {
            return Err(AppError::InvalidStatus(
                "order is not assigned to this courier".to_string(),
            ));
        }

        let next = next_status(order.status, LifecycleEvent::CourierRejected)?;
        order.clear_courier();
        order.record_status(next, None, Some("courier declined".to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AttachIntentCommand {
    pub gateway_order_id: String,
}

/// Whether a new payment attempt may start for this order.
pub fn ensure_payable(order: &Order) -> Result<(), AppError> {
    if order.payment_status == PaymentStatus::Paid {
        return Err(AppError::InvalidStatus("order is already paid".to_string()));
    }
    if order.status.is_terminal() || order.status.is_delivery_stage() {
        return Err(AppError::InvalidStatus(format!(
            "cannot take payment for an order that is {}",
            order.status
        )));
    }
    Ok(())
}

impl AttachIntentCommand {
    pub fn apply(&self, order: &mut Order) -> Result<(), AppError> {
        ensure_payable(order)?;

        order.payment_status = PaymentStatus::Pending;
        order.payment_method = PaymentMethod::Gateway;
        order.payment_info_mut().gateway_order_id = Some(self.gateway_order_id.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    NewlyPaid,
    AlreadyPaid,
    /// Money was captured for an order that had already been cancelled.
    CapturedAfterCancel,
}

#[derive(Debug, Clone)]
pub struct ConfirmPaymentCommand {
    pub source: PaymentSource,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub signature: Option<String>,
}

impl ConfirmPaymentCommand {
    pub fn apply(&self, order: &mut Order) -> Result<PaymentOutcome, AppError> {
        let now = Utc::now();

        if order.payment_status == PaymentStatus::Paid {
            let info = order.payment_info_mut();
            if self.source == PaymentSource::Webhook && info.webhook_confirmed_at.is_none() {
                info.webhook_confirmed_at = Some(now);
            }
            return Ok(PaymentOutcome::AlreadyPaid);
        }

        if order.status.is_terminal() {
            if self.source == PaymentSource::ClientVerify {
                return Err(AppError::InvalidStatus(format!(
                    "order is {}; place a new order",
                    order.status
                )));
            }
            order.payment_status = PaymentStatus::Paid;
            self.record(order, now);
            if order.status == OrderStatus::Cancelled {
                warn!(order_id = %order.id, "payment captured for a cancelled order; refund required");
                return Ok(PaymentOutcome::CapturedAfterCancel);
            }
            return Ok(PaymentOutcome::NewlyPaid);
        }

        let next = next_status(order.status, LifecycleEvent::PaymentConfirmed)?;
        order.payment_status = PaymentStatus::Paid;
        order.payment_method = PaymentMethod::Gateway;
        self.record(order, now);
        if next != order.status {
            order.record_status(next, None, Some("payment confirmed".to_string()));
        }
        Ok(PaymentOutcome::NewlyPaid)
    }

    fn record(&self, order: &mut Order, now: chrono::DateTime<Utc>) {
        let info = order.payment_info_mut();
        if self.gateway_order_id.is_some() {
            info.gateway_order_id = self.gateway_order_id.clone();
        }
        if self.gateway_payment_id.is_some() {
            info.gateway_payment_id = self.gateway_payment_id.clone();
        }
        if self.signature.is_some() {
            info.signature = self.signature.clone();
        }
        info.confirmed_by = Some(self.source);
        info.paid_at = Some(now);
        if self.source == PaymentSource::Webhook {
            info.webhook_confirmed_at = Some(now);
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailPaymentCommand {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
    pub reason: String,
}

impl FailPaymentCommand {
    /// Marks the payment failed and cancels the order. Settled or finished
    /// orders are left alone.
    pub fn apply(&self, order: &mut Order) -> Result<bool, AppError> {
        if order.payment_status == PaymentStatus::Paid || order.status.is_terminal() {
            return Ok(false);
        }

        order.payment_status = PaymentStatus::Failed;
        let info = order.payment_info_mut();
        info.gateway_order_id = Some(self.gateway_order_id.clone());
        info.gateway_payment_id = Some(self.gateway_payment_id.clone());
        info.signature = Some(self.signature.clone());
        info.failure_reason = Some(self.reason.clone());
        info.failed_at = Some(Utc::now());
        cancel_for_failed_payment(order);
        Ok(true)
    }
}
