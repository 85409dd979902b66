//! Payment gate: checkout intents, client-side verification and the
//! gateway webhook. Either confirmation path alone marks an order paid;
//! both are safe to apply in any order or more than once.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::GatewayCredentials;
use crate::engine::assignment::release_courier;
use crate::engine::commands::{
    ensure_payable, AttachIntentCommand, ConfirmPaymentCommand, FailPaymentCommand,
    PaymentOutcome,
};
use crate::engine::invoice::ensure_invoice;
use crate::engine::{count_transition, load_order, modify_order, publish_order};
use crate::error::AppError;
use crate::fanout::{ORDER_CANCELLED, ORDER_UPDATED};
use crate::gateway::{self, GatewayOrderRequest, PaymentGateway};
use crate::models::actor::Actor;
use crate::models::order::{Order, PaymentSource};
use crate::state::AppState;
use crate::store::OrderStore;

const CAPTURED_EVENT: &str = "payment.captured";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentIntent {
    pub order_id: Uuid,
    pub gateway_order_id: String,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    pub key_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyPayment {
    pub order_id: Uuid,
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    AlreadyApplied,
    /// Captured for an order that was already cancelled.
    RefundRequired,
    Ignored,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    #[serde(default)]
    payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
    payment: Option<WebhookPayment>,
}

#[derive(Debug, Deserialize)]
struct WebhookPayment {
    entity: PaymentEntity,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    notes: Value,
}

fn credentials(state: &AppState) -> Result<&GatewayCredentials, AppError> {
    state.config.gateway.as_ref().ok_or_else(|| {
        AppError::Configuration("payment gateway credentials are not configured".to_string())
    })
}

fn ensure_payer(actor: &Actor, order: &Order) -> Result<(), AppError> {
    if actor.is_admin() || order.customer_id == actor.id {
        return Ok(());
    }
    Err(AppError::AccessDenied(format!("order {} is not yours", order.id)))
}

fn count_payment(state: &AppState, source: &str, outcome: &str) {
    state
        .metrics
        .payment_events_total
        .with_label_values(&[source, outcome])
        .inc();
}

/// Opens a gateway order for the order's total and records its id.
pub async fn create_payment_intent(
    state: &AppState,
    actor: &Actor,
    order_id: Uuid,
) -> Result<PaymentIntent, AppError> {
    let credentials = credentials(state)?;
    let gateway: &dyn PaymentGateway = state.gateway.as_deref().ok_or_else(|| {
        AppError::Configuration("payment gateway client is not configured".to_string())
    })?;

    let order = load_order(state, order_id).await?;
    ensure_payer(actor, &order)?;
    ensure_payable(&order)?;

    let amount = gateway::to_minor_units(order.total_price);
    if amount <= 0 {
        return Err(AppError::BadRequest("order total must be positive".to_string()));
    }

    let request = GatewayOrderRequest {
        amount,
        currency: state.config.gateway_currency.clone(),
        receipt: order.id.to_string(),
        payment_capture: 1,
    };
    let created = match timeout(state.config.gateway_timeout, gateway.create_order(request)).await {
        Ok(Ok(created)) => created,
        Ok(Err(err)) => {
            warn!(order_id = %order_id, error = %err, "gateway rejected payment intent");
            count_payment(state, "intent", "error");
            return Err(AppError::Gateway(err.to_string()));
        }
        Err(_) => {
            warn!(order_id = %order_id, timeout_ms = state.config.gateway_timeout.as_millis() as u64, "gateway timed out");
            count_payment(state, "intent", "timeout");
            return Err(AppError::GatewayTimeout);
        }
    };

    let command = AttachIntentCommand {
        gateway_order_id: created.id.clone(),
    };
    let modified = modify_order(state, order_id, |order| command.apply(order)).await?;
    if modified.written {
        publish_order(state, &modified.doc, ORDER_UPDATED);
    }

    info!(order_id = %order_id, gateway_order_id = %created.id, amount, "payment intent created");
    count_payment(state, "intent", "created");

    Ok(PaymentIntent {
        order_id,
        gateway_order_id: created.id,
        amount: created.amount,
        currency: created.currency,
        key_id: credentials.key_id.clone(),
    })
}

/// Checks the checkout callback signature. A mismatch fails the payment
/// for good: the order is cancelled and the customer has to order again.
pub async fn verify_payment(
    state: &AppState,
    actor: &Actor,
    request: VerifyPayment,
) -> Result<Order, AppError> {
    let credentials = credentials(state)?;
    let order = load_order(state, request.order_id).await?;
    ensure_payer(actor, &order)?;

    let Some(stored) = order
        .payment_info
        .as_ref()
        .and_then(|info| info.gateway_order_id.as_deref())
    else {
        count_payment(state, "client_verify", "no_intent");
        return Err(AppError::BadRequest(
            "no payment intent was created for this order".to_string(),
        ));
    };

    let message = gateway::checkout_message(&request.gateway_order_id, &request.gateway_payment_id);
    let signed = gateway::verify(&credentials.key_secret, message.as_bytes(), &request.signature);
    let same_intent = stored == request.gateway_order_id;

    if !(signed && same_intent) {
        warn!(order_id = %order.id, signed, same_intent, "payment signature mismatch");
        count_payment(state, "client_verify", "mismatch");

        let command = FailPaymentCommand {
            gateway_order_id: request.gateway_order_id,
            gateway_payment_id: request.gateway_payment_id,
            signature: request.signature,
            reason: "signature mismatch".to_string(),
        };
        let modified = modify_order(state, order.id, |order| command.apply(order)).await?;
        if modified.written {
            count_transition(state, modified.doc.status);
            publish_order(state, &modified.doc, ORDER_CANCELLED);
            if let Some(courier_id) = modified.doc.courier_ref {
                release_courier(state, courier_id, modified.doc.id).await;
            }
        }
        return Err(AppError::SignatureMismatch);
    }

    let command = ConfirmPaymentCommand {
        source: PaymentSource::ClientVerify,
        gateway_order_id: Some(request.gateway_order_id),
        gateway_payment_id: Some(request.gateway_payment_id),
        signature: Some(request.signature),
    };
    let order = confirm(state, order.id, &command).await?.0;
    Ok(order)
}

/// Applies a confirmed payment and its side effects.
async fn confirm(
    state: &AppState,
    order_id: Uuid,
    command: &ConfirmPaymentCommand,
) -> Result<(Order, PaymentOutcome), AppError> {
    let source = match command.source {
        PaymentSource::ClientVerify => "client_verify",
        PaymentSource::Webhook => "webhook",
    };

    let mut before = None;
    let modified = modify_order(state, order_id, |order| {
        before = Some(order.status);
        command.apply(order)
    })
    .await?;
    let order = modified.doc;

    match modified.output {
        PaymentOutcome::NewlyPaid => {
            info!(order_id = %order_id, source, "payment confirmed");
            count_payment(state, source, "paid");
            if before != Some(order.status) {
                count_transition(state, order.status);
            }
            publish_order(state, &order, ORDER_UPDATED);
            ensure_invoice(state, order_id).await;
        }
        PaymentOutcome::AlreadyPaid => {
            count_payment(state, source, "duplicate");
        }
        PaymentOutcome::CapturedAfterCancel => {
            count_payment(state, source, "refund_required");
            publish_order(state, &order, ORDER_UPDATED);
        }
    }

    Ok((order, modified.output))
}

/// Gateway-side confirmation. The signature covers the raw body; a bad
/// signature rejects the call without touching any order.
pub async fn handle_webhook(
    state: &AppState,
    raw_body: &[u8],
    signature: Option<&str>,
) -> Result<WebhookOutcome, AppError> {
    let credentials = credentials(state)?;

    let authentic = signature
        .is_some_and(|signature| gateway::verify(&credentials.webhook_secret, raw_body, signature));
    if !authentic {
        warn!("rejected webhook with a bad signature");
        count_payment(state, "webhook", "rejected");
        return Err(AppError::SignatureMismatch);
    }

    let event: WebhookEvent = serde_json::from_slice(raw_body)
        .map_err(|err| AppError::BadRequest(format!("invalid webhook body: {err}")))?;
    if event.event != CAPTURED_EVENT {
        info!(event = %event.event, "ignoring webhook event");
        return Ok(WebhookOutcome::Ignored);
    }

    let Some(payment) = event.payload.payment.map(|payment| payment.entity) else {
        warn!("captured webhook without a payment entity");
        return Ok(WebhookOutcome::Ignored);
    };

    let Some(order_id) = correlate(state, &payment).await? else {
        warn!(payment_id = %payment.id, "captured payment matches no order");
        count_payment(state, "webhook", "unmatched");
        return Ok(WebhookOutcome::Ignored);
    };

    let command = ConfirmPaymentCommand {
        source: PaymentSource::Webhook,
        gateway_order_id: payment.order_id.clone(),
        gateway_payment_id: Some(payment.id.clone()),
        signature: None,
    };
    let (_, outcome) = confirm(state, order_id, &command).await?;

    Ok(match outcome {
        PaymentOutcome::NewlyPaid => WebhookOutcome::Applied,
        PaymentOutcome::AlreadyPaid => WebhookOutcome::AlreadyApplied,
        PaymentOutcome::CapturedAfterCancel => WebhookOutcome::RefundRequired,
    })
}

/// Resolves by the gateway order id stored at intent time. A receipt in the
/// notes must name the same order.
async fn correlate(state: &AppState, payment: &PaymentEntity) -> Result<Option<Uuid>, AppError> {
    let Some(gateway_order_id) = payment.order_id.as_deref() else {
        return Ok(None);
    };
    let Some(order) = state.orders.find_by_gateway_order_id(gateway_order_id).await? else {
        return Ok(None);
    };

    let receipt = payment.notes.get("receipt").and_then(Value::as_str);
    if let Some(receipt) = receipt {
        if Uuid::parse_str(receipt).ok() != Some(order.id) {
            warn!(
                gateway_order_id,
                receipt,
                order_id = %order.id,
                "webhook receipt disagrees with the gateway order"
            );
            return Ok(None);
        }
    }
    Ok(Some(order.id))
}
