use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::engine::{ensure_order_visible, load_order};
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::invoice::{Invoice, InvoiceLine};
use crate::models::order::Order;
use crate::state::AppState;
use crate::store::InvoiceStore;

const TAX_RATE: f64 = 0.05;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn build_invoice(order: &Order) -> Invoice {
    let lines: Vec<InvoiceLine> = order
        .items
        .iter()
        .map(|item| InvoiceLine {
            name: item.name.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            total: round2(item.subtotal()),
        })
        .collect();

    let subtotal = round2(lines.iter().map(|line| line.total).sum());
    let taxes = round2(subtotal * TAX_RATE);
    let discount = 0.0;

    Invoice {
        id: Uuid::new_v4(),
        order_id: order.id,
        customer_id: order.customer_id,
        lines,
        subtotal,
        taxes,
        discount,
        total: round2(subtotal + taxes - discount),
        payment_method: order.payment_method,
        issued_at: Utc::now(),
    }
}

/// Returns the order's invoice, creating it on first call.
pub async fn create_invoice_for_order(state: &AppState, order_id: Uuid) -> Result<Invoice, AppError> {
    if let Some(existing) = state.invoices.find_by_order(order_id).await? {
        return Ok(existing);
    }

    let order = load_order(state, order_id).await?;
    let (invoice, created) = state.invoices.insert_if_absent(build_invoice(&order)).await?;
    if created {
        info!(order_id = %order_id, invoice_id = %invoice.id, total = invoice.total, "invoice issued");
    }
    Ok(invoice)
}

/// Invoice creation as a side effect; failures are logged, never surfaced.
pub(crate) async fn ensure_invoice(state: &AppState, order_id: Uuid) {
    if let Err(err) = create_invoice_for_order(state, order_id).await {
        error!(order_id = %order_id, error = %err, "failed to issue invoice");
    }
}

pub async fn get_invoice_for_order(
    state: &AppState,
    actor: &Actor,
    order_id: Uuid,
) -> Result<Invoice, AppError> {
    let order = load_order(state, order_id).await?;
    ensure_order_visible(state, actor, &order).await?;

    state
        .invoices
        .find_by_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("invoice for order {order_id}")))
}
