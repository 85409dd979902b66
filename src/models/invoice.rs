use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::PaymentMethod;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceLine {
    pub name: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invoice {
    pub id: Uuid,
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub lines: Vec<InvoiceLine>,
    pub subtotal: f64,
    pub taxes: f64,
    pub discount: f64,
    pub total: f64,
    pub payment_method: PaymentMethod,
    pub issued_at: DateTime<Utc>,
}
