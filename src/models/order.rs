use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::{Courier, GeoPoint, VehicleType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStatus {
    Pending,
    Assigned,
    Accepted,
    Preparing,
    ReadyForPickup,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 8] = [
        OrderStatus::Pending,
        OrderStatus::Assigned,
        OrderStatus::Accepted,
        OrderStatus::Preparing,
        OrderStatus::ReadyForPickup,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Assigned => "assigned",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Preparing => "preparing",
            OrderStatus::ReadyForPickup => "ready-for-pickup",
            OrderStatus::OutForDelivery => "out-for-delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Statuses that commit the kitchen or a courier to the delivery.
    pub fn is_delivery_stage(&self) -> bool {
        matches!(
            self,
            OrderStatus::Preparing
                | OrderStatus::ReadyForPickup
                | OrderStatus::OutForDelivery
                | OrderStatus::Delivered
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    #[default]
    Cod,
    Upi,
    Card,
    Gateway,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which confirmation path settled the payment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSource {
    ClientVerify,
    Webhook,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PaymentInfo {
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub signature: Option<String>,
    pub confirmed_by: Option<PaymentSource>,
    pub paid_at: Option<DateTime<Utc>>,
    pub webhook_confirmed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CancelledBy {
    User,
    Admin,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub dish_id: Uuid,
    pub name: String,
    pub quantity: u32,
    pub unit_price: f64,
    /// Where the dish is picked up, as known at checkout.
    pub pickup: Option<GeoPoint>,
}

impl OrderItem {
    pub fn subtotal(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourierSnapshot {
    pub id: Option<Uuid>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub vehicle_type: Option<VehicleType>,
    pub rating: Option<f64>,
}

impl From<&Courier> for CourierSnapshot {
    fn from(courier: &Courier) -> Self {
        Self {
            id: Some(courier.id),
            name: Some(courier.name.clone()),
            phone: courier.phone.clone(),
            vehicle_type: Some(courier.vehicle_type),
            rating: Some(courier.rating),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingEntry {
    pub status: OrderStatus,
    pub location: Option<GeoPoint>,
    pub timestamp: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub items: Vec<OrderItem>,
    pub total_price: f64,
    pub address: String,
    pub city: String,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_info: Option<PaymentInfo>,
    pub courier: Option<CourierSnapshot>,
    pub courier_ref: Option<Uuid>,
    pub delivery_assigned: bool,
    pub delivery_tracking: Vec<TrackingEntry>,
    pub current_location: Option<GeoPoint>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<CancelledBy>,
    pub cancellation_reason: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        customer_id: Uuid,
        items: Vec<OrderItem>,
        address: String,
        city: String,
        payment_method: PaymentMethod,
    ) -> Self {
        let total_price = items.iter().map(OrderItem::subtotal).sum();
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            customer_id,
            items,
            total_price,
            address,
            city,
            status: OrderStatus::Pending,
            payment_method,
            payment_status: PaymentStatus::Pending,
            payment_info: None,
            courier: None,
            courier_ref: None,
            delivery_assigned: false,
            delivery_tracking: Vec::new(),
            current_location: None,
            delivered_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Pickup point of the first item, used for courier proximity.
    pub fn pickup_location(&self) -> Option<GeoPoint> {
        self.items.first().and_then(|item| item.pickup)
    }

    pub fn payment_info_mut(&mut self) -> &mut PaymentInfo {
        self.payment_info.get_or_insert_with(PaymentInfo::default)
    }

    /// Moves the order to `status` and records it in the tracking log.
    pub fn record_status(
        &mut self,
        status: OrderStatus,
        location: Option<GeoPoint>,
        note: Option<String>,
    ) {
        let now = Utc::now();
        self.status = status;
        self.delivery_tracking.push(TrackingEntry {
            status,
            location,
            timestamp: now,
            note,
        });

        if status == OrderStatus::Delivered && self.delivered_at.is_none() {
            self.delivered_at = Some(now);
        }
    }

    /// Sets the cancellation fields; they are written once.
    pub fn mark_cancelled(&mut self, by: CancelledBy, reason: Option<String>) {
        if self.cancelled_at.is_none() {
            self.cancelled_at = Some(Utc::now());
            self.cancelled_by = Some(by);
            self.cancellation_reason =
                Some(reason.unwrap_or_else(|| "No reason provided".to_string()));
        }
        if self.status != OrderStatus::Cancelled {
            self.record_status(OrderStatus::Cancelled, self.current_location, None);
        }
    }

    pub fn clear_courier(&mut self) {
        self.courier = None;
        self.courier_ref = None;
        self.delivery_assigned = false;
    }
}
