use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CourierStatus {
    #[default]
    Idle,
    Assigned,
    Picking,
    Delivering,
    OffDuty,
}

impl CourierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourierStatus::Idle => "idle",
            CourierStatus::Assigned => "assigned",
            CourierStatus::Picking => "picking",
            CourierStatus::Delivering => "delivering",
            CourierStatus::OffDuty => "off-duty",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    #[default]
    Bike,
    Car,
    Scooter,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Courier {
    pub id: Uuid,
    /// Linked user account; a courier without one answers on its own id.
    pub user_id: Option<Uuid>,
    pub name: String,
    pub phone: Option<String>,
    pub vehicle_type: VehicleType,
    /// Eligible for new assignments.
    pub available: bool,
    pub status: CourierStatus,
    /// The order this courier accepted and has not finished yet.
    pub active_order: Option<Uuid>,
    pub location: GeoPoint,
    pub rating: f64,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    pub fn new(user_id: Option<Uuid>, name: impl Into<String>, location: GeoPoint) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            phone: None,
            vehicle_type: VehicleType::default(),
            available: true,
            status: CourierStatus::Idle,
            active_order: None,
            location,
            rating: 0.0,
            last_seen_at: None,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Identity the courier's live connections subscribe under.
    pub fn channel_id(&self) -> Uuid {
        self.user_id.unwrap_or(self.id)
    }

    pub fn is_operated_by(&self, user_id: Uuid) -> bool {
        self.channel_id() == user_id
    }
}
