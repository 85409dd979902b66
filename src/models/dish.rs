use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

/// Catalog entry as seen by checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dish {
    pub id: Uuid,
    pub name: String,
    pub price: f64,
    pub available: bool,
    pub restaurant_location: Option<GeoPoint>,
}
