use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderCreated,
    OrderCancelled,
}

/// Durable inbox entry. Unlike bus events it survives reconnects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// User who caused it and who may read it.
    pub user_id: Option<Uuid>,
    pub data: Value,
    pub read: bool,
    pub for_admins: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, user_id: Option<Uuid>, data: Value, for_admins: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            user_id,
            data,
            read: false,
            for_admins,
            created_at: now,
            updated_at: now,
        }
    }

    /// Admins see the admin feed plus their own entries; everyone else only
    /// their own.
    pub fn visible_to(&self, user_id: Uuid, is_admin: bool) -> bool {
        self.user_id == Some(user_id) || (is_admin && self.for_admins)
    }
}
