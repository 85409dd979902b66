//! Process-local publish/subscribe for live connections.
//!
//! Connections register an emit callback under a subscriber identity and are
//! addressed by user, by the admin group, or all at once. Delivery is
//! fire-and-forget: a failing connection is logged and skipped, and nothing
//! is replayed to clients that connect later. The durable stores stay the
//! source of truth; this only mirrors committed changes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AdminAudience;
use crate::models::actor::Role;
use crate::observability::metrics::Metrics;

pub const ORDER_CREATED: &str = "order:created";
pub const ORDER_UPDATED: &str = "order:updated";
pub const ORDER_CANCELLED: &str = "order:cancelled";
pub const ORDER_ASSIGNED: &str = "order:assigned";
pub const ORDER_ACCEPTED: &str = "order:accepted";
pub const ORDER_UNASSIGNED: &str = "order:unassigned";
pub const ORDER_STATUS_CHANGED: &str = "order:status_changed";
pub const ORDER_DELIVERY_UPDATE: &str = "order:delivery:update";
pub const JOB_ASSIGNED: &str = "job:assigned";
pub const JOB_ACCEPTED: &str = "job:accepted";
pub const COURIER_LOCATION: &str = "courier:location";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Envelope {
    pub event: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
#[error("emit failed: {0}")]
pub struct EmitError(pub String);

/// Sends one envelope down a connection. Must not block.
pub type Emitter = Arc<dyn Fn(&Envelope) -> Result<(), EmitError> + Send + Sync>;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Subscriber {
    pub user_id: Uuid,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Audience {
    User { user_id: Uuid },
    Admins,
    Everyone { exclude: Option<Uuid> },
}

#[derive(Debug, Clone, Serialize)]
pub struct Activity {
    pub audience: Audience,
    pub envelope: Envelope,
    pub delivered: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub connection_id: String,
    pub subscriber: Subscriber,
    pub connected_at: DateTime<Utc>,
}

struct Client {
    subscriber: Subscriber,
    emitter: Emitter,
    connected_at: DateTime<Utc>,
}

pub struct FanoutBus {
    clients: DashMap<String, Client>,
    recent: Mutex<VecDeque<Activity>>,
    recent_capacity: usize,
    admin_audience: AdminAudience,
    metrics: Metrics,
}

impl FanoutBus {
    pub fn new(recent_capacity: usize, admin_audience: AdminAudience, metrics: Metrics) -> Self {
        Self {
            clients: DashMap::new(),
            recent: Mutex::new(VecDeque::with_capacity(recent_capacity.min(1024))),
            recent_capacity,
            admin_audience,
            metrics,
        }
    }

    pub fn register_client(
        &self,
        connection_id: impl Into<String>,
        subscriber: Subscriber,
        emitter: Emitter,
    ) -> String {
        let connection_id = connection_id.into();
        self.clients.insert(
            connection_id.clone(),
            Client {
                subscriber,
                emitter,
                connected_at: Utc::now(),
            },
        );
        self.metrics.connected_clients.set(self.clients.len() as i64);

        info!(
            connection_id = %connection_id,
            user_id = %subscriber.user_id,
            total_clients = self.clients.len(),
            "client registered for real-time updates"
        );
        connection_id
    }

    pub fn unregister_client(&self, connection_id: &str) {
        if self.clients.remove(connection_id).is_some() {
            self.metrics.connected_clients.set(self.clients.len() as i64);
            info!(
                connection_id = %connection_id,
                total_clients = self.clients.len(),
                "client unregistered"
            );
        }
    }

    /// Every connection of `user_id`, across devices.
    pub fn broadcast_to_user(&self, user_id: Uuid, event: &str, payload: Value) -> usize {
        self.publish(Audience::User { user_id }, event, payload)
    }

    pub fn broadcast_to_admins(&self, event: &str, payload: Value) -> usize {
        self.publish(Audience::Admins, event, payload)
    }

    pub fn broadcast(&self, event: &str, payload: Value, exclude: Option<Uuid>) -> usize {
        self.publish(Audience::Everyone { exclude }, event, payload)
    }

    /// Newest first.
    pub fn recent_activity(&self, limit: usize) -> Vec<Activity> {
        let recent = self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        recent.iter().rev().take(limit).cloned().collect()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        self.clients
            .iter()
            .map(|entry| ClientInfo {
                connection_id: entry.key().clone(),
                subscriber: entry.value().subscriber,
                connected_at: entry.value().connected_at,
            })
            .collect()
    }

    fn publish(&self, audience: Audience, event: &str, payload: Value) -> usize {
        let envelope = Envelope {
            event: event.to_string(),
            data: payload,
            timestamp: Utc::now(),
        };

        // Emit outside the map's shard locks so emitters may (un)register.
        let targets: Vec<(String, Emitter)> = self
            .clients
            .iter()
            .filter(|entry| self.reaches(&audience, &entry.value().subscriber))
            .map(|entry| (entry.key().clone(), entry.value().emitter.clone()))
            .collect();

        let mut delivered = 0;
        for (connection_id, emitter) in targets {
            match emitter(&envelope) {
                Ok(()) => {
                    delivered += 1;
                    self.metrics.fanout_emits_total.with_label_values(&["ok"]).inc();
                }
                Err(err) => {
                    self.metrics.fanout_emits_total.with_label_values(&["error"]).inc();
                    warn!(
                        connection_id = %connection_id,
                        event = %envelope.event,
                        error = %err,
                        "failed to emit to client"
                    );
                }
            }
        }

        debug!(event = %envelope.event, delivered, total_clients = self.clients.len(), "broadcast");
        self.remember(Activity {
            audience,
            envelope,
            delivered,
        });
        delivered
    }

    fn reaches(&self, audience: &Audience, subscriber: &Subscriber) -> bool {
        match audience {
            Audience::User { user_id } => subscriber.user_id == *user_id,
            Audience::Admins => match self.admin_audience {
                AdminAudience::AdminsOnly => subscriber.role == Role::Admin,
                AdminAudience::AllConnections => true,
            },
            Audience::Everyone { exclude } => *exclude != Some(subscriber.user_id),
        }
    }

    fn remember(&self, activity: Activity) {
        if self.recent_capacity == 0 {
            return;
        }
        let mut recent = self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if recent.len() >= self.recent_capacity {
            recent.pop_front();
        }
        recent.push_back(activity);
    }
}
