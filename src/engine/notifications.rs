use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::notification::{Notification, NotificationKind};
use crate::models::order::Order;
use crate::state::AppState;
use crate::store::{NotificationScope, NotificationStore};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

/// `all` or a single notification id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTarget {
    All,
    One(Uuid),
}

impl std::str::FromStr for ReadTarget {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw == "all" {
            return Ok(ReadTarget::All);
        }
        Uuid::parse_str(raw)
            .map(ReadTarget::One)
            .map_err(|_| AppError::BadRequest(format!("invalid notification id {raw}")))
    }
}

fn scope_for(actor: &Actor) -> NotificationScope {
    NotificationScope {
        user_id: actor.id,
        include_admin_feed: actor.is_admin(),
    }
}

/// Stores an admin-feed entry about `order`. Failures are logged only; the
/// order change has already been committed.
pub(crate) async fn notify_admins(
    state: &AppState,
    kind: NotificationKind,
    actor_id: Uuid,
    order: &Order,
) {
    let notification = Notification::new(kind, Some(actor_id), json!({ "order": order }), true);
    match state.notifications.insert(notification).await {
        Ok(stored) => debug!(notification_id = %stored.id, order_id = %order.id, "notification stored"),
        Err(err) => warn!(order_id = %order.id, error = %err, "failed to store notification"),
    }
}

pub async fn list_notifications(
    state: &AppState,
    actor: &Actor,
    query: &NotificationQuery,
) -> Result<Vec<Notification>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let skip = query.page.unwrap_or(1).saturating_sub(1) * limit;
    Ok(state.notifications.list(scope_for(actor), limit, skip).await?)
}

/// Marks one notification, or the caller's whole feed, as read. Returns how
/// many entries changed state.
pub async fn mark_read(state: &AppState, actor: &Actor, target: ReadTarget) -> Result<usize, AppError> {
    let scope = scope_for(actor);
    match target {
        ReadTarget::All => Ok(state.notifications.mark_all_read(scope).await?),
        ReadTarget::One(id) => {
            let notification = state
                .notifications
                .find_by_id(id)
                .await?
                .filter(|notification| scope.matches(notification))
                .ok_or_else(|| AppError::NotFound(format!("notification {id}")))?;
            if notification.read {
                return Ok(0);
            }
            state.notifications.mark_read(id).await?;
            Ok(1)
        }
    }
}
