pub mod memory;

use std::future::Future;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::courier::{Courier, GeoPoint};
use crate::models::dish::Dish;
use crate::models::invoice::Invoice;
use crate::models::notification::Notification;
use crate::models::order::{Order, OrderStatus};

const READ_BACKOFF_BASE_MS: u64 = 25;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} was modified concurrently")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),
}

/// A stored entity guarded by a version counter.
pub trait Document: Clone + PartialEq + Send + Sync + 'static {
    const KIND: &'static str;

    fn id(&self) -> Uuid;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
    fn touch(&mut self);
}

impl Document for Order {
    const KIND: &'static str = "order";

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Document for Courier {
    const KIND: &'static str = "courier";

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[async_trait]
pub trait Repository<T: Document>: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<T>, StoreError>;

    async fn create(&self, doc: T) -> Result<T, StoreError>;

    /// Writes `doc` only if the stored version still equals `expected_version`.
    /// The stored copy gets `expected_version + 1`.
    async fn replace(&self, doc: T, expected_version: u64) -> Result<T, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub customer_id: Option<Uuid>,
    pub courier_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.customer_id.is_none_or(|id| order.customer_id == id)
            && self.courier_id.is_none_or(|id| order.courier_ref == Some(id))
            && self.status.is_none_or(|status| order.status == status)
    }
}

#[async_trait]
pub trait OrderStore: Repository<Order> {
    /// Orders matching `filter`, newest first.
    async fn query(
        &self,
        filter: &OrderFilter,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<Order>, StoreError>;

    async fn find_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<Order>, StoreError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CourierFilter {
    pub available_only: bool,
}

#[async_trait]
pub trait CourierStore: Repository<Courier> {
    /// Couriers within `max_distance_m` of `point`, nearest first.
    async fn geo_near(
        &self,
        point: GeoPoint,
        max_distance_m: f64,
        filter: CourierFilter,
        limit: usize,
    ) -> Result<Vec<(Courier, f64)>, StoreError>;

    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Courier>, StoreError>;
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Invoice>, StoreError>;

    /// Stores `invoice` unless one exists for its order. Returns the stored
    /// invoice and whether this call created it.
    async fn insert_if_absent(&self, invoice: Invoice) -> Result<(Invoice, bool), StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

/// Which notifications a reader is allowed to see.
#[derive(Debug, Clone, Copy)]
pub struct NotificationScope {
    pub user_id: Uuid,
    pub include_admin_feed: bool,
}

impl NotificationScope {
    pub fn matches(&self, notification: &Notification) -> bool {
        notification.visible_to(self.user_id, self.include_admin_feed)
    }
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: Notification) -> Result<Notification, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>, StoreError>;

    /// Newest first.
    async fn list(
        &self,
        scope: NotificationScope,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<Notification>, StoreError>;

    /// Returns false when `id` is unknown.
    async fn mark_read(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Marks every notification in `scope` read; returns how many changed.
    async fn mark_all_read(&self, scope: NotificationScope) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait DishCatalog: Send + Sync {
    async fn find_dish(&self, id: Uuid) -> Result<Option<Dish>, StoreError>;

    async fn upsert_dish(&self, dish: Dish) -> Result<Dish, StoreError>;
}

/// Reads a document, retrying with backoff while the store is unavailable.
pub async fn find_with_retry<T, S>(
    repo: &S,
    id: Uuid,
    attempts: u32,
) -> Result<Option<T>, StoreError>
where
    T: Document,
    S: Repository<T> + ?Sized,
{
    retry_read(attempts, || repo.find_by_id(id)).await
}

pub async fn retry_read<T, F, Fut>(attempts: u32, mut read: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match read().await {
            Err(StoreError::Unavailable(reason)) if attempt < attempts => {
                let backoff = READ_BACKOFF_BASE_MS << (attempt - 1);
                warn!(attempt, backoff_ms = backoff, reason = %reason, "store read failed; retrying");
                sleep(Duration::from_millis(backoff)).await;
            }
            other => return other,
        }
    }
}

/// Optimistic read-modify-write of a single document.
///
/// `mutate` may run more than once; it must only touch the document it is
/// given. A mutation that leaves the document unchanged is not written.
/// Returns the stored document, the mutation's output, and whether a write
/// happened.
pub async fn modify<T, S, F, R, E>(
    repo: &S,
    id: Uuid,
    retries: u32,
    mut mutate: F,
) -> Result<Modified<T, R>, E>
where
    T: Document,
    S: Repository<T> + ?Sized,
    F: FnMut(&mut T) -> Result<R, E>,
    E: From<StoreError>,
{
    let attempts = retries.max(1);

    for attempt in 1..=attempts {
        let current = repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{} {id}", T::KIND)))?;

        let mut next = current.clone();
        let output = mutate(&mut next)?;

        if next == current {
            return Ok(Modified {
                doc: current,
                output,
                written: false,
            });
        }

        next.touch();
        match repo.replace(next, current.version()).await {
            Ok(stored) => {
                return Ok(Modified {
                    doc: stored,
                    output,
                    written: true,
                });
            }
            Err(StoreError::Conflict(_)) => {
                debug!(kind = T::KIND, id = %id, attempt, "version conflict; re-reading");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(StoreError::Conflict(format!("{} {id}", T::KIND)).into())
}

#[derive(Debug, Clone)]
pub struct Modified<T, R> {
    pub doc: T,
    pub output: R,
    pub written: bool,
}
