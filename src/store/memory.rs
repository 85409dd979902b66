use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::geo::haversine_m;
use crate::models::courier::{Courier, GeoPoint};
use crate::models::dish::Dish;
use crate::models::invoice::Invoice;
use crate::models::notification::Notification;
use crate::models::order::Order;
use crate::store::{
    CourierFilter, CourierStore, DishCatalog, Document, InvoiceStore, NotificationScope,
    NotificationStore, OrderFilter, OrderStore, Repository, StoreError,
};

pub struct MemoryRepository<T> {
    docs: DashMap<Uuid, T>,
}

impl<T: Document> MemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            docs: DashMap::new(),
        }
    }

    fn snapshot(&self) -> Vec<T> {
        self.docs.iter().map(|entry| entry.value().clone()).collect()
    }
}

impl<T: Document> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Document> Repository<T> for MemoryRepository<T> {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<T>, StoreError> {
        Ok(self.docs.get(&id).map(|entry| entry.value().clone()))
    }

    async fn create(&self, mut doc: T) -> Result<T, StoreError> {
        match self.docs.entry(doc.id()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!("{} {}", T::KIND, doc.id()))),
            Entry::Vacant(slot) => {
                doc.set_version(0);
                slot.insert(doc.clone());
                Ok(doc)
            }
        }
    }

    async fn replace(&self, mut doc: T, expected_version: u64) -> Result<T, StoreError> {
        let id = doc.id();
        let mut stored = self
            .docs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("{} {id}", T::KIND)))?;

        if stored.version() != expected_version {
            return Err(StoreError::Conflict(format!("{} {id}", T::KIND)));
        }

        doc.set_version(expected_version + 1);
        *stored = doc.clone();
        Ok(doc)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.docs.len())
    }
}

#[async_trait]
impl OrderStore for MemoryRepository<Order> {
    async fn query(
        &self,
        filter: &OrderFilter,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .snapshot()
            .into_iter()
            .filter(|order| filter.matches(order))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(orders.into_iter().skip(skip).take(limit).collect())
    }

    async fn find_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        Ok(self.docs.iter().find_map(|entry| {
            let order = entry.value();
            let matches = order
                .payment_info
                .as_ref()
                .and_then(|info| info.gateway_order_id.as_deref())
                == Some(gateway_order_id);
            matches.then(|| order.clone())
        }))
    }
}

#[async_trait]
impl CourierStore for MemoryRepository<Courier> {
    async fn geo_near(
        &self,
        point: GeoPoint,
        max_distance_m: f64,
        filter: CourierFilter,
        limit: usize,
    ) -> Result<Vec<(Courier, f64)>, StoreError> {
        let mut nearby: Vec<(Courier, f64)> = self
            .docs
            .iter()
            .filter(|entry| !filter.available_only || entry.value().available)
            .map(|entry| {
                let courier = entry.value().clone();
                let distance = haversine_m(&courier.location, &point);
                (courier, distance)
            })
            .filter(|(_, distance)| *distance <= max_distance_m)
            .collect();

        nearby.sort_by(|a, b| a.1.total_cmp(&b.1));
        nearby.truncate(limit);
        Ok(nearby)
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Courier>, StoreError> {
        Ok(self.docs.iter().find_map(|entry| {
            let courier = entry.value();
            (courier.user_id == Some(user_id)).then(|| courier.clone())
        }))
    }
}

#[derive(Default)]
pub struct MemoryInvoiceStore {
    by_order: DashMap<Uuid, Invoice>,
}

impl MemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceStore for MemoryInvoiceStore {
    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Invoice>, StoreError> {
        Ok(self.by_order.get(&order_id).map(|entry| entry.value().clone()))
    }

    async fn insert_if_absent(&self, invoice: Invoice) -> Result<(Invoice, bool), StoreError> {
        match self.by_order.entry(invoice.order_id) {
            Entry::Occupied(existing) => Ok((existing.get().clone(), false)),
            Entry::Vacant(slot) => {
                slot.insert(invoice.clone());
                Ok((invoice, true))
            }
        }
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.by_order.len())
    }
}

#[derive(Default)]
pub struct MemoryNotificationStore {
    notifications: DashMap<Uuid, Notification>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: Notification) -> Result<Notification, StoreError> {
        self.notifications
            .insert(notification.id, notification.clone());
        Ok(notification)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>, StoreError> {
        Ok(self.notifications.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list(
        &self,
        scope: NotificationScope,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        let mut matched: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|entry| scope.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched.into_iter().skip(skip).take(limit).collect())
    }

    async fn mark_read(&self, id: Uuid) -> Result<bool, StoreError> {
        match self.notifications.get_mut(&id) {
            Some(mut entry) => {
                if !entry.read {
                    entry.read = true;
                    entry.updated_at = chrono::Utc::now();
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_read(&self, scope: NotificationScope) -> Result<usize, StoreError> {
        let mut changed = 0;
        for mut entry in self.notifications.iter_mut() {
            if !entry.read && scope.matches(entry.value()) {
                entry.read = true;
                entry.updated_at = chrono::Utc::now();
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    dishes: DashMap<Uuid, Dish>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DishCatalog for MemoryCatalog {
    async fn find_dish(&self, id: Uuid) -> Result<Option<Dish>, StoreError> {
        Ok(self.dishes.get(&id).map(|entry| entry.value().clone()))
    }

    async fn upsert_dish(&self, dish: Dish) -> Result<Dish, StoreError> {
        self.dishes.insert(dish.id, dish.clone());
        Ok(dish)
    }
}
