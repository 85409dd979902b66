use std::sync::Arc;

use crate::config::Config;
use crate::fanout::FanoutBus;
use crate::gateway::{HttpGateway, PaymentGateway};
use crate::models::courier::Courier;
use crate::models::order::Order;
use crate::observability::metrics::Metrics;
use crate::store::memory::{
    MemoryCatalog, MemoryInvoiceStore, MemoryNotificationStore, MemoryRepository,
};
use crate::store::{CourierStore, DishCatalog, InvoiceStore, NotificationStore, OrderStore};

pub struct AppState {
    pub config: Config,
    pub orders: Arc<dyn OrderStore>,
    pub couriers: Arc<dyn CourierStore>,
    pub invoices: Arc<dyn InvoiceStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub catalog: Arc<dyn DishCatalog>,
    pub gateway: Option<Arc<dyn PaymentGateway>>,
    pub bus: FanoutBus,
    pub metrics: Metrics,
}

impl AppState {
    /// In-memory stores, with the HTTP gateway client when credentials exist.
    pub fn new(config: Config) -> Self {
        let gateway = config.gateway.clone().map(|credentials| {
            Arc::new(HttpGateway::new(config.gateway_base_url.clone(), credentials))
                as Arc<dyn PaymentGateway>
        });
        Self::with_gateway(config, gateway)
    }

    pub fn with_gateway(config: Config, gateway: Option<Arc<dyn PaymentGateway>>) -> Self {
        let metrics = Metrics::new();
        let bus = FanoutBus::new(
            config.activity_buffer_size,
            config.admin_audience,
            metrics.clone(),
        );

        Self {
            orders: Arc::new(MemoryRepository::<Order>::new()),
            couriers: Arc::new(MemoryRepository::<Courier>::new()),
            invoices: Arc::new(MemoryInvoiceStore::new()),
            notifications: Arc::new(MemoryNotificationStore::new()),
            catalog: Arc::new(MemoryCatalog::new()),
            gateway,
            bus,
            metrics,
            config,
        }
    }
}
