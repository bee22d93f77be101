//! Wiring of the order service and the settlement coordinator.

use std::sync::Arc;

use common::OrderId;
use domain::Order;
use order_store::{
    CatalogStore, InMemoryCatalogStore, InMemoryOrderRepository, OrderRepository,
    PostgresCatalogStore, PostgresOrderRepository, StoreError,
};
use sqlx::postgres::PgPoolOptions;

use crate::cache::{CacheAside, InMemoryOrderCache, OrderCache};
use crate::config::CheckoutConfig;
use crate::error::Result;
use crate::gateway::PaymentGateways;
use crate::payload::PaymentPayload;
use crate::service::OrderService;
use crate::settlement::SettlementCoordinator;

/// The order core, constructed once at startup and shared by callers.
pub struct Checkout<R, C> {
    pub orders: OrderService<R, C>,
    pub payments: SettlementCoordinator<R>,
}

impl<R, C> Checkout<R, C>
where
    R: OrderRepository + Clone,
    C: CatalogStore,
{
    /// Builds the core over the given stores, with a process-local cache when
    /// the configuration enables one.
    pub fn new(repo: R, catalog: C, gateways: PaymentGateways, config: &CheckoutConfig) -> Self {
        let cache: Option<Arc<dyn OrderCache>> = config
            .order_cache
            .then(|| Arc::new(InMemoryOrderCache::new()) as Arc<dyn OrderCache>);
        Self::with_cache(repo, catalog, gateways, config, cache)
    }

    /// Builds the core with an explicit cache (or none).
    pub fn with_cache(
        repo: R,
        catalog: C,
        gateways: PaymentGateways,
        config: &CheckoutConfig,
        cache: Option<Arc<dyn OrderCache>>,
    ) -> Self {
        let mut orders =
            OrderService::new(repo.clone(), catalog).with_stock_policy(config.stock_policy);
        let mut payments = SettlementCoordinator::new(repo, gateways)
            .with_gateway_timeout(config.gateway_timeout);
        if let Some(cache) = cache {
            let cache = CacheAside::new(cache);
            orders = orders.with_cache(cache.clone());
            payments = payments.with_cache(cache);
        }
        Self { orders, payments }
    }

    /// Settles payment for a pending order.
    pub async fn settle_payment(&self, order_id: OrderId, payload: PaymentPayload) -> Result<Order> {
        self.payments.settle_payment(order_id, payload).await
    }
}

impl Checkout<InMemoryOrderRepository, InMemoryCatalogStore> {
    /// Builds the core over empty in-memory stores.
    pub fn in_memory(gateways: PaymentGateways, config: &CheckoutConfig) -> Self {
        Self::new(
            InMemoryOrderRepository::new(),
            InMemoryCatalogStore::new(),
            gateways,
            config,
        )
    }
}

impl Checkout<PostgresOrderRepository, PostgresCatalogStore> {
    /// Connects to `DATABASE_URL`, runs migrations and builds the core.
    pub async fn connect(gateways: PaymentGateways, config: &CheckoutConfig) -> Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::Unavailable("DATABASE_URL is not set".to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(StoreError::from)?;

        let repo = PostgresOrderRepository::new(pool.clone());
        repo.run_migrations().await.map_err(StoreError::from)?;
        tracing::info!("connected to order database");

        Ok(Self::new(
            repo,
            PostgresCatalogStore::new(pool),
            gateways,
            config,
        ))
    }
}
