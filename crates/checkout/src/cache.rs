//! Read-side order cache.
//!
//! The cache is an accelerator only: reads fall through to the repository on a
//! miss or an error, writes invalidate the entry, and no write path ever
//! consults it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use domain::Order;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

/// A cache backend failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Order cache error: {0}")]
pub struct CacheError(pub String);

#[async_trait]
pub trait OrderCache: Send + Sync {
    async fn get(&self, id: OrderId) -> Result<Option<Order>, CacheError>;

    async fn put(&self, order: &Order) -> Result<(), CacheError>;

    async fn invalidate(&self, id: OrderId) -> Result<(), CacheError>;
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<OrderId, Order>,
    failing: bool,
}

impl CacheState {
    fn check(&self) -> Result<(), CacheError> {
        if self.failing {
            return Err(CacheError("cache offline".to_string()));
        }
        Ok(())
    }
}

/// Process-local order cache.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderCache {
    state: Arc<RwLock<CacheState>>,
}

impl InMemoryOrderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail until reset.
    pub async fn set_failing(&self, failing: bool) {
        self.state.write().await.failing = failing;
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn contains(&self, id: OrderId) -> bool {
        self.state.read().await.entries.contains_key(&id)
    }
}

#[async_trait]
impl OrderCache for InMemoryOrderCache {
    async fn get(&self, id: OrderId) -> Result<Option<Order>, CacheError> {
        let state = self.state.read().await;
        state.check()?;
        Ok(state.entries.get(&id).cloned())
    }

    async fn put(&self, order: &Order) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        state.check()?;
        if let Some(id) = order.id() {
            state.entries.insert(id, order.clone());
        }
        Ok(())
    }

    async fn invalidate(&self, id: OrderId) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        state.check()?;
        state.entries.remove(&id);
        Ok(())
    }
}

/// Marks the invalidation epoch a read started in.
///
/// Taken before loading from the repository and handed back to
/// [`CacheAside::put`], which drops the fill if any invalidation landed since.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket(u64);

/// Fail-open cache-aside handle shared by the service and the coordinator.
///
/// Clones share one invalidation epoch, so a fill that raced a write through
/// any clone is discarded instead of caching the pre-write order.
#[derive(Clone, Default)]
pub struct CacheAside {
    cache: Option<Arc<dyn OrderCache>>,
    epoch: Arc<Mutex<u64>>,
}

impl CacheAside {
    pub fn new(cache: Arc<dyn OrderCache>) -> Self {
        Self {
            cache: Some(cache),
            epoch: Arc::default(),
        }
    }

    /// A handle that never caches.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub(crate) async fn get(&self, id: OrderId) -> Option<Order> {
        let cache = self.cache.as_ref()?;
        match cache.get(id).await {
            Ok(hit) => hit,
            Err(err) => {
                Self::record_error(id, &err);
                None
            }
        }
    }

    pub(crate) async fn fill_ticket(&self) -> FillTicket {
        FillTicket(*self.epoch.lock().await)
    }

    /// Caches a freshly loaded order unless an invalidation happened after
    /// `ticket` was taken.
    pub(crate) async fn put(&self, order: &Order, ticket: FillTicket) {
        let (Some(cache), Some(id)) = (&self.cache, order.id()) else {
            return;
        };
        let epoch = self.epoch.lock().await;
        if *epoch != ticket.0 {
            tracing::debug!(order_id = %id, "order changed during read, not caching");
            return;
        }
        if let Err(err) = cache.put(order).await {
            Self::record_error(id, &err);
        }
    }

    pub(crate) async fn invalidate(&self, id: OrderId) {
        let Some(cache) = &self.cache else {
            return;
        };
        let mut epoch = self.epoch.lock().await;
        *epoch = epoch.wrapping_add(1);
        if let Err(err) = cache.invalidate(id).await {
            Self::record_error(id, &err);
        }
    }

    fn record_error(id: OrderId, err: &CacheError) {
        metrics::counter!("order_cache_errors_total").increment(1);
        tracing::warn!(order_id = %id, error = %err, "order cache unavailable, continuing without it");
    }
}
