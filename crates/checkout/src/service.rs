//! Order service: the caller-facing contract for creating, reading, editing
//! and administratively transitioning orders.

use std::collections::{BTreeMap, BTreeSet};

use common::{Money, OrderId, ProductId, UserId};
use domain::{LineItem, Order, OrderState, PaymentMethod};
use order_store::{CatalogStore, OrderRepository, StateWrite, StoreError};
use serde::{Deserialize, Serialize};

use crate::cache::CacheAside;
use crate::config::StockPolicy;
use crate::error::{CheckoutError, Resource, Result};

/// A line item as submitted by a caller, with the unit price already captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl NewLineItem {
    pub fn new(product_id: ProductId, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
        }
    }

    fn into_line_item(self) -> Result<LineItem> {
        Ok(LineItem::new(self.product_id, self.quantity, self.unit_price)?)
    }
}

/// Attempts at an item edit before a version conflict is reported.
const MAX_EDIT_ATTEMPTS: u32 = 3;

/// Stock movements implied by replacing one item list with another.
#[derive(Debug, Default, PartialEq, Eq)]
struct StockChange {
    take: Vec<(ProductId, u32)>,
    give_back: Vec<(ProductId, u32)>,
}

impl StockChange {
    fn between(before: &[LineItem], after: &[LineItem]) -> Result<Self> {
        let before = quantities(before);
        let after = quantities(after);
        let mut change = StockChange::default();

        let products: BTreeSet<_> =
            before.keys().chain(after.keys()).copied().collect();
        for product in products {
            let old = before.get(&product).copied().unwrap_or(0);
            let new = after.get(&product).copied().unwrap_or(0);
            let amount = |delta: u64| {
                u32::try_from(delta).map_err(|_| {
                    CheckoutError::Validation(format!("quantity overflow for product {product}"))
                })
            };
            if new > old {
                change.take.push((product, amount(new - old)?));
            } else if old > new {
                change.give_back.push((product, amount(old - new)?));
            }
        }
        Ok(change)
    }
}

fn quantities(items: &[LineItem]) -> BTreeMap<ProductId, u64> {
    let mut totals = BTreeMap::new();
    for item in items {
        *totals.entry(item.product_id()).or_insert(0u64) += u64::from(item.quantity());
    }
    totals
}

/// Application service for orders.
///
/// Every write goes straight to the repository; the cache only serves
/// [`OrderService::get_order`] and is invalidated after each write.
pub struct OrderService<R, C> {
    repo: R,
    catalog: C,
    cache: CacheAside,
    stock_policy: StockPolicy,
}

impl<R, C> OrderService<R, C>
where
    R: OrderRepository,
    C: CatalogStore,
{
    /// Creates a new order service without a cache and with deferred stock.
    pub fn new(repo: R, catalog: C) -> Self {
        Self {
            repo,
            catalog,
            cache: CacheAside::default(),
            stock_policy: StockPolicy::Deferred,
        }
    }

    /// Serves reads through `cache`; pass clones of one handle to every
    /// component that writes orders.
    pub fn with_cache(mut self, cache: CacheAside) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_stock_policy(mut self, policy: StockPolicy) -> Self {
        self.stock_policy = policy;
        self
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Creates a pending order from caller-priced items.
    #[tracing::instrument(skip(self, shipping_address, items), fields(items = items.len()))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        shipping_address: &str,
        method: PaymentMethod,
        items: Vec<NewLineItem>,
    ) -> Result<Order> {
        let items = items
            .into_iter()
            .map(NewLineItem::into_line_item)
            .collect::<Result<Vec<_>>>()?;
        let order = Order::with_items(user_id, shipping_address, method, items)?;

        let stock = self.stock_change(&[], order.items())?;
        self.take_stock(&stock.take).await?;

        let order = match self.repo.create(order).await {
            Ok(order) => order,
            Err(err) => {
                self.return_stock(&stock.take).await;
                return Err(err.into());
            }
        };

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(
            order_id = ?order.id(),
            %user_id,
            total = %order.total(),
            "order created"
        );
        Ok(order)
    }

    /// Creates a pending order, capturing each product's current catalog price.
    #[tracing::instrument(skip(self, shipping_address, lines), fields(lines = lines.len()))]
    pub async fn create_order_from_catalog(
        &self,
        user_id: UserId,
        shipping_address: &str,
        method: PaymentMethod,
        lines: &[(ProductId, u32)],
    ) -> Result<Order> {
        let mut items = Vec::with_capacity(lines.len());
        for &(product_id, quantity) in lines {
            let product = self
                .catalog
                .get_product(product_id)
                .await?
                .ok_or(CheckoutError::NotFound(Resource::Product(product_id)))?;
            items.push(NewLineItem::new(product_id, quantity, product.price()));
        }
        self.create_order(user_id, shipping_address, method, items)
            .await
    }

    /// Loads an order, serving it from the cache when possible.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        if let Some(order) = self.cache.get(order_id).await {
            return Ok(order);
        }

        let ticket = self.cache.fill_ticket().await;
        let order = self
            .repo
            .find_by_id(order_id)
            .await?
            .ok_or(CheckoutError::NotFound(Resource::Order(order_id)))?;
        self.cache.put(&order, ticket).await;
        Ok(order)
    }

    pub async fn list_orders_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.repo.find_by_user(user_id).await?)
    }

    pub async fn list_orders_by_state(&self, state: OrderState) -> Result<Vec<Order>> {
        Ok(self.repo.find_by_state(state).await?)
    }

    /// Applies an administrative transition (cancel, ship, deliver).
    ///
    /// `Paid` is only reachable through settlement. The write is conditional
    /// on the state the order was read in; if another writer moved the order
    /// first, the request is re-checked against the new state.
    #[tracing::instrument(skip(self))]
    pub async fn transition_state(&self, order_id: OrderId, target: OrderState) -> Result<Order> {
        let mut current = self.load(order_id).await?;

        loop {
            let from = current.state();
            if target == OrderState::Paid || !from.can_transition_to(target) {
                return Err(CheckoutError::InvalidTransition { from, to: target });
            }

            match self.repo.transition_state(order_id, from, target).await? {
                StateWrite::Applied(order) => {
                    self.cache.invalidate(order_id).await;
                    if target == OrderState::Cancelled {
                        self.release_all(&order).await;
                    }

                    metrics::counter!("order_transitions_total", "to" => target.as_str())
                        .increment(1);
                    tracing::info!(%order_id, %from, to = %target, "order state changed");
                    return Ok(order);
                }
                StateWrite::Missing => {
                    self.cache.invalidate(order_id).await;
                    return Err(CheckoutError::NotFound(Resource::Order(order_id)));
                }
                StateWrite::Conflict { actual } => {
                    tracing::debug!(%order_id, expected = %from, %actual, "order moved concurrently");
                    current = self.load(order_id).await?;
                }
            }
        }
    }

    /// Appends an item to a pending order.
    #[tracing::instrument(skip(self))]
    pub async fn add_item(&self, order_id: OrderId, item: NewLineItem) -> Result<Order> {
        let item = item.into_line_item()?;
        self.edit(order_id, |order| {
            order.add_item(item.clone())?;
            Ok(true)
        })
        .await
    }

    /// Removes every item for `product_id`; a product not on the order is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn remove_item(&self, order_id: OrderId, product_id: ProductId) -> Result<Order> {
        self.edit(order_id, |order| Ok(order.remove_item(product_id)? > 0))
            .await
    }

    /// Sets the quantity of the item for `product_id`; a product not on the
    /// order is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Order> {
        self.edit(order_id, |order| {
            Ok(order.update_item_quantity(product_id, quantity)?)
        })
        .await
    }

    /// Deletes an order and its items.
    #[tracing::instrument(skip(self))]
    pub async fn delete_order(&self, order_id: OrderId) -> Result<()> {
        let order = self.load(order_id).await?;
        let deleted = self.repo.delete(order_id).await?;
        self.cache.invalidate(order_id).await;
        if !deleted {
            return Err(CheckoutError::NotFound(Resource::Order(order_id)));
        }

        // Shipped and delivered goods have left stock; cancelled orders already
        // gave theirs back.
        if matches!(order.state(), OrderState::Pending | OrderState::Paid) {
            self.release_all(&order).await;
        }
        tracing::info!(%order_id, "order deleted");
        Ok(())
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.repo
            .find_by_id(order_id)
            .await?
            .ok_or(CheckoutError::NotFound(Resource::Order(order_id)))
    }

    /// Applies `mutate` to the stored order and saves the result.
    ///
    /// `mutate` reports whether it changed anything; an unchanged order is
    /// returned without a write. If another writer saved the order first, the
    /// edit is replayed on the fresh copy, so an order that has meanwhile left
    /// `Pending` fails with the lock error rather than a storage error.
    async fn edit<F>(&self, order_id: OrderId, mutate: F) -> Result<Order>
    where
        F: Fn(&mut Order) -> Result<bool> + Send + Sync,
    {
        let mut attempt = 1;
        loop {
            let mut order = self.load(order_id).await?;
            let before = order.items().to_vec();
            if !mutate(&mut order)? {
                return Ok(order);
            }

            let stock = self.stock_change(&before, order.items())?;
            self.take_stock(&stock.take).await?;

            match self.repo.update(&order).await {
                Ok(saved) => {
                    self.cache.invalidate(order_id).await;
                    self.return_stock(&stock.give_back).await;

                    tracing::info!(%order_id, total = %saved.total(), "order items updated");
                    return Ok(saved);
                }
                Err(StoreError::ConcurrencyConflict { actual, .. })
                    if attempt < MAX_EDIT_ATTEMPTS =>
                {
                    self.return_stock(&stock.take).await;
                    tracing::debug!(%order_id, attempt, actual, "order changed during edit, retrying");
                    attempt += 1;
                }
                Err(err) => {
                    self.return_stock(&stock.take).await;
                    return Err(err.into());
                }
            }
        }
    }

    fn stock_change(&self, before: &[LineItem], after: &[LineItem]) -> Result<StockChange> {
        match self.stock_policy {
            StockPolicy::Deferred => Ok(StockChange::default()),
            StockPolicy::ReserveOnCreate => StockChange::between(before, after),
        }
    }

    /// Decrements stock for every line, undoing earlier lines if one fails.
    async fn take_stock(&self, lines: &[(ProductId, u32)]) -> Result<()> {
        for (done, &(product_id, quantity)) in lines.iter().enumerate() {
            if let Err(err) = self.catalog.decrement_stock(product_id, quantity).await {
                self.return_stock(&lines[..done]).await;
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Returns stock after a committed write. Failures are logged, not raised,
    /// since the order write itself has already succeeded.
    async fn return_stock(&self, lines: &[(ProductId, u32)]) {
        for &(product_id, quantity) in lines {
            if let Err(err) = self.catalog.increment_stock(product_id, quantity).await {
                tracing::warn!(%product_id, quantity, error = %err, "failed to return stock");
            }
        }
    }

    async fn release_all(&self, order: &Order) {
        match self.stock_change(order.items(), &[]) {
            Ok(stock) => self.return_stock(&stock.give_back).await,
            Err(err) => tracing::warn!(order_id = ?order.id(), error = %err, "failed to compute stock release"),
        }
    }
}
