use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, ProductId, UserId};
use domain::{Order, OrderState, PaymentReference, Product};
use tokio::sync::RwLock;

use crate::{
    Result, StoreError,
    store::{CatalogStore, OrderRepository, StateWrite, check_admin_transition},
};

#[derive(Default)]
struct OrderTable {
    orders: BTreeMap<OrderId, Order>,
    last_id: i64,
    fail_on_write: bool,
}

impl OrderTable {
    fn check_writable(&self) -> Result<()> {
        if self.fail_on_write {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

/// In-memory order repository.
///
/// A single write lock covers each operation, which makes every write atomic
/// and every conditional write a true compare-and-set.
#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    table: Arc<RwLock<OrderTable>>,
}

impl InMemoryOrderRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.table.read().await.orders.len()
    }

    /// Makes every subsequent write fail with [`StoreError::Unavailable`].
    pub async fn set_fail_on_write(&self, fail: bool) {
        self.table.write().await.fail_on_write = fail;
    }

    /// Clears all orders.
    pub async fn clear(&self) {
        let mut table = self.table.write().await;
        table.orders.clear();
        table.last_id = 0;
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.table.read().await.orders.get(&id).cloned())
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let table = self.table.read().await;
        Ok(table
            .orders
            .values()
            .filter(|o| o.user_id() == user_id)
            .cloned()
            .collect())
    }

    async fn find_by_state(&self, state: OrderState) -> Result<Vec<Order>> {
        let table = self.table.read().await;
        Ok(table
            .orders
            .values()
            .filter(|o| o.state() == state)
            .cloned()
            .collect())
    }

    async fn create(&self, order: Order) -> Result<Order> {
        let mut table = self.table.write().await;
        table.check_writable()?;

        table.last_id += 1;
        let id = OrderId::new(table.last_id);
        let order = order.into_persisted(id, 1);
        table.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn update(&self, order: &Order) -> Result<Order> {
        let id = order.id().ok_or(StoreError::Unpersisted)?;
        let mut table = self.table.write().await;
        table.check_writable()?;

        let stored = table
            .orders
            .get_mut(&id)
            .ok_or(StoreError::OrderNotFound(id))?;
        if stored.version() != order.version() {
            return Err(StoreError::ConcurrencyConflict {
                order_id: id,
                expected: order.version(),
                actual: stored.version(),
            });
        }

        *stored = order.clone().into_persisted(id, order.version() + 1);
        Ok(stored.clone())
    }

    async fn delete(&self, id: OrderId) -> Result<bool> {
        let mut table = self.table.write().await;
        table.check_writable()?;
        Ok(table.orders.remove(&id).is_some())
    }

    async fn transition_state(
        &self,
        id: OrderId,
        from: OrderState,
        to: OrderState,
    ) -> Result<StateWrite> {
        check_admin_transition(from, to)?;
        let mut table = self.table.write().await;
        table.check_writable()?;

        let Some(stored) = table.orders.get(&id) else {
            return Ok(StateWrite::Missing);
        };
        if stored.state() != from {
            return Ok(StateWrite::Conflict {
                actual: stored.state(),
            });
        }

        let mut next = stored.clone();
        next.transition_to(to)?;
        let next = next.into_persisted(id, stored.version() + 1);
        table.orders.insert(id, next.clone());
        Ok(StateWrite::Applied(next))
    }

    async fn settle(&self, id: OrderId, reference: &PaymentReference) -> Result<StateWrite> {
        let mut table = self.table.write().await;
        table.check_writable()?;

        let Some(stored) = table.orders.get(&id) else {
            return Ok(StateWrite::Missing);
        };
        if stored.state() != OrderState::Pending {
            return Ok(StateWrite::Conflict {
                actual: stored.state(),
            });
        }

        let mut next = stored.clone();
        next.mark_paid(reference.clone())?;
        let next = next.into_persisted(id, stored.version() + 1);
        table.orders.insert(id, next.clone());
        Ok(StateWrite::Applied(next))
    }
}

#[derive(Default)]
struct ProductTable {
    products: BTreeMap<ProductId, Product>,
    last_id: i64,
}

/// In-memory catalog store.
#[derive(Clone, Default)]
pub struct InMemoryCatalogStore {
    table: Arc<RwLock<ProductTable>>,
}

impl InMemoryCatalogStore {
    /// Creates a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of products.
    pub async fn product_count(&self) -> usize {
        self.table.read().await.products.len()
    }

    async fn adjust_stock<F>(&self, id: ProductId, adjust: F) -> Result<Product>
    where
        F: FnOnce(&mut Product) -> std::result::Result<(), domain::CatalogError> + Send,
    {
        let mut table = self.table.write().await;
        let product = table
            .products
            .get_mut(&id)
            .ok_or(StoreError::ProductNotFound(id))?;

        // Work on a copy so a rejected adjustment leaves the stored row untouched.
        let mut next = product.clone();
        adjust(&mut next)?;
        *product = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.table.read().await.products.get(&id).cloned())
    }

    async fn save_product(&self, product: Product) -> Result<Product> {
        let mut table = self.table.write().await;
        let product = match product.id() {
            Some(id) => {
                if !table.products.contains_key(&id) {
                    return Err(StoreError::ProductNotFound(id));
                }
                product
            }
            None => {
                table.last_id += 1;
                product.into_persisted(ProductId::new(table.last_id))
            }
        };
        if let Some(id) = product.id() {
            table.products.insert(id, product.clone());
        }
        Ok(product)
    }

    async fn decrement_stock(&self, id: ProductId, quantity: u32) -> Result<Product> {
        self.adjust_stock(id, |p| p.decrement_stock(quantity)).await
    }

    async fn increment_stock(&self, id: ProductId, quantity: u32) -> Result<Product> {
        self.adjust_stock(id, |p| p.increment_stock(quantity)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::OrderRepositoryExt;
    use domain::{CatalogError, LineItem, Money, OrderError, PaymentMethod};

    fn new_order(user: i64) -> Order {
        Order::with_items(
            UserId::new(user),
            "1 Market Lane",
            PaymentMethod::Stripe,
            vec![
                LineItem::new(ProductId::new(1), 2, Money::from_minor_units(50_000)).unwrap(),
                LineItem::new(ProductId::new(3), 1, Money::from_minor_units(25_000)).unwrap(),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_assigns_sequential_ids() {
        let repo = InMemoryOrderRepository::new();

        let first = repo.create(new_order(1)).await.unwrap();
        let second = repo.create(new_order(1)).await.unwrap();

        assert_eq!(first.id(), Some(OrderId::new(1)));
        assert_eq!(second.id(), Some(OrderId::new(2)));
        assert_eq!(first.version(), 1);
        assert_eq!(repo.order_count().await, 2);
    }

    #[tokio::test]
    async fn find_by_user_and_state() {
        let repo = InMemoryOrderRepository::new();
        repo.create(new_order(1)).await.unwrap();
        repo.create(new_order(2)).await.unwrap();
        let third = repo.create(new_order(1)).await.unwrap();
        repo.transition_state(
            third.id().unwrap(),
            OrderState::Pending,
            OrderState::Cancelled,
        )
        .await
        .unwrap();

        assert_eq!(repo.find_by_user(UserId::new(1)).await.unwrap().len(), 2);
        assert_eq!(
            repo.find_by_state(OrderState::Pending).await.unwrap().len(),
            2
        );
        assert_eq!(
            repo.find_by_state(OrderState::Cancelled)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn update_replaces_items_and_bumps_version() {
        let repo = InMemoryOrderRepository::new();
        let mut order = repo.create(new_order(1)).await.unwrap();

        order.remove_item(ProductId::new(3)).unwrap();
        let saved = repo.update(&order).await.unwrap();

        assert_eq!(saved.version(), 2);
        let loaded = repo.get_existing(order.id().unwrap()).await.unwrap();
        assert_eq!(loaded.items().len(), 1);
        assert_eq!(loaded.total(), Money::from_minor_units(100_000));
    }

    #[tokio::test]
    async fn stale_update_is_a_conflict() {
        let repo = InMemoryOrderRepository::new();
        let order = repo.create(new_order(1)).await.unwrap();
        let id = order.id().unwrap();

        repo.transition_state(id, OrderState::Pending, OrderState::Cancelled)
            .await
            .unwrap();

        let result = repo.update(&order).await;
        assert!(matches!(
            result,
            Err(StoreError::ConcurrencyConflict {
                expected: 1,
                actual: 2,
                ..
            })
        ));
        assert_eq!(
            repo.get_existing(id).await.unwrap().state(),
            OrderState::Cancelled
        );
    }

    #[tokio::test]
    async fn cancelling_a_paid_order_clears_its_reference() {
        let repo = InMemoryOrderRepository::new();
        let id = repo.create(new_order(1)).await.unwrap().id().unwrap();
        repo.settle(id, &PaymentReference::new("pi_1").unwrap())
            .await
            .unwrap();

        let cancelled = repo
            .transition_state(id, OrderState::Paid, OrderState::Cancelled)
            .await
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(cancelled.payment_reference(), None);
        assert_eq!(repo.get_existing(id).await.unwrap().payment_reference(), None);
    }

    #[tokio::test]
    async fn update_requires_persisted_order() {
        let repo = InMemoryOrderRepository::new();
        let result = repo.update(&new_order(1)).await;
        assert!(matches!(result, Err(StoreError::Unpersisted)));
    }

    #[tokio::test]
    async fn settle_is_compare_and_set() {
        let repo = InMemoryOrderRepository::new();
        let id = repo.create(new_order(1)).await.unwrap().id().unwrap();
        let reference = PaymentReference::new("pi_1").unwrap();

        let first = repo.settle(id, &reference).await.unwrap();
        let order = first.applied().unwrap();
        assert_eq!(order.state(), OrderState::Paid);
        assert_eq!(order.payment_reference(), Some(&reference));

        let second = repo
            .settle(id, &PaymentReference::new("pi_2").unwrap())
            .await
            .unwrap();
        assert_eq!(
            second,
            StateWrite::Conflict {
                actual: OrderState::Paid
            }
        );
        let stored = repo.get_existing(id).await.unwrap();
        assert_eq!(stored.payment_reference(), Some(&reference));
    }

    #[tokio::test]
    async fn settle_missing_order() {
        let repo = InMemoryOrderRepository::new();
        let result = repo
            .settle(OrderId::new(9), &PaymentReference::new("x").unwrap())
            .await
            .unwrap();
        assert_eq!(result, StateWrite::Missing);
    }

    #[tokio::test]
    async fn transition_state_rejects_paid_target() {
        let repo = InMemoryOrderRepository::new();
        let id = repo.create(new_order(1)).await.unwrap().id().unwrap();

        let result = repo
            .transition_state(id, OrderState::Pending, OrderState::Paid)
            .await;
        assert!(matches!(
            result,
            Err(StoreError::Order(OrderError::InvalidTransition { .. }))
        ));
    }

    #[tokio::test]
    async fn delete_removes_order() {
        let repo = InMemoryOrderRepository::new();
        let id = repo.create(new_order(1)).await.unwrap().id().unwrap();

        assert!(repo.delete(id).await.unwrap());
        assert!(!repo.delete(id).await.unwrap());
        assert!(!repo.exists(id).await.unwrap());
    }

    #[tokio::test]
    async fn failed_writes_change_nothing() {
        let repo = InMemoryOrderRepository::new();
        let id = repo.create(new_order(1)).await.unwrap().id().unwrap();
        repo.set_fail_on_write(true).await;

        assert!(matches!(
            repo.create(new_order(1)).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(
            repo.settle(id, &PaymentReference::new("pi").unwrap())
                .await
                .is_err()
        );
        assert_eq!(repo.order_count().await, 1);
        assert_eq!(
            repo.get_existing(id).await.unwrap().state(),
            OrderState::Pending
        );
    }

    #[tokio::test]
    async fn catalog_stock_is_guarded() {
        let catalog = InMemoryCatalogStore::new();
        let product = catalog
            .save_product(Product::new("Woven basket", Money::from_minor_units(8_000), 2).unwrap())
            .await
            .unwrap();
        let id = product.id().unwrap();

        let after = catalog.decrement_stock(id, 2).await.unwrap();
        assert_eq!(after.stock(), 0);

        let result = catalog.decrement_stock(id, 1).await;
        assert!(matches!(
            result,
            Err(StoreError::Catalog(CatalogError::InsufficientStock { .. }))
        ));

        let restored = catalog.increment_stock(id, 3).await.unwrap();
        assert_eq!(restored.stock(), 3);
        assert_eq!(
            catalog.get_product(id).await.unwrap().unwrap().stock(),
            3
        );
    }

    #[tokio::test]
    async fn catalog_unknown_product() {
        let catalog = InMemoryCatalogStore::new();
        assert!(matches!(
            catalog.decrement_stock(ProductId::new(4), 1).await,
            Err(StoreError::ProductNotFound(_))
        ));
        let orphan = Product::new("Ghost", Money::zero(), 1)
            .unwrap()
            .into_persisted(ProductId::new(77));
        assert!(matches!(
            catalog.save_product(orphan).await,
            Err(StoreError::ProductNotFound(_))
        ));
    }
}
