use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, UserId};
use domain::{
    CatalogError, LineItem, Order, OrderParts, OrderState, PaymentMethod, PaymentReference,
    Product,
};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};

use crate::{
    Result, StoreError,
    store::{CatalogStore, OrderRepository, StateWrite, check_admin_transition},
};

const ORDER_COLUMNS: &str = "id, version, user_id, state, shipping_address, payment_method, \
     payment_reference, created_at, updated_at";

/// Row filter for order loads.
#[derive(Clone, Copy)]
enum OrderFilter<'a> {
    Id(i64),
    User(i64),
    State(&'a str),
}

/// PostgreSQL-backed order repository.
///
/// Orders live in `orders`, their line items in `order_items` keyed by
/// `(order_id, position)`. Each write runs in one transaction.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    /// Creates a new PostgreSQL order repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    async fn load(conn: &mut PgConnection, filter: OrderFilter<'_>) -> Result<Vec<Order>> {
        let sql = match filter {
            OrderFilter::Id(_) => format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"),
            OrderFilter::User(_) => format!(
                "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at, id"
            ),
            OrderFilter::State(_) => format!(
                "SELECT {ORDER_COLUMNS} FROM orders WHERE state = $1 ORDER BY created_at, id"
            ),
        };
        let query = sqlx::query(&sql);
        let query = match filter {
            OrderFilter::Id(id) => query.bind(id),
            OrderFilter::User(user_id) => query.bind(user_id),
            OrderFilter::State(state) => query.bind(state),
        };
        let rows = query.fetch_all(&mut *conn).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut items = Self::load_items(conn, &ids).await?;

        rows.into_iter()
            .map(|row| {
                let id: i64 = row.try_get("id")?;
                Self::row_to_order(row, items.remove(&id).unwrap_or_default())
            })
            .collect()
    }

    async fn load_items(
        conn: &mut PgConnection,
        order_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<LineItem>>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, quantity, unit_price, subtotal
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, position
            "#,
        )
        .bind(order_ids)
        .fetch_all(&mut *conn)
        .await?;

        let mut items: HashMap<i64, Vec<LineItem>> = HashMap::new();
        for row in rows {
            let order_id: i64 = row.try_get("order_id")?;
            items.entry(order_id).or_default().push(Self::row_to_item(row)?);
        }
        Ok(items)
    }

    fn row_to_item(row: PgRow) -> Result<LineItem> {
        let quantity: i64 = row.try_get("quantity")?;
        let quantity = u32::try_from(quantity)
            .map_err(|_| StoreError::CorruptRecord(format!("item quantity {quantity}")))?;
        let item = LineItem::new(
            ProductId::new(row.try_get("product_id")?),
            quantity,
            Money::from_minor_units(row.try_get("unit_price")?),
        )
        .map_err(|e| StoreError::CorruptRecord(e.to_string()))?;

        let stored_subtotal: i64 = row.try_get("subtotal")?;
        if item.subtotal().minor_units() != stored_subtotal {
            return Err(StoreError::CorruptRecord(format!(
                "item subtotal {stored_subtotal} does not match {}",
                item.subtotal()
            )));
        }
        Ok(item)
    }

    fn row_to_order(row: PgRow, items: Vec<LineItem>) -> Result<Order> {
        let state: String = row.try_get("state")?;
        let method: String = row.try_get("payment_method")?;
        let reference: Option<String> = row.try_get("payment_reference")?;

        let corrupt = |e: domain::OrderError| StoreError::CorruptRecord(e.to_string());
        let parts = OrderParts {
            id: OrderId::new(row.try_get("id")?),
            version: row.try_get("version")?,
            user_id: UserId::new(row.try_get("user_id")?),
            state: state.parse::<OrderState>().map_err(corrupt)?,
            shipping_address: row.try_get("shipping_address")?,
            payment_method: method.parse::<PaymentMethod>().map_err(corrupt)?,
            payment_reference: reference
                .map(PaymentReference::new)
                .transpose()
                .map_err(corrupt)?,
            items,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        };
        Order::restore(parts).map_err(corrupt)
    }

    async fn insert_items(conn: &mut PgConnection, order_id: i64, items: &[LineItem]) -> Result<()> {
        for (position, item) in items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, position, product_id, quantity, unit_price, subtotal)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order_id)
            .bind(position as i32)
            .bind(item.product_id().as_i64())
            .bind(i64::from(item.quantity()))
            .bind(item.unit_price().minor_units())
            .bind(item.subtotal().minor_units())
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// Resolves why a conditional write touched no row.
    async fn explain_miss(conn: &mut PgConnection, id: i64) -> Result<StateWrite> {
        let state: Option<String> = sqlx::query_scalar("SELECT state FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        match state {
            None => Ok(StateWrite::Missing),
            Some(state) => Ok(StateWrite::Conflict {
                actual: state
                    .parse()
                    .map_err(|e: domain::OrderError| StoreError::CorruptRecord(e.to_string()))?,
            }),
        }
    }

    async fn reload(conn: &mut PgConnection, id: i64) -> Result<Order> {
        Self::load(conn, OrderFilter::Id(id))
            .await?
            .pop()
            .ok_or(StoreError::OrderNotFound(OrderId::new(id)))
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Self::load(&mut *conn, OrderFilter::Id(id.as_i64())).await?.pop())
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        Self::load(&mut *conn, OrderFilter::User(user_id.as_i64())).await
    }

    async fn find_by_state(&self, state: OrderState) -> Result<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        Self::load(&mut *conn, OrderFilter::State(state.as_str())).await
    }

    #[tracing::instrument(skip(self, order), fields(user_id = %order.user_id(), items = order.items().len()))]
    async fn create(&self, order: Order) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO orders (user_id, state, total, shipping_address, payment_method,
                                payment_reference, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 1, $7, $8)
            RETURNING id
            "#,
        )
        .bind(order.user_id().as_i64())
        .bind(order.state().as_str())
        .bind(order.total().minor_units())
        .bind(order.shipping_address())
        .bind(order.payment_method().as_str())
        .bind(order.payment_reference().map(PaymentReference::as_str))
        .bind(order.created_at())
        .bind(order.updated_at())
        .fetch_one(&mut *tx)
        .await?;

        Self::insert_items(&mut *tx, id, order.items()).await?;

        tx.commit().await?;
        tracing::debug!(order_id = id, "order inserted");
        Ok(order.into_persisted(OrderId::new(id), 1))
    }

    #[tracing::instrument(skip(self, order), fields(order_id = ?order.id(), version = order.version()))]
    async fn update(&self, order: &Order) -> Result<Order> {
        let order_id = order.id().ok_or(StoreError::Unpersisted)?;
        let id = order_id.as_i64();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET state = $3, total = $4, shipping_address = $5, payment_method = $6,
                payment_reference = $7, updated_at = $8, version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(id)
        .bind(order.version())
        .bind(order.state().as_str())
        .bind(order.total().minor_units())
        .bind(order.shipping_address())
        .bind(order.payment_method().as_str())
        .bind(order.payment_reference().map(PaymentReference::as_str))
        .bind(order.updated_at())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return match actual {
                None => Err(StoreError::OrderNotFound(order_id)),
                Some(actual) => Err(StoreError::ConcurrencyConflict {
                    order_id,
                    expected: order.version(),
                    actual,
                }),
            };
        }

        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        Self::insert_items(&mut *tx, id, order.items()).await?;

        tx.commit().await?;
        Ok(order.clone().into_persisted(order_id, order.version() + 1))
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: OrderId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn transition_state(
        &self,
        id: OrderId,
        from: OrderState,
        to: OrderState,
    ) -> Result<StateWrite> {
        check_admin_transition(from, to)?;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET state = $3,
                payment_reference = CASE WHEN $5 THEN NULL ELSE payment_reference END,
                version = version + 1,
                updated_at = GREATEST($4, updated_at)
            WHERE id = $1 AND state = $2
            "#,
        )
        .bind(id.as_i64())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(Utc::now())
        .bind(to == OrderState::Cancelled)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Self::explain_miss(&mut *tx, id.as_i64()).await;
        }

        let order = Self::reload(&mut *tx, id.as_i64()).await?;
        tx.commit().await?;
        Ok(StateWrite::Applied(order))
    }

    #[tracing::instrument(skip(self, reference))]
    async fn settle(&self, id: OrderId, reference: &PaymentReference) -> Result<StateWrite> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET state = $2, payment_reference = $3, version = version + 1,
                updated_at = GREATEST($4, updated_at)
            WHERE id = $1 AND state = $5
            "#,
        )
        .bind(id.as_i64())
        .bind(OrderState::Paid.as_str())
        .bind(reference.as_str())
        .bind(Utc::now())
        .bind(OrderState::Pending.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Self::explain_miss(&mut *tx, id.as_i64()).await;
        }

        let order = Self::reload(&mut *tx, id.as_i64()).await?;
        tx.commit().await?;
        Ok(StateWrite::Applied(order))
    }
}

/// PostgreSQL-backed catalog store.
///
/// Stock changes are single guarded `UPDATE` statements, so concurrent
/// decrements can never drive a count below zero.
#[derive(Clone)]
pub struct PostgresCatalogStore {
    pool: PgPool,
}

impl PostgresCatalogStore {
    /// Creates a new PostgreSQL catalog store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        let stock: i64 = row.try_get("stock")?;
        let stock = u32::try_from(stock)
            .map_err(|_| StoreError::CorruptRecord(format!("product stock {stock}")))?;
        let product = Product::new(
            row.try_get::<String, _>("name")?,
            Money::from_minor_units(row.try_get("price")?),
            stock,
        )
        .map_err(|e| StoreError::CorruptRecord(e.to_string()))?;

        Ok(product
            .with_description(row.try_get::<String, _>("description")?)
            .with_category(row.try_get::<String, _>("category")?)
            .with_artisan(row.try_get::<String, _>("artisan")?)
            .into_persisted(ProductId::new(row.try_get("id")?)))
    }
}

#[async_trait]
impl CatalogStore for PostgresCatalogStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, name, description, price, category, artisan, stock
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn save_product(&self, product: Product) -> Result<Product> {
        match product.id() {
            None => {
                let id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO products (name, description, price, category, artisan, stock)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    RETURNING id
                    "#,
                )
                .bind(product.name())
                .bind(product.description())
                .bind(product.price().minor_units())
                .bind(product.category())
                .bind(product.artisan())
                .bind(i64::from(product.stock()))
                .fetch_one(&self.pool)
                .await?;
                Ok(product.into_persisted(ProductId::new(id)))
            }
            Some(id) => {
                let updated = sqlx::query(
                    r#"
                    UPDATE products
                    SET name = $2, description = $3, price = $4, category = $5, artisan = $6, stock = $7
                    WHERE id = $1
                    "#,
                )
                .bind(id.as_i64())
                .bind(product.name())
                .bind(product.description())
                .bind(product.price().minor_units())
                .bind(product.category())
                .bind(product.artisan())
                .bind(i64::from(product.stock()))
                .execute(&self.pool)
                .await?;

                if updated.rows_affected() == 0 {
                    return Err(StoreError::ProductNotFound(id));
                }
                Ok(product)
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn decrement_stock(&self, id: ProductId, quantity: u32) -> Result<Product> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            UPDATE products SET stock = stock - $2
            WHERE id = $1 AND stock >= $2
            RETURNING id, name, description, price, category, artisan, stock
            "#,
        )
        .bind(id.as_i64())
        .bind(i64::from(quantity))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Self::row_to_product(row);
        }

        let current = self
            .get_product(id)
            .await?
            .ok_or(StoreError::ProductNotFound(id))?;
        Err(CatalogError::InsufficientStock {
            product: current.name().to_string(),
            requested: quantity,
            available: current.stock(),
        }
        .into())
    }

    #[tracing::instrument(skip(self))]
    async fn increment_stock(&self, id: ProductId, quantity: u32) -> Result<Product> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            UPDATE products SET stock = stock + $2
            WHERE id = $1 AND stock + $2 <= $3
            RETURNING id, name, description, price, category, artisan, stock
            "#,
        )
        .bind(id.as_i64())
        .bind(i64::from(quantity))
        .bind(i64::from(u32::MAX))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Self::row_to_product(row);
        }

        let current = self
            .get_product(id)
            .await?
            .ok_or(StoreError::ProductNotFound(id))?;
        Err(CatalogError::StockOverflow {
            product: current.name().to_string(),
        }
        .into())
    }
}
