use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    PgConnection, PgPool, Postgres, Row, Transaction,
    postgres::{PgPoolOptions, PgRow},
};
use uuid::Uuid;

use crate::{
    CartHold, ConfirmationToken, MemberId, Money, NewOrder, NewProduct, Order, OrderId,
    OrderLine, OrderStatus, Product, ProductId, Result, SessionId, StoreConfig, StoreError,
    store::{CartStore, OrderStore, StockLedger, Storage, StoreTransaction},
};

const PRODUCT_COLUMNS: &str = "id, name, price, available";
const ORDER_COLUMNS: &str = "id, created_at, member_id, status, confirmation";
const LINE_COLUMNS: &str = "order_id, position, product_id, committed";

/// PostgreSQL-backed storage.
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Creates a storage over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool using `config`.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.database_url)
            .await?;

        tracing::info!(
            max_connections = config.max_connections,
            "connected to inventory database"
        );
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx: Some(tx) }))
    }
}

struct PgTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTransaction {
    fn conn(&mut self) -> Result<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| StoreError::Unavailable("transaction already finished".to_string()))
    }

    fn finish(&mut self) -> Result<Transaction<'static, Postgres>> {
        self.tx
            .take()
            .ok_or_else(|| StoreError::Unavailable("transaction already finished".to_string()))
    }
}

fn to_count(value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::Constraint(format!("stored count {value} is out of range")))
}

fn row_to_product(row: PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        price: Money::from_minor_units(row.try_get("price")?),
        available: to_count(row.try_get("available")?)?,
    })
}

fn row_to_hold(row: PgRow) -> Result<CartHold> {
    Ok(CartHold {
        product_id: ProductId::new(row.try_get("product_id")?),
        session_id: SessionId::new(row.try_get::<String, _>("session_id")?),
        reserved: to_count(row.try_get("reserved")?)?,
    })
}

fn row_to_order(row: PgRow) -> Result<Order> {
    let status: String = row.try_get("status")?;

    Ok(Order {
        id: OrderId::new(row.try_get("id")?),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        member_id: MemberId::new(row.try_get("member_id")?),
        status: status.parse().map_err(StoreError::Constraint)?,
        confirmation: ConfirmationToken::from_uuid(row.try_get::<Uuid, _>("confirmation")?),
    })
}

fn row_to_line(row: PgRow) -> Result<OrderLine> {
    Ok(OrderLine {
        order_id: OrderId::new(row.try_get("order_id")?),
        position: to_count(row.try_get("position")?)?,
        product_id: ProductId::new(row.try_get("product_id")?),
        committed: to_count(row.try_get("committed")?)?,
    })
}

/// Maps CHECK and foreign-key violations onto `Constraint`.
fn map_db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err
        && (db_err.is_check_violation() || db_err.is_foreign_key_violation())
    {
        return StoreError::Constraint(db_err.message().to_string());
    }
    StoreError::Database(err)
}

#[async_trait]
impl StockLedger for PgTransaction {
    async fn product(&mut self, product_id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(product_id.as_i64())
        .fetch_optional(self.conn()?)
        .await?;

        row.map(row_to_product).transpose()
    }

    async fn available(&mut self, product_id: ProductId) -> Result<u32> {
        let available: Option<i64> =
            sqlx::query_scalar("SELECT available FROM products WHERE id = $1 FOR UPDATE")
                .bind(product_id.as_i64())
                .fetch_optional(self.conn()?)
                .await?;

        to_count(available.ok_or(StoreError::ProductNotFound(product_id))?)
    }

    async fn adjust_available(&mut self, product_id: ProductId, delta: i64) -> Result<u32> {
        let available: Option<i64> = sqlx::query_scalar(
            "UPDATE products SET available = available + $2 WHERE id = $1 RETURNING available",
        )
        .bind(product_id.as_i64())
        .bind(delta)
        .fetch_optional(self.conn()?)
        .await
        .map_err(map_db_error)?;

        to_count(available.ok_or(StoreError::ProductNotFound(product_id))?)
    }

    async fn insert_product(&mut self, product: NewProduct) -> Result<Product> {
        let row = sqlx::query(&format!(
            "INSERT INTO products (name, price, available) VALUES ($1, $2, $3) RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(&product.name)
        .bind(product.price.minor_units())
        .bind(i64::from(product.available))
        .fetch_one(self.conn()?)
        .await
        .map_err(map_db_error)?;

        row_to_product(row)
    }

    async fn set_available(&mut self, product_id: ProductId, available: u32) -> Result<Product> {
        let row = sqlx::query(&format!(
            "UPDATE products SET available = $2 WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(product_id.as_i64())
        .bind(i64::from(available))
        .fetch_optional(self.conn()?)
        .await
        .map_err(map_db_error)?;

        row_to_product(row.ok_or(StoreError::ProductNotFound(product_id))?)
    }
}

#[async_trait]
impl CartStore for PgTransaction {
    async fn hold(
        &mut self,
        product_id: ProductId,
        session_id: &SessionId,
    ) -> Result<Option<CartHold>> {
        let row = sqlx::query(
            r#"
            SELECT product_id, session_id, reserved
            FROM cart_holds
            WHERE product_id = $1 AND session_id = $2
            FOR UPDATE
            "#,
        )
        .bind(product_id.as_i64())
        .bind(session_id.as_str())
        .fetch_optional(self.conn()?)
        .await?;

        row.map(row_to_hold).transpose()
    }

    async fn insert_hold(&mut self, hold: &CartHold) -> Result<()> {
        sqlx::query("INSERT INTO cart_holds (product_id, session_id, reserved) VALUES ($1, $2, $3)")
            .bind(hold.product_id.as_i64())
            .bind(hold.session_id.as_str())
            .bind(i64::from(hold.reserved))
            .execute(self.conn()?)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("cart_holds_pkey")
                {
                    return StoreError::HoldExists {
                        product_id: hold.product_id,
                        session_id: hold.session_id.clone(),
                    };
                }
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.is_foreign_key_violation()
                {
                    return StoreError::ProductNotFound(hold.product_id);
                }
                map_db_error(e)
            })?;

        Ok(())
    }

    async fn update_hold(
        &mut self,
        product_id: ProductId,
        session_id: &SessionId,
        reserved: u32,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE cart_holds SET reserved = $3 WHERE product_id = $1 AND session_id = $2",
        )
        .bind(product_id.as_i64())
        .bind(session_id.as_str())
        .bind(i64::from(reserved))
        .execute(self.conn()?)
        .await
        .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::HoldNotFound {
                product_id,
                session_id: session_id.clone(),
            });
        }
        Ok(())
    }

    async fn delete_hold(&mut self, product_id: ProductId, session_id: &SessionId) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM cart_holds WHERE product_id = $1 AND session_id = $2")
                .bind(product_id.as_i64())
                .bind(session_id.as_str())
                .execute(self.conn()?)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::HoldNotFound {
                product_id,
                session_id: session_id.clone(),
            });
        }
        Ok(())
    }

    async fn holds_for_session(&mut self, session_id: &SessionId) -> Result<Vec<CartHold>> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, session_id, reserved
            FROM cart_holds
            WHERE session_id = $1
            ORDER BY product_id ASC
            "#,
        )
        .bind(session_id.as_str())
        .fetch_all(self.conn()?)
        .await?;

        rows.into_iter().map(row_to_hold).collect()
    }

    async fn holds_for_product(&mut self, product_id: ProductId) -> Result<Vec<CartHold>> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, session_id, reserved
            FROM cart_holds
            WHERE product_id = $1
            ORDER BY session_id ASC
            "#,
        )
        .bind(product_id.as_i64())
        .fetch_all(self.conn()?)
        .await?;

        rows.into_iter().map(row_to_hold).collect()
    }

    async fn delete_holds_for_session(&mut self, session_id: &SessionId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_holds WHERE session_id = $1")
            .bind(session_id.as_str())
            .execute(self.conn()?)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl OrderStore for PgTransaction {
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO orders (created_at, member_id, status, confirmation)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(order.created_at)
        .bind(order.member_id.as_i64())
        .bind(order.status.as_str())
        .bind(order.confirmation.as_uuid())
        .fetch_one(self.conn()?)
        .await
        .map_err(map_db_error)?;

        Ok(order.with_id(OrderId::new(id)))
    }

    async fn insert_order_line(&mut self, line: &OrderLine) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO order_lines ({LINE_COLUMNS}) VALUES ($1, $2, $3, $4)"
        ))
        .bind(line.order_id.as_i64())
        .bind(i64::from(line.position))
        .bind(line.product_id.as_i64())
        .bind(i64::from(line.committed))
        .execute(self.conn()?)
        .await
        .map_err(map_db_error)?;

        Ok(())
    }

    async fn order(&mut self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_i64())
            .fetch_optional(self.conn()?)
            .await?;

        row.map(row_to_order).transpose()
    }

    async fn order_by_confirmation(
        &mut self,
        confirmation: ConfirmationToken,
    ) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE confirmation = $1"
        ))
        .bind(confirmation.as_uuid())
        .fetch_optional(self.conn()?)
        .await?;

        row.map(row_to_order).transpose()
    }

    async fn orders_for_member(&mut self, member_id: MemberId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE member_id = $1 ORDER BY id ASC"
        ))
        .bind(member_id.as_i64())
        .fetch_all(self.conn()?)
        .await?;

        rows.into_iter().map(row_to_order).collect()
    }

    async fn all_orders(&mut self) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY id ASC"))
            .fetch_all(self.conn()?)
            .await?;

        rows.into_iter().map(row_to_order).collect()
    }

    async fn lines_for_order(&mut self, order_id: OrderId) -> Result<Vec<OrderLine>> {
        let rows = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM order_lines WHERE order_id = $1 ORDER BY position ASC"
        ))
        .bind(order_id.as_i64())
        .fetch_all(self.conn()?)
        .await?;

        rows.into_iter().map(row_to_line).collect()
    }

    async fn lines_for_product(&mut self, product_id: ProductId) -> Result<Vec<OrderLine>> {
        let rows = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM order_lines WHERE product_id = $1 ORDER BY order_id, position"
        ))
        .bind(product_id.as_i64())
        .fetch_all(self.conn()?)
        .await?;

        rows.into_iter().map(row_to_line).collect()
    }

    async fn set_order_status(&mut self, order_id: OrderId, status: OrderStatus) -> Result<()> {
        let result = sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
            .bind(order_id.as_i64())
            .bind(status.as_str())
            .execute(self.conn()?)
            .await
            .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(())
    }

    async fn delete_order_lines(&mut self, order_id: OrderId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM order_lines WHERE order_id = $1")
            .bind(order_id.as_i64())
            .execute(self.conn()?)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_order(&mut self, order_id: OrderId) -> Result<()> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id.as_i64())
            .execute(self.conn()?)
            .await
            .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn commit(&mut self) -> Result<()> {
        self.finish()?.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.finish()?.rollback().await?;
        Ok(())
    }
}
