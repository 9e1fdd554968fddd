use async_trait::async_trait;

use crate::{
    CartHold, ConfirmationToken, MemberId, NewOrder, NewProduct, Order, OrderId, OrderLine,
    OrderStatus, Product, ProductId, Result, SessionId,
};

/// Available-count primitives for each product.
#[async_trait]
pub trait StockLedger: Send {
    /// Loads a product row. Returns None if it doesn't exist.
    async fn product(&mut self, product_id: ProductId) -> Result<Option<Product>>;

    /// Returns the available count, or `ProductNotFound`.
    async fn available(&mut self, product_id: ProductId) -> Result<u32>;

    /// Applies `delta` to the available count and returns the new count.
    ///
    /// Fails with `ProductNotFound` for an unknown product and with `Constraint`
    /// if the count would become negative.
    async fn adjust_available(&mut self, product_id: ProductId, delta: i64) -> Result<u32>;

    /// Inserts a catalog product; the store assigns the id.
    async fn insert_product(&mut self, product: NewProduct) -> Result<Product>;

    /// Overwrites the available count (catalog stock write).
    async fn set_available(&mut self, product_id: ProductId, available: u32) -> Result<Product>;
}

/// Row-level access to cart holds keyed by (product, session).
#[async_trait]
pub trait CartStore: Send {
    async fn hold(
        &mut self,
        product_id: ProductId,
        session_id: &SessionId,
    ) -> Result<Option<CartHold>>;

    /// Inserts a hold. Fails with `HoldExists` if the pair is already held.
    async fn insert_hold(&mut self, hold: &CartHold) -> Result<()>;

    /// Overwrites a hold's reserved count. Fails with `HoldNotFound` if absent.
    async fn update_hold(
        &mut self,
        product_id: ProductId,
        session_id: &SessionId,
        reserved: u32,
    ) -> Result<()>;

    /// Deletes one hold. Fails with `HoldNotFound` if absent.
    async fn delete_hold(&mut self, product_id: ProductId, session_id: &SessionId) -> Result<()>;

    /// All holds of a session, ordered by product id.
    async fn holds_for_session(&mut self, session_id: &SessionId) -> Result<Vec<CartHold>>;

    /// All holds on a product across sessions.
    async fn holds_for_product(&mut self, product_id: ProductId) -> Result<Vec<CartHold>>;

    /// Deletes every hold of a session and returns how many were removed.
    async fn delete_holds_for_session(&mut self, session_id: &SessionId) -> Result<u64>;
}

/// Row-level access to orders and their lines.
#[async_trait]
pub trait OrderStore: Send {
    /// Inserts an order row; the store assigns the id.
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order>;

    async fn insert_order_line(&mut self, line: &OrderLine) -> Result<()>;

    async fn order(&mut self, order_id: OrderId) -> Result<Option<Order>>;

    async fn order_by_confirmation(
        &mut self,
        confirmation: ConfirmationToken,
    ) -> Result<Option<Order>>;

    /// Orders placed by a member, oldest first.
    async fn orders_for_member(&mut self, member_id: MemberId) -> Result<Vec<Order>>;

    /// Every order, oldest first.
    async fn all_orders(&mut self) -> Result<Vec<Order>>;

    /// Lines of an order in position order.
    async fn lines_for_order(&mut self, order_id: OrderId) -> Result<Vec<OrderLine>>;

    /// Lines committing a given product across all orders.
    async fn lines_for_product(&mut self, product_id: ProductId) -> Result<Vec<OrderLine>>;

    /// Fails with `OrderNotFound` if the order doesn't exist.
    async fn set_order_status(&mut self, order_id: OrderId, status: OrderStatus) -> Result<()>;

    async fn delete_order_lines(&mut self, order_id: OrderId) -> Result<u64>;

    /// Deletes the order row. Its lines must already be gone.
    async fn delete_order(&mut self, order_id: OrderId) -> Result<()>;
}

/// One open transaction spanning all three stores.
///
/// Writes become visible to other transactions only after [`commit`](Self::commit).
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait StoreTransaction: StockLedger + CartStore + OrderStore + Send {
    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// A storage backend able to open transactions.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Storage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

#[async_trait]
impl<T: Storage + ?Sized> Storage for std::sync::Arc<T> {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        (**self).begin().await
    }
}
