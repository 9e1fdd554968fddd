//! Read models assembled from the stores.

use common::{ConfirmationToken, Money, OrderId, ProductId, SessionId};
use inventory_store::{
    CartHold, CartStore, Order, OrderLine, OrderStore, Product, StockLedger, StoreTransaction,
};
use serde::Serialize;

use crate::error::{ReservationError, Result};

/// One held product in a session's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Money,
    pub reserved: u32,
    pub subtotal: Money,
}

/// Everything a session currently holds, ordered by product id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cart {
    pub session_id: SessionId,
    pub lines: Vec<CartLine>,
    pub total: Money,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total units held across all lines.
    pub fn unit_count(&self) -> u64 {
        self.lines.iter().map(|line| u64::from(line.reserved)).sum()
    }
}

/// One committed line of a placed order, priced at the current catalog price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptLine {
    pub position: u32,
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Money,
    pub committed: u32,
    pub subtotal: Money,
}

/// A placed order with its lines and total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub order: Order,
    pub lines: Vec<ReceiptLine>,
    pub total: Money,
}

impl Receipt {
    pub fn order_id(&self) -> OrderId {
        self.order.id
    }

    pub fn confirmation(&self) -> ConfirmationToken {
        self.order.confirmation
    }
}

/// Where every unit of a product currently is.
///
/// `available + reserved + committed` stays constant across reserve, adjust,
/// release, checkout and cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StockPosition {
    pub product_id: ProductId,
    pub available: u32,
    pub reserved: u64,
    pub committed: u64,
}

impl StockPosition {
    pub fn total(&self) -> u64 {
        u64::from(self.available) + self.reserved + self.committed
    }
}

/// Price of `count` units of `product`, rejected if it does not fit in [`Money`].
pub(crate) fn line_subtotal(product: &Product, count: u32) -> Result<Money> {
    product.price.checked_times(count).ok_or_else(|| {
        ReservationError::InvalidInput(format!(
            "subtotal of {count} units of product {} overflows",
            product.id
        ))
    })
}

pub(crate) fn total_of(subtotals: impl IntoIterator<Item = Money>) -> Result<Money> {
    Money::checked_sum(subtotals)
        .ok_or_else(|| ReservationError::InvalidInput("total price overflows".to_string()))
}

pub(crate) async fn catalog_product(
    tx: &mut dyn StoreTransaction,
    product_id: ProductId,
) -> Result<Product> {
    tx.product(product_id)
        .await?
        .ok_or(ReservationError::ProductNotFound(product_id))
}

pub(crate) async fn cart_line(tx: &mut dyn StoreTransaction, hold: CartHold) -> Result<CartLine> {
    let product = catalog_product(tx, hold.product_id).await?;
    Ok(CartLine {
        product_id: product.id,
        subtotal: line_subtotal(&product, hold.reserved)?,
        name: product.name,
        unit_price: product.price,
        reserved: hold.reserved,
    })
}

pub(crate) async fn receipt_line(
    tx: &mut dyn StoreTransaction,
    line: &OrderLine,
) -> Result<ReceiptLine> {
    let product = catalog_product(tx, line.product_id).await?;
    Ok(ReceiptLine {
        position: line.position,
        product_id: product.id,
        subtotal: line_subtotal(&product, line.committed)?,
        name: product.name,
        unit_price: product.price,
        committed: line.committed,
    })
}

pub(crate) async fn load_cart(
    tx: &mut dyn StoreTransaction,
    session_id: SessionId,
) -> Result<Cart> {
    let holds = tx.holds_for_session(&session_id).await?;

    let mut lines = Vec::with_capacity(holds.len());
    for hold in holds {
        lines.push(cart_line(tx, hold).await?);
    }
    let total = total_of(lines.iter().map(|line| line.subtotal))?;

    Ok(Cart {
        session_id,
        lines,
        total,
    })
}

pub(crate) async fn receipt_for(tx: &mut dyn StoreTransaction, order: Order) -> Result<Receipt> {
    let stored = tx.lines_for_order(order.id).await?;

    let mut lines = Vec::with_capacity(stored.len());
    for line in &stored {
        lines.push(receipt_line(tx, line).await?);
    }
    let total = total_of(lines.iter().map(|line| line.subtotal))?;

    Ok(Receipt {
        order,
        lines,
        total,
    })
}

pub(crate) async fn load_receipt(
    tx: &mut dyn StoreTransaction,
    order_id: OrderId,
) -> Result<Receipt> {
    let order = tx
        .order(order_id)
        .await?
        .ok_or(ReservationError::OrderNotFound(order_id))?;
    receipt_for(tx, order).await
}

pub(crate) async fn load_receipt_by_confirmation(
    tx: &mut dyn StoreTransaction,
    confirmation: ConfirmationToken,
) -> Result<Receipt> {
    let order = tx
        .order_by_confirmation(confirmation)
        .await?
        .ok_or(ReservationError::ConfirmationNotFound(confirmation))?;
    receipt_for(tx, order).await
}

pub(crate) async fn receipts_for(
    tx: &mut dyn StoreTransaction,
    orders: Vec<Order>,
) -> Result<Vec<Receipt>> {
    let mut receipts = Vec::with_capacity(orders.len());
    for order in orders {
        receipts.push(receipt_for(tx, order).await?);
    }
    Ok(receipts)
}

pub(crate) async fn load_stock_position(
    tx: &mut dyn StoreTransaction,
    product_id: ProductId,
) -> Result<StockPosition> {
    let available = tx.available(product_id).await?;
    let reserved = tx
        .holds_for_product(product_id)
        .await?
        .iter()
        .map(|hold| u64::from(hold.reserved))
        .sum();
    let committed = tx
        .lines_for_product(product_id)
        .await?
        .iter()
        .map(|line| u64::from(line.committed))
        .sum();

    Ok(StockPosition {
        product_id,
        available,
        reserved,
        committed,
    })
}
