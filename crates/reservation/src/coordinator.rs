//! Reservation coordinator: the only writer of stock, holds and orders.
//!
//! Every stock-mutating operation enters the [`CriticalSection`], opens one
//! store transaction, and either commits all of its writes or none of them.
//! Reads open their own transaction and never enter the section.

use std::time::Instant;

use common::{ConfirmationToken, MemberId, OrderId, ProductId, SessionId};
use inventory_store::{
    CartHold, CartStore, NewOrder, NewProduct, Order, OrderLine, OrderStatus, OrderStore,
    Product, StockLedger, Storage, StoreTransaction,
};

use crate::error::{ErrorKind, ReservationError, Result};
use crate::section::{CriticalSection, Finish, TxBody, in_transaction};
use crate::views::{self, Cart, Receipt, StockPosition};

/// Coordinates reservations, checkout and cancellation over a storage backend.
pub struct ReservationCoordinator<S: Storage> {
    storage: S,
    section: CriticalSection,
}

impl<S: Storage> ReservationCoordinator<S> {
    /// Creates a coordinator with its own critical section.
    pub fn new(storage: S) -> Self {
        Self::with_section(storage, CriticalSection::new())
    }

    /// Creates a coordinator that shares `section` with other coordinators.
    pub fn with_section(storage: S, section: CriticalSection) -> Self {
        Self { storage, section }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn section(&self) -> &CriticalSection {
        &self.section
    }

    /// Places a new hold of `count` units for the session.
    ///
    /// Fails with `AlreadyHeld` if the session already holds this product.
    #[tracing::instrument(skip(self))]
    pub async fn reserve(
        &self,
        product_id: ProductId,
        session_id: &SessionId,
        count: u32,
    ) -> Result<CartHold> {
        let session_id = session_id.clone();
        self.serialized("reserve", move |tx| {
            Box::pin(reserve_hold(tx, product_id, session_id, count))
        })
        .await
    }

    /// Sets the session's hold to exactly `count` units.
    ///
    /// A count of zero releases the hold and returns `None`.
    #[tracing::instrument(skip(self))]
    pub async fn adjust(
        &self,
        product_id: ProductId,
        session_id: &SessionId,
        count: u32,
    ) -> Result<Option<CartHold>> {
        if count == 0 {
            return self.release(product_id, session_id).await.map(|_| None);
        }

        let session_id = session_id.clone();
        self.serialized("adjust", move |tx| {
            Box::pin(adjust_hold(tx, product_id, session_id, count))
        })
        .await
        .map(Some)
    }

    /// Drops the session's hold and returns its units to stock.
    #[tracing::instrument(skip(self))]
    pub async fn release(
        &self,
        product_id: ProductId,
        session_id: &SessionId,
    ) -> Result<CartHold> {
        let session_id = session_id.clone();
        self.serialized("release", move |tx| {
            Box::pin(release_hold(tx, product_id, session_id))
        })
        .await
    }

    /// Converts every hold of the session into one order owned by `member_id`.
    #[tracing::instrument(skip(self))]
    pub async fn commit_to_order(
        &self,
        session_id: &SessionId,
        member_id: MemberId,
    ) -> Result<Receipt> {
        let session_id = session_id.clone();
        let receipt = self
            .serialized("commit_to_order", move |tx| {
                Box::pin(place_order(tx, session_id, member_id))
            })
            .await?;

        tracing::info!(
            order_id = %receipt.order_id(),
            total = %receipt.total,
            lines = receipt.lines.len(),
            "Order placed"
        );
        Ok(receipt)
    }

    /// Deletes an order and returns its committed units to stock.
    ///
    /// Returns the receipt as it was just before cancellation.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<Receipt> {
        let receipt = self
            .serialized("cancel_order", move |tx| {
                Box::pin(cancel_placed_order(tx, order_id))
            })
            .await?;

        tracing::info!(order_id = %order_id, "Order cancelled");
        Ok(receipt)
    }

    /// Moves an order from `new` to `paid`.
    #[tracing::instrument(skip(self))]
    pub async fn mark_paid(&self, order_id: OrderId) -> Result<Order> {
        self.serialized("mark_paid", move |tx| Box::pin(pay_order(tx, order_id)))
            .await
    }

    /// Adds a product to the catalog with its initial stock.
    #[tracing::instrument(skip(self))]
    pub async fn add_product(&self, product: NewProduct) -> Result<Product> {
        self.serialized("add_product", move |tx| {
            Box::pin(insert_catalog_product(tx, product))
        })
        .await
    }

    /// Overwrites a product's available count.
    #[tracing::instrument(skip(self))]
    pub async fn set_stock(&self, product_id: ProductId, available: u32) -> Result<Product> {
        self.serialized("set_stock", move |tx| {
            Box::pin(overwrite_stock(tx, product_id, available))
        })
        .await
    }

    pub async fn product(&self, product_id: ProductId) -> Result<Product> {
        self.snapshot(move |tx| Box::pin(views::catalog_product(tx, product_id)))
            .await
    }

    /// The session's holds with current prices.
    pub async fn cart(&self, session_id: &SessionId) -> Result<Cart> {
        let session_id = session_id.clone();
        self.snapshot(move |tx| Box::pin(views::load_cart(tx, session_id)))
            .await
    }

    pub async fn receipt(&self, order_id: OrderId) -> Result<Receipt> {
        self.snapshot(move |tx| Box::pin(views::load_receipt(tx, order_id)))
            .await
    }

    pub async fn receipt_by_confirmation(
        &self,
        confirmation: ConfirmationToken,
    ) -> Result<Receipt> {
        self.snapshot(move |tx| {
            Box::pin(views::load_receipt_by_confirmation(tx, confirmation))
        })
        .await
    }

    /// A member's orders, oldest first. The guest has no order history.
    pub async fn orders_for_member(&self, member_id: MemberId) -> Result<Vec<Receipt>> {
        if member_id.is_guest() {
            return Err(ReservationError::Unauthorized);
        }
        self.snapshot(move |tx| Box::pin(member_receipts(tx, member_id)))
            .await
    }

    /// Every order, oldest first.
    pub async fn all_orders(&self) -> Result<Vec<Receipt>> {
        self.snapshot(|tx| Box::pin(every_receipt(tx))).await
    }

    pub async fn stock_position(&self, product_id: ProductId) -> Result<StockPosition> {
        self.snapshot(move |tx| Box::pin(views::load_stock_position(tx, product_id)))
            .await
    }

    /// Runs a write inside the critical section and one transaction.
    async fn serialized<T, F>(&self, operation: &'static str, body: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t mut dyn StoreTransaction) -> TxBody<'t, T>,
    {
        let started = Instant::now();

        let result = {
            let _section = self.section.enter().await;
            in_transaction(&self.storage, Finish::Commit, body).await
        };

        record_outcome(operation, started, &result);
        result
    }

    async fn snapshot<T, F>(&self, body: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t mut dyn StoreTransaction) -> TxBody<'t, T>,
    {
        in_transaction(&self.storage, Finish::Rollback, body).await
    }
}

fn record_outcome<T>(operation: &'static str, started: Instant, result: &Result<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(err) => err.kind().as_str(),
    };

    metrics::counter!(
        "reservation_operations_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!("reservation_operation_duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(_) => tracing::debug!(operation, "Committed"),
        Err(err) if err.kind() == ErrorKind::StorageFailure => {
            tracing::error!(operation, error = %err, "Storage failure, changes rolled back")
        }
        Err(err) => tracing::debug!(operation, error = %err, "Rejected"),
    }
}

fn require_positive(count: u32) -> Result<u32> {
    if count == 0 {
        return Err(ReservationError::InvalidInput(
            "count must be at least 1".to_string(),
        ));
    }
    Ok(count)
}

/// Available count after `returned` units go back to stock.
///
/// Stock counts are `u32`, so a product stocked near that limit cannot take
/// a hold back without first lowering its stock.
fn restored_count(product_id: ProductId, available: u32, returned: u32) -> Result<u32> {
    available.checked_add(returned).ok_or_else(|| {
        ReservationError::InvalidInput(format!(
            "returning {returned} units to product {product_id} exceeds the stock limit"
        ))
    })
}

async fn reserve_hold(
    tx: &mut dyn StoreTransaction,
    product_id: ProductId,
    session_id: SessionId,
    count: u32,
) -> Result<CartHold> {
    let count = require_positive(count)?;

    let available = tx.available(product_id).await?;
    if available < count {
        return Err(ReservationError::InsufficientStock {
            product_id,
            requested: count,
            ceiling: available,
        });
    }

    let hold = CartHold::new(product_id, session_id, count);
    tx.insert_hold(&hold).await?;
    tx.adjust_available(product_id, -i64::from(count)).await?;
    Ok(hold)
}

async fn adjust_hold(
    tx: &mut dyn StoreTransaction,
    product_id: ProductId,
    session_id: SessionId,
    count: u32,
) -> Result<CartHold> {
    let count = require_positive(count)?;

    let current = tx.hold(product_id, &session_id).await?.ok_or_else(|| {
        ReservationError::HoldNotFound {
            product_id,
            session_id: session_id.clone(),
        }
    })?;

    // The session may grow its hold up to what it holds plus what is left.
    let available = tx.available(product_id).await?;
    let ceiling = restored_count(product_id, available, current.reserved)?;
    if count > ceiling {
        return Err(ReservationError::InsufficientStock {
            product_id,
            requested: count,
            ceiling,
        });
    }

    // Restore the whole hold first, then deduct the new count.
    tx.adjust_available(product_id, i64::from(current.reserved))
        .await?;
    tx.adjust_available(product_id, -i64::from(count)).await?;
    tx.update_hold(product_id, &session_id, count).await?;
    Ok(CartHold::new(product_id, session_id, count))
}

async fn release_hold(
    tx: &mut dyn StoreTransaction,
    product_id: ProductId,
    session_id: SessionId,
) -> Result<CartHold> {
    let hold = tx.hold(product_id, &session_id).await?.ok_or_else(|| {
        ReservationError::HoldNotFound {
            product_id,
            session_id: session_id.clone(),
        }
    })?;

    let available = tx.available(product_id).await?;
    restored_count(product_id, available, hold.reserved)?;

    tx.adjust_available(product_id, i64::from(hold.reserved))
        .await?;
    tx.delete_hold(product_id, &session_id).await?;
    Ok(hold)
}

async fn place_order(
    tx: &mut dyn StoreTransaction,
    session_id: SessionId,
    member_id: MemberId,
) -> Result<Receipt> {
    if member_id.is_guest() {
        return Err(ReservationError::Unauthorized);
    }

    let holds = tx.holds_for_session(&session_id).await?;
    if holds.is_empty() {
        return Err(ReservationError::EmptyCart(session_id));
    }

    let order = tx.insert_order(NewOrder::for_member(member_id)).await?;

    let mut lines = Vec::with_capacity(holds.len());
    for (position, hold) in holds.iter().enumerate() {
        let line = OrderLine {
            order_id: order.id,
            position: position as u32,
            product_id: hold.product_id,
            committed: hold.reserved,
        };
        tx.insert_order_line(&line).await?;
        lines.push(views::receipt_line(tx, &line).await?);
    }

    // Holds become the order's lines; the units never pass back through stock.
    tx.delete_holds_for_session(&session_id).await?;

    let total = views::total_of(lines.iter().map(|line| line.subtotal))?;
    Ok(Receipt {
        order,
        lines,
        total,
    })
}

async fn cancel_placed_order(
    tx: &mut dyn StoreTransaction,
    order_id: OrderId,
) -> Result<Receipt> {
    let receipt = views::load_receipt(tx, order_id).await?;

    for line in &receipt.lines {
        tx.adjust_available(line.product_id, i64::from(line.committed))
            .await?;
    }
    tx.delete_order_lines(order_id).await?;
    tx.delete_order(order_id).await?;

    Ok(receipt)
}

async fn pay_order(tx: &mut dyn StoreTransaction, order_id: OrderId) -> Result<Order> {
    let mut order = tx
        .order(order_id)
        .await?
        .ok_or(ReservationError::OrderNotFound(order_id))?;

    if !order.status.can_transition_to(OrderStatus::Paid) {
        return Err(ReservationError::InvalidStatusTransition {
            order_id,
            from: order.status,
            to: OrderStatus::Paid,
        });
    }

    tx.set_order_status(order_id, OrderStatus::Paid).await?;
    order.status = OrderStatus::Paid;
    Ok(order)
}

async fn insert_catalog_product(
    tx: &mut dyn StoreTransaction,
    product: NewProduct,
) -> Result<Product> {
    if product.name.trim().is_empty() {
        return Err(ReservationError::InvalidInput(
            "product name is required".to_string(),
        ));
    }
    if product.price.is_negative() {
        return Err(ReservationError::InvalidInput(
            "price cannot be negative".to_string(),
        ));
    }
    Ok(tx.insert_product(product).await?)
}

async fn overwrite_stock(
    tx: &mut dyn StoreTransaction,
    product_id: ProductId,
    available: u32,
) -> Result<Product> {
    Ok(tx.set_available(product_id, available).await?)
}

async fn member_receipts(
    tx: &mut dyn StoreTransaction,
    member_id: MemberId,
) -> Result<Vec<Receipt>> {
    let orders = tx.orders_for_member(member_id).await?;
    views::receipts_for(tx, orders).await
}

async fn every_receipt(tx: &mut dyn StoreTransaction) -> Result<Vec<Receipt>> {
    let orders = tx.all_orders().await?;
    views::receipts_for(tx, orders).await
}
