use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    CartHold, ConfirmationToken, MemberId, NewOrder, NewProduct, Order, OrderId, OrderLine,
    OrderStatus, Product, ProductId, Result, SessionId, StoreError,
    store::{CartStore, OrderStore, StockLedger, Storage, StoreTransaction},
};

/// Points at which [`InMemoryStorage`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Begin,
    Commit,
    AdjustAvailable,
    UpdateHold,
    /// Deleting a single hold.
    DeleteHold,
    /// Deleting every hold of a session.
    DeleteHolds,
    InsertOrderLine,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    products: BTreeMap<ProductId, Product>,
    holds: BTreeMap<(ProductId, SessionId), u32>,
    orders: BTreeMap<OrderId, Order>,
    lines: BTreeMap<OrderId, Vec<OrderLine>>,
    last_product_id: i64,
    last_order_id: i64,
}

type Faults = Arc<StdMutex<HashSet<FailPoint>>>;

/// In-memory storage backend for testing.
///
/// A transaction holds the table lock from `begin` until it ends and works on a
/// private copy of the tables, so transactions are fully serializable and
/// uncommitted writes are never observed.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    tables: Arc<Mutex<Tables>>,
    faults: Faults,
}

impl InMemoryStorage {
    /// Creates a new empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent pass through `point` fail until cleared.
    pub fn fail_at(&self, point: FailPoint) {
        lock_faults(&self.faults).insert(point);
    }

    pub fn clear_failures(&self) {
        lock_faults(&self.faults).clear();
    }

    /// Returns the committed state of a product.
    pub async fn product(&self, product_id: ProductId) -> Option<Product> {
        self.tables.lock().await.products.get(&product_id).cloned()
    }

    /// Returns the number of committed cart holds.
    pub async fn hold_count(&self) -> usize {
        self.tables.lock().await.holds.len()
    }

    /// Returns the number of committed orders.
    pub async fn order_count(&self) -> usize {
        self.tables.lock().await.orders.len()
    }
}

fn lock_faults(faults: &Faults) -> std::sync::MutexGuard<'_, HashSet<FailPoint>> {
    faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn trip(faults: &Faults, point: FailPoint) -> Result<()> {
    if lock_faults(faults).contains(&point) {
        return Err(StoreError::Unavailable(format!(
            "injected failure at {point:?}"
        )));
    }
    Ok(())
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        trip(&self.faults, FailPoint::Begin)?;

        let committed = self.tables.clone().lock_owned().await;
        let working = committed.clone();

        Ok(Box::new(InMemoryTransaction {
            committed,
            working,
            faults: self.faults.clone(),
            open: true,
        }))
    }
}

struct InMemoryTransaction {
    committed: OwnedMutexGuard<Tables>,
    working: Tables,
    faults: Faults,
    open: bool,
}

impl InMemoryTransaction {
    fn tables(&mut self) -> Result<&mut Tables> {
        if !self.open {
            return Err(StoreError::Unavailable(
                "transaction already finished".to_string(),
            ));
        }
        Ok(&mut self.working)
    }

    fn trip(&self, point: FailPoint) -> Result<()> {
        trip(&self.faults, point)
    }
}

#[async_trait]
impl StockLedger for InMemoryTransaction {
    async fn product(&mut self, product_id: ProductId) -> Result<Option<Product>> {
        Ok(self.tables()?.products.get(&product_id).cloned())
    }

    async fn available(&mut self, product_id: ProductId) -> Result<u32> {
        self.tables()?
            .products
            .get(&product_id)
            .map(|p| p.available)
            .ok_or(StoreError::ProductNotFound(product_id))
    }

    async fn adjust_available(&mut self, product_id: ProductId, delta: i64) -> Result<u32> {
        self.trip(FailPoint::AdjustAvailable)?;

        let product = self
            .tables()?
            .products
            .get_mut(&product_id)
            .ok_or(StoreError::ProductNotFound(product_id))?;

        let next = i64::from(product.available) + delta;
        let next = u32::try_from(next).map_err(|_| {
            StoreError::Constraint(format!(
                "available count of product {product_id} would become {next}"
            ))
        })?;

        product.available = next;
        Ok(next)
    }

    async fn insert_product(&mut self, product: NewProduct) -> Result<Product> {
        let tables = self.tables()?;
        tables.last_product_id += 1;
        let id = ProductId::new(tables.last_product_id);

        let product = Product {
            id,
            name: product.name,
            price: product.price,
            available: product.available,
        };
        tables.products.insert(id, product.clone());
        Ok(product)
    }

    async fn set_available(&mut self, product_id: ProductId, available: u32) -> Result<Product> {
        let product = self
            .tables()?
            .products
            .get_mut(&product_id)
            .ok_or(StoreError::ProductNotFound(product_id))?;
        product.available = available;
        Ok(product.clone())
    }
}

#[async_trait]
impl CartStore for InMemoryTransaction {
    async fn hold(
        &mut self,
        product_id: ProductId,
        session_id: &SessionId,
    ) -> Result<Option<CartHold>> {
        Ok(self
            .tables()?
            .holds
            .get(&(product_id, session_id.clone()))
            .map(|&reserved| CartHold::new(product_id, session_id.clone(), reserved)))
    }

    async fn insert_hold(&mut self, hold: &CartHold) -> Result<()> {
        if hold.reserved == 0 {
            return Err(StoreError::Constraint(
                "a hold must reserve at least one unit".to_string(),
            ));
        }

        let tables = self.tables()?;
        if !tables.products.contains_key(&hold.product_id) {
            return Err(StoreError::ProductNotFound(hold.product_id));
        }

        let key = (hold.product_id, hold.session_id.clone());
        if tables.holds.contains_key(&key) {
            return Err(StoreError::HoldExists {
                product_id: hold.product_id,
                session_id: hold.session_id.clone(),
            });
        }

        tables.holds.insert(key, hold.reserved);
        Ok(())
    }

    async fn update_hold(
        &mut self,
        product_id: ProductId,
        session_id: &SessionId,
        reserved: u32,
    ) -> Result<()> {
        self.trip(FailPoint::UpdateHold)?;
        if reserved == 0 {
            return Err(StoreError::Constraint(
                "a hold must reserve at least one unit".to_string(),
            ));
        }

        match self
            .tables()?
            .holds
            .get_mut(&(product_id, session_id.clone()))
        {
            Some(current) => {
                *current = reserved;
                Ok(())
            }
            None => Err(StoreError::HoldNotFound {
                product_id,
                session_id: session_id.clone(),
            }),
        }
    }

    async fn delete_hold(&mut self, product_id: ProductId, session_id: &SessionId) -> Result<()> {
        self.trip(FailPoint::DeleteHold)?;

        self.tables()?
            .holds
            .remove(&(product_id, session_id.clone()))
            .map(|_| ())
            .ok_or_else(|| StoreError::HoldNotFound {
                product_id,
                session_id: session_id.clone(),
            })
    }

    async fn holds_for_session(&mut self, session_id: &SessionId) -> Result<Vec<CartHold>> {
        Ok(self
            .tables()?
            .holds
            .iter()
            .filter(|((_, s), _)| s == session_id)
            .map(|((p, s), &reserved)| CartHold::new(*p, s.clone(), reserved))
            .collect())
    }

    async fn holds_for_product(&mut self, product_id: ProductId) -> Result<Vec<CartHold>> {
        Ok(self
            .tables()?
            .holds
            .iter()
            .filter(|((p, _), _)| *p == product_id)
            .map(|((p, s), &reserved)| CartHold::new(*p, s.clone(), reserved))
            .collect())
    }

    async fn delete_holds_for_session(&mut self, session_id: &SessionId) -> Result<u64> {
        self.trip(FailPoint::DeleteHolds)?;

        let holds = &mut self.tables()?.holds;
        let before = holds.len();
        holds.retain(|(_, s), _| s != session_id);
        Ok((before - holds.len()) as u64)
    }
}

#[async_trait]
impl OrderStore for InMemoryTransaction {
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        let tables = self.tables()?;
        tables.last_order_id += 1;
        let order = order.with_id(OrderId::new(tables.last_order_id));
        tables.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn insert_order_line(&mut self, line: &OrderLine) -> Result<()> {
        self.trip(FailPoint::InsertOrderLine)?;

        if line.committed == 0 {
            return Err(StoreError::Constraint(
                "an order line must commit at least one unit".to_string(),
            ));
        }

        let tables = self.tables()?;
        if !tables.orders.contains_key(&line.order_id) {
            return Err(StoreError::OrderNotFound(line.order_id));
        }
        if !tables.products.contains_key(&line.product_id) {
            return Err(StoreError::ProductNotFound(line.product_id));
        }

        let lines = tables.lines.entry(line.order_id).or_default();
        if lines.iter().any(|l| l.position == line.position) {
            return Err(StoreError::Constraint(format!(
                "order {} already has a line at position {}",
                line.order_id, line.position
            )));
        }
        lines.push(line.clone());
        lines.sort_by_key(|l| l.position);
        Ok(())
    }

    async fn order(&mut self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables()?.orders.get(&order_id).cloned())
    }

    async fn order_by_confirmation(
        &mut self,
        confirmation: ConfirmationToken,
    ) -> Result<Option<Order>> {
        Ok(self
            .tables()?
            .orders
            .values()
            .find(|o| o.confirmation == confirmation)
            .cloned())
    }

    async fn orders_for_member(&mut self, member_id: MemberId) -> Result<Vec<Order>> {
        Ok(self
            .tables()?
            .orders
            .values()
            .filter(|o| o.member_id == member_id)
            .cloned()
            .collect())
    }

    async fn all_orders(&mut self) -> Result<Vec<Order>> {
        Ok(self.tables()?.orders.values().cloned().collect())
    }

    async fn lines_for_order(&mut self, order_id: OrderId) -> Result<Vec<OrderLine>> {
        Ok(self
            .tables()?
            .lines
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn lines_for_product(&mut self, product_id: ProductId) -> Result<Vec<OrderLine>> {
        Ok(self
            .tables()?
            .lines
            .values()
            .flatten()
            .filter(|l| l.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn set_order_status(&mut self, order_id: OrderId, status: OrderStatus) -> Result<()> {
        let order = self
            .tables()?
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        order.status = status;
        Ok(())
    }

    async fn delete_order_lines(&mut self, order_id: OrderId) -> Result<u64> {
        Ok(self
            .tables()?
            .lines
            .remove(&order_id)
            .map(|lines| lines.len() as u64)
            .unwrap_or(0))
    }

    async fn delete_order(&mut self, order_id: OrderId) -> Result<()> {
        let tables = self.tables()?;
        if tables.lines.get(&order_id).is_some_and(|l| !l.is_empty()) {
            return Err(StoreError::Constraint(format!(
                "order {order_id} still has lines"
            )));
        }
        tables
            .orders
            .remove(&order_id)
            .map(|_| ())
            .ok_or(StoreError::OrderNotFound(order_id))
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn commit(&mut self) -> Result<()> {
        self.tables()?;
        self.open = false;
        self.trip(FailPoint::Commit)?;

        *self.committed = std::mem::take(&mut self.working);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.tables()?;
        self.open = false;
        self.working = Tables::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Money;

    async fn seeded(available: u32) -> (InMemoryStorage, ProductId) {
        let storage = InMemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();
        let product = tx
            .insert_product(NewProduct::new(
                "Widget",
                Money::from_minor_units(1000),
                available,
            ))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        (storage, product.id)
    }

    #[tokio::test]
    async fn test_writes_are_visible_after_commit() {
        let (storage, id) = seeded(10).await;

        let mut tx = storage.begin().await.unwrap();
        assert_eq!(tx.adjust_available(id, -4).await.unwrap(), 6);
        tx.commit().await.unwrap();
        drop(tx);

        assert_eq!(storage.product(id).await.unwrap().available, 6);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let (storage, id) = seeded(10).await;

        let mut tx = storage.begin().await.unwrap();
        tx.adjust_available(id, -4).await.unwrap();
        tx.insert_hold(&CartHold::new(id, SessionId::new("s1"), 4))
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        drop(tx);

        assert_eq!(storage.product(id).await.unwrap().available, 10);
        assert_eq!(storage.hold_count().await, 0);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let (storage, id) = seeded(10).await;

        {
            let mut tx = storage.begin().await.unwrap();
            tx.adjust_available(id, -10).await.unwrap();
        }

        assert_eq!(storage.product(id).await.unwrap().available, 10);
    }

    #[tokio::test]
    async fn test_available_cannot_go_negative() {
        let (storage, id) = seeded(2).await;

        let mut tx = storage.begin().await.unwrap();
        let result = tx.adjust_available(id, -3).await;
        assert!(matches!(result, Err(StoreError::Constraint(_))));
        assert_eq!(tx.available(id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unknown_product_is_reported() {
        let storage = InMemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();

        let missing = ProductId::new(99);
        assert!(matches!(
            tx.available(missing).await,
            Err(StoreError::ProductNotFound(id)) if id == missing
        ));
        assert!(matches!(
            tx.adjust_available(missing, 1).await,
            Err(StoreError::ProductNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_hold_key_is_unique() {
        let (storage, id) = seeded(10).await;
        let session = SessionId::new("s1");

        let mut tx = storage.begin().await.unwrap();
        tx.insert_hold(&CartHold::new(id, session.clone(), 1))
            .await
            .unwrap();
        let duplicate = tx.insert_hold(&CartHold::new(id, session.clone(), 2)).await;

        assert!(matches!(duplicate, Err(StoreError::HoldExists { .. })));
        assert_eq!(tx.hold(id, &session).await.unwrap().unwrap().reserved, 1);
    }

    #[tokio::test]
    async fn test_empty_holds_are_refused() {
        let (storage, id) = seeded(10).await;
        let session = SessionId::new("s1");

        let mut tx = storage.begin().await.unwrap();
        assert!(matches!(
            tx.insert_hold(&CartHold::new(id, session.clone(), 0)).await,
            Err(StoreError::Constraint(_))
        ));

        tx.insert_hold(&CartHold::new(id, session.clone(), 3))
            .await
            .unwrap();
        assert!(matches!(
            tx.update_hold(id, &session, 0).await,
            Err(StoreError::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn test_holds_are_listed_per_session() {
        let (storage, id) = seeded(10).await;

        let mut tx = storage.begin().await.unwrap();
        let second = tx
            .insert_product(NewProduct::new("Gadget", Money::from_minor_units(5), 5))
            .await
            .unwrap();
        tx.insert_hold(&CartHold::new(second.id, "s1".into(), 1))
            .await
            .unwrap();
        tx.insert_hold(&CartHold::new(id, "s1".into(), 2))
            .await
            .unwrap();
        tx.insert_hold(&CartHold::new(id, "s2".into(), 3))
            .await
            .unwrap();

        let s1 = tx.holds_for_session(&"s1".into()).await.unwrap();
        assert_eq!(s1.len(), 2);
        assert_eq!(s1[0].product_id, id);

        let on_product = tx.holds_for_product(id).await.unwrap();
        assert_eq!(on_product.iter().map(|h| h.reserved).sum::<u32>(), 5);

        assert_eq!(tx.delete_holds_for_session(&"s1".into()).await.unwrap(), 2);
        assert!(tx.holds_for_session(&"s1".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_order_lines_keep_their_positions() {
        let (storage, id) = seeded(10).await;

        let mut tx = storage.begin().await.unwrap();
        let order = tx
            .insert_order(NewOrder::for_member(MemberId::new(1)))
            .await
            .unwrap();
        for position in [1, 0] {
            tx.insert_order_line(&OrderLine {
                order_id: order.id,
                position,
                product_id: id,
                committed: 2,
            })
            .await
            .unwrap();
        }

        let lines = tx.lines_for_order(order.id).await.unwrap();
        assert_eq!(
            lines.iter().map(|l| l.position).collect::<Vec<_>>(),
            vec![0, 1]
        );

        assert!(matches!(
            tx.delete_order(order.id).await,
            Err(StoreError::Constraint(_))
        ));
        assert_eq!(tx.delete_order_lines(order.id).await.unwrap(), 2);
        tx.delete_order(order.id).await.unwrap();
        assert!(tx.order(order.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_commit_failure_keeps_previous_state() {
        let (storage, id) = seeded(10).await;
        storage.fail_at(FailPoint::Commit);

        let mut tx = storage.begin().await.unwrap();
        tx.adjust_available(id, -1).await.unwrap();
        assert!(matches!(
            tx.commit().await,
            Err(StoreError::Unavailable(_))
        ));
        drop(tx);

        storage.clear_failures();
        assert_eq!(storage.product(id).await.unwrap().available, 10);
    }

    #[tokio::test]
    async fn test_single_hold_writes_can_be_failed() {
        let (storage, id) = seeded(10).await;
        let session = SessionId::new("s1");

        let mut tx = storage.begin().await.unwrap();
        tx.insert_hold(&CartHold::new(id, session.clone(), 2))
            .await
            .unwrap();

        storage.fail_at(FailPoint::UpdateHold);
        assert!(matches!(
            tx.update_hold(id, &session, 3).await,
            Err(StoreError::Unavailable(_))
        ));
        storage.fail_at(FailPoint::DeleteHold);
        assert!(matches!(
            tx.delete_hold(id, &session).await,
            Err(StoreError::Unavailable(_))
        ));

        storage.clear_failures();
        assert_eq!(tx.hold(id, &session).await.unwrap().unwrap().reserved, 2);
        tx.delete_hold(id, &session).await.unwrap();
    }

    #[tokio::test]
    async fn test_finished_transaction_refuses_work() {
        let (storage, id) = seeded(10).await;

        let mut tx = storage.begin().await.unwrap();
        tx.rollback().await.unwrap();
        assert!(matches!(
            tx.available(id).await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
