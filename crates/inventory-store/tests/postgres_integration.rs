//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p inventory-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use inventory_store::{
    CartHold, CartStore, MemberId, Money, NewOrder, NewProduct, OrderLine, OrderStatus,
    OrderStore, PgStorage, ProductId, SessionId, StockLedger, Storage, StoreConfig, StoreError,
    StoreTransaction,
};
use serial_test::serial;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let pool = sqlx::PgPool::connect(&connection_string).await.unwrap();
            PgStorage::new(pool.clone()).run_migrations().await.unwrap();
            pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh storage with its own pool and cleared tables
async fn get_test_storage() -> PgStorage {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE order_lines, orders, cart_holds, products RESTART IDENTITY")
        .execute(&pool)
        .await
        .unwrap();

    PgStorage::new(pool)
}

fn widget(available: u32) -> NewProduct {
    NewProduct::new("Widget", Money::from_minor_units(1250), available)
}

#[tokio::test]
#[serial]
async fn connect_from_config() {
    let info = get_container_info().await;
    let config = StoreConfig {
        database_url: info.connection_string.clone(),
        max_connections: 2,
        ..StoreConfig::from_env()
    };

    let storage = PgStorage::connect(&config).await.unwrap();
    assert_eq!(storage.pool().options().get_max_connections(), 2);

    let mut tx = storage.begin().await.unwrap();
    assert!(matches!(
        tx.available(ProductId::new(1_000_000)).await,
        Err(StoreError::ProductNotFound(_))
    ));
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[serial]
async fn product_round_trip_and_adjust() {
    let storage = get_test_storage().await;

    let mut tx = storage.begin().await.unwrap();
    let product = tx.insert_product(widget(10)).await.unwrap();
    assert_eq!(tx.adjust_available(product.id, -3).await.unwrap(), 7);
    tx.commit().await.unwrap();

    let mut tx = storage.begin().await.unwrap();
    let loaded = tx.product(product.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "Widget");
    assert_eq!(loaded.price, Money::from_minor_units(1250));
    assert_eq!(loaded.available, 7);
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[serial]
async fn negative_stock_violates_check_constraint() {
    let storage = get_test_storage().await;

    let mut tx = storage.begin().await.unwrap();
    let product = tx.insert_product(widget(2)).await.unwrap();
    let result = tx.adjust_available(product.id, -5).await;
    assert!(matches!(result, Err(StoreError::Constraint(_))));
}

#[tokio::test]
#[serial]
async fn rollback_discards_hold_and_stock_writes() {
    let storage = get_test_storage().await;

    let mut tx = storage.begin().await.unwrap();
    let product = tx.insert_product(widget(10)).await.unwrap();
    tx.commit().await.unwrap();

    let session = SessionId::new("sess-a");
    let mut tx = storage.begin().await.unwrap();
    tx.adjust_available(product.id, -4).await.unwrap();
    tx.insert_hold(&CartHold::new(product.id, session.clone(), 4))
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    let mut tx = storage.begin().await.unwrap();
    assert_eq!(tx.available(product.id).await.unwrap(), 10);
    assert!(tx.hold(product.id, &session).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn duplicate_hold_is_reported() {
    let storage = get_test_storage().await;
    let session = SessionId::new("sess-a");

    let mut tx = storage.begin().await.unwrap();
    let product = tx.insert_product(widget(10)).await.unwrap();
    tx.insert_hold(&CartHold::new(product.id, session.clone(), 1))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = storage.begin().await.unwrap();
    let result = tx
        .insert_hold(&CartHold::new(product.id, session.clone(), 2))
        .await;
    assert!(matches!(result, Err(StoreError::HoldExists { .. })));
}

#[tokio::test]
#[serial]
async fn hold_updates_and_deletes() {
    let storage = get_test_storage().await;
    let session = SessionId::new("sess-a");

    let mut tx = storage.begin().await.unwrap();
    let product = tx.insert_product(widget(10)).await.unwrap();
    tx.insert_hold(&CartHold::new(product.id, session.clone(), 1))
        .await
        .unwrap();
    tx.update_hold(product.id, &session, 6).await.unwrap();
    assert_eq!(
        tx.hold(product.id, &session).await.unwrap().unwrap().reserved,
        6
    );

    tx.delete_hold(product.id, &session).await.unwrap();
    assert!(matches!(
        tx.delete_hold(product.id, &session).await,
        Err(StoreError::HoldNotFound { .. })
    ));
    assert!(matches!(
        tx.update_hold(product.id, &session, 2).await,
        Err(StoreError::HoldNotFound { .. })
    ));
}

#[tokio::test]
#[serial]
async fn order_with_lines_round_trip() {
    let storage = get_test_storage().await;
    let member = MemberId::new(11);

    let mut tx = storage.begin().await.unwrap();
    let product = tx.insert_product(widget(10)).await.unwrap();
    let order = tx.insert_order(NewOrder::for_member(member)).await.unwrap();
    tx.insert_order_line(&OrderLine {
        order_id: order.id,
        position: 0,
        product_id: product.id,
        committed: 3,
    })
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let mut tx = storage.begin().await.unwrap();
    let loaded = tx.order(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, OrderStatus::New);
    assert_eq!(loaded.member_id, member);
    assert_eq!(loaded.confirmation, order.confirmation);

    let by_token = tx
        .order_by_confirmation(order.confirmation)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_token.id, order.id);

    let lines = tx.lines_for_order(order.id).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].committed, 3);
    assert_eq!(tx.lines_for_product(product.id).await.unwrap().len(), 1);

    tx.set_order_status(order.id, OrderStatus::Paid)
        .await
        .unwrap();
    assert_eq!(
        tx.orders_for_member(member).await.unwrap()[0].status,
        OrderStatus::Paid
    );
}

#[tokio::test]
#[serial]
async fn order_cannot_be_deleted_before_its_lines() {
    let storage = get_test_storage().await;

    let mut tx = storage.begin().await.unwrap();
    let product = tx.insert_product(widget(10)).await.unwrap();
    let order = tx
        .insert_order(NewOrder::for_member(MemberId::new(1)))
        .await
        .unwrap();
    tx.insert_order_line(&OrderLine {
        order_id: order.id,
        position: 0,
        product_id: product.id,
        committed: 1,
    })
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let mut tx = storage.begin().await.unwrap();
    assert!(matches!(
        tx.delete_order(order.id).await,
        Err(StoreError::Constraint(_))
    ));
    tx.rollback().await.unwrap();

    let mut tx = storage.begin().await.unwrap();
    assert_eq!(tx.delete_order_lines(order.id).await.unwrap(), 1);
    tx.delete_order(order.id).await.unwrap();
    tx.commit().await.unwrap();
}
