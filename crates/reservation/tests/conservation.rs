//! Property tests: stock is conserved across any sequence of coordinator calls.

use inventory_store::InMemoryStorage;
use proptest::prelude::*;
use reservation::{
    ErrorKind, MemberId, Money, NewProduct, OrderId, ProductId, ReservationCoordinator, SessionId,
};

const PRODUCTS: usize = 2;
const SESSIONS: usize = 3;
const INITIAL_STOCK: u32 = 8;

#[derive(Debug, Clone)]
enum Call {
    Reserve { product: usize, session: usize, count: u32 },
    Adjust { product: usize, session: usize, count: u32 },
    Release { product: usize, session: usize },
    Checkout { session: usize, member: i64 },
    Cancel { order: usize },
}

fn call() -> impl Strategy<Value = Call> {
    prop_oneof![
        (0..PRODUCTS, 0..SESSIONS, 0u32..6).prop_map(|(product, session, count)| {
            Call::Reserve {
                product,
                session,
                count,
            }
        }),
        (0..PRODUCTS, 0..SESSIONS, 0u32..10).prop_map(|(product, session, count)| {
            Call::Adjust {
                product,
                session,
                count,
            }
        }),
        (0..PRODUCTS, 0..SESSIONS).prop_map(|(product, session)| Call::Release { product, session }),
        (0..SESSIONS, 0i64..3).prop_map(|(session, member)| Call::Checkout { session, member }),
        (0usize..4).prop_map(|order| Call::Cancel { order }),
    ]
}

fn session(index: usize) -> SessionId {
    SessionId::new(format!("session-{index}"))
}

async fn run_calls(calls: Vec<Call>) -> Result<(), TestCaseError> {
    let coordinator = ReservationCoordinator::new(InMemoryStorage::new());

    let mut products: Vec<ProductId> = Vec::new();
    for index in 0..PRODUCTS {
        let product = coordinator
            .add_product(NewProduct::new(
                format!("Product {index}"),
                Money::from_minor_units(100),
                INITIAL_STOCK,
            ))
            .await
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        products.push(product.id);
    }

    let mut orders: Vec<OrderId> = Vec::new();

    for call in calls {
        let outcome = match &call {
            Call::Reserve {
                product,
                session: s,
                count,
            } => coordinator
                .reserve(products[*product], &session(*s), *count)
                .await
                .map(|_| ()),
            Call::Adjust {
                product,
                session: s,
                count,
            } => coordinator
                .adjust(products[*product], &session(*s), *count)
                .await
                .map(|_| ()),
            Call::Release {
                product,
                session: s,
            } => coordinator
                .release(products[*product], &session(*s))
                .await
                .map(|_| ()),
            Call::Checkout { session: s, member } => coordinator
                .commit_to_order(&session(*s), MemberId::new(*member))
                .await
                .map(|receipt| orders.push(receipt.order_id())),
            Call::Cancel { order } if *order < orders.len() => {
                let order_id = orders.remove(*order);
                coordinator.cancel_order(order_id).await.map(|_| ())
            }
            Call::Cancel { .. } => Ok(()),
        };

        if let Err(err) = &outcome {
            prop_assert!(
                err.kind() != ErrorKind::StorageFailure,
                "{call:?} failed in storage: {err}"
            );
        }

        for product_id in &products {
            let position = coordinator
                .stock_position(*product_id)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(
                position.total(),
                u64::from(INITIAL_STOCK),
                "after {:?}: {:?}",
                call,
                position
            );
        }
    }

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    /// Property: available + reserved + committed never changes without a catalog write.
    #[test]
    fn stock_is_conserved(calls in prop::collection::vec(call(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_calls(calls))?;
    }
}
