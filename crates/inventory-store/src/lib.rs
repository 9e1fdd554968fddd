//! Row-level storage for the reservation engine.
//!
//! Three stores share one transaction seam:
//! - [`StockLedger`] owns each product's available count
//! - [`CartStore`] owns per-session holds
//! - [`OrderStore`] owns placed orders and their lines
//!
//! No business rule lives here. Callers open a [`StoreTransaction`] through a
//! [`Storage`] backend and decide what to read and write inside it.

pub mod config;
pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use common::{ConfirmationToken, MemberId, Money, OrderId, ProductId, SessionId};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use memory::{FailPoint, InMemoryStorage};
pub use model::{CartHold, NewOrder, NewProduct, Order, OrderLine, OrderStatus, Product};
pub use postgres::PgStorage;
pub use store::{CartStore, OrderStore, StockLedger, Storage, StoreTransaction};
