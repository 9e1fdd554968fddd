//! Inventory reservation and checkout.
//!
//! [`ReservationCoordinator`] is the single writer of stock, cart holds and
//! orders. Each of its mutating operations runs inside a process-wide
//! [`CriticalSection`] and one store transaction, so for every product
//!
//! ```text
//! available + Σ reserved (holds) + Σ committed (order lines)
//! ```
//!
//! only changes through catalog writes.

pub mod coordinator;
pub mod error;
pub mod input;
pub mod section;
pub mod views;

pub use common::{ConfirmationToken, MemberId, Money, OrderId, ProductId, SessionId};
pub use coordinator::ReservationCoordinator;
pub use error::{ErrorKind, ReservationError, Result};
pub use input::{parse_adjust_count, parse_count};
pub use inventory_store::{CartHold, NewProduct, Order, OrderStatus, Product};
pub use section::{CriticalSection, SectionGuard};
pub use views::{Cart, CartLine, Receipt, ReceiptLine, StockPosition};
