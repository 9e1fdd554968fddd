//! Shared value types for the inventory reservation engine.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{ConfirmationToken, MemberId, OrderId, ProductId, SessionId};
