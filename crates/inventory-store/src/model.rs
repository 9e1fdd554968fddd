//! Rows held by the stock ledger, cart store and order store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConfirmationToken, MemberId, Money, OrderId, ProductId, SessionId};

/// A catalog product and its available stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Unit price.
    pub price: Money,
    /// Units not held by any cart nor committed to any order.
    pub available: u32,
}

/// Catalog fields for a product that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub name: String,
    pub price: Money,
    pub available: u32,
}

impl NewProduct {
    pub fn new(name: impl Into<String>, price: Money, available: u32) -> Self {
        Self {
            name: name.into(),
            price,
            available,
        }
    }
}

/// A provisional reservation of one product for one session.
///
/// `reserved` is always positive; a hold that would drop to zero is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartHold {
    pub product_id: ProductId,
    pub session_id: SessionId,
    pub reserved: u32,
}

impl CartHold {
    pub fn new(product_id: ProductId, session_id: SessionId, reserved: u32) -> Self {
        Self {
            product_id,
            session_id,
            reserved,
        }
    }
}

/// Payment status of a placed order.
///
/// ```text
/// New ──► Paid
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Placed, awaiting payment.
    #[default]
    New,

    /// Payment received (terminal).
    Paid,
}

impl OrderStatus {
    /// Returns true if an order may move from `self` to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!((self, next), (OrderStatus::New, OrderStatus::Paid))
    }

    /// Returns the status as stored in the `orders.status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::Paid => "paid",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "new" => Ok(OrderStatus::New),
            "paid" => Ok(OrderStatus::Paid),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}

/// A placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub created_at: DateTime<Utc>,
    pub member_id: MemberId,
    pub status: OrderStatus,
    pub confirmation: ConfirmationToken,
}

/// Order fields before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub created_at: DateTime<Utc>,
    pub member_id: MemberId,
    pub status: OrderStatus,
    pub confirmation: ConfirmationToken,
}

impl NewOrder {
    /// A fresh `new` order for `member_id`, stamped now with a random token.
    pub fn for_member(member_id: MemberId) -> Self {
        Self {
            created_at: Utc::now(),
            member_id,
            status: OrderStatus::New,
            confirmation: ConfirmationToken::new(),
        }
    }

    pub(crate) fn with_id(self, id: OrderId) -> Order {
        Order {
            id,
            created_at: self.created_at,
            member_id: self.member_id,
            status: self.status,
            confirmation: self.confirmation,
        }
    }
}

/// Units of one product committed to an order. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub order_id: OrderId,
    /// Zero-based position of the line within its order.
    pub position: u32,
    pub product_id: ProductId,
    pub committed: u32,
}
