//! Reservation error types.

use common::{ConfirmationToken, OrderId, ProductId, SessionId};
use inventory_store::{OrderStatus, StoreError};
use thiserror::Error;

/// Errors returned by coordinator operations.
///
/// Every error leaves the stores exactly as they were before the operation.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// A count or catalog field was malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The session holds nothing on this product.
    #[error("No hold on product {product_id} for session {session_id}")]
    HoldNotFound {
        product_id: ProductId,
        session_id: SessionId,
    },

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("No order with confirmation {0}")]
    ConfirmationNotFound(ConfirmationToken),

    /// Reserve was called for a pair that already holds stock; use adjust.
    #[error("Product {product_id} is already held by session {session_id}")]
    AlreadyHeld {
        product_id: ProductId,
        session_id: SessionId,
    },

    #[error("Invalid status transition for order {order_id}: {from} -> {to}")]
    InvalidStatusTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// `ceiling` is the most the caller could have asked for.
    #[error("Insufficient stock for product {product_id}: requested {requested}, max {ceiling}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        ceiling: u32,
    },

    #[error("Cart of session {0} is empty")]
    EmptyCart(SessionId),

    /// Checkout and order history need a logged-in member.
    #[error("A logged-in member is required")]
    Unauthorized,

    /// The store failed mid-operation; all writes were rolled back.
    #[error("Storage failure: {0}")]
    Storage(StoreError),
}

/// Coarse classification of [`ReservationError`], for callers mapping errors to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    InsufficientStock,
    EmptyCart,
    Unauthorized,
    StorageFailure,
}

impl ErrorKind {
    /// Label used for the `outcome` metric dimension.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InsufficientStock => "insufficient_stock",
            ErrorKind::EmptyCart => "empty_cart",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::StorageFailure => "storage_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ReservationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReservationError::InvalidInput(_) => ErrorKind::InvalidInput,
            ReservationError::ProductNotFound(_)
            | ReservationError::HoldNotFound { .. }
            | ReservationError::OrderNotFound(_)
            | ReservationError::ConfirmationNotFound(_) => ErrorKind::NotFound,
            ReservationError::AlreadyHeld { .. }
            | ReservationError::InvalidStatusTransition { .. } => ErrorKind::Conflict,
            ReservationError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            ReservationError::EmptyCart(_) => ErrorKind::EmptyCart,
            ReservationError::Unauthorized => ErrorKind::Unauthorized,
            ReservationError::Storage(_) => ErrorKind::StorageFailure,
        }
    }

    /// Returns true if the caller can fix the request and retry.
    pub fn is_client_error(&self) -> bool {
        !matches!(self.kind(), ErrorKind::StorageFailure)
    }
}

impl From<StoreError> for ReservationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ProductNotFound(id) => ReservationError::ProductNotFound(id),
            StoreError::HoldNotFound {
                product_id,
                session_id,
            } => ReservationError::HoldNotFound {
                product_id,
                session_id,
            },
            StoreError::HoldExists {
                product_id,
                session_id,
            } => ReservationError::AlreadyHeld {
                product_id,
                session_id,
            },
            StoreError::OrderNotFound(id) => ReservationError::OrderNotFound(id),
            other => ReservationError::Storage(other),
        }
    }
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, ReservationError>;
