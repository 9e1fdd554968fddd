use thiserror::Error;

use crate::{OrderId, ProductId, SessionId};

/// Errors that can occur when reading or writing the stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No product row exists with this id.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// No cart hold exists for this (product, session) pair.
    #[error("No hold on product {product_id} for session {session_id}")]
    HoldNotFound {
        product_id: ProductId,
        session_id: SessionId,
    },

    /// A cart hold already exists for this (product, session) pair.
    #[error("Hold on product {product_id} already exists for session {session_id}")]
    HoldExists {
        product_id: ProductId,
        session_id: SessionId,
    },

    /// No order row exists with this id.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// A row would break a storage-level constraint (negative stock, empty hold, ...).
    #[error("Constraint violated: {0}")]
    Constraint(String),

    /// The backend refused the operation (closed transaction, injected fault, ...).
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
