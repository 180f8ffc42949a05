//! Error types for the matching engine
//!
//! Three categories reach callers of the engine: malformed input
//! (`InvalidOrder`), references to things that do not exist (`NotFound`) and
//! store write failures (`PersistenceFailure`). A fourth, `MarketHalted`,
//! marks an instrument whose state can no longer be trusted after a panic
//! inside its transaction. None of them are retried by the engine itself.

use thiserror::Error;

/// Top-level engine error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid order: {0}")]
    InvalidOrder(#[from] OrderError),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] PersistenceError),

    #[error("Market {symbol} is halted")]
    MarketHalted { symbol: String },
}

/// Malformed order input, rejected before any state is touched
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid market: {symbol}")]
    InvalidMarket { symbol: String },

    #[error("Order {order_id} is on the wrong side for this book")]
    WrongSide { order_id: String },

    #[error("Duplicate order: {order_id}")]
    DuplicateOrder { order_id: String },

    #[error("Reduce of {requested} exceeds remaining {remaining} on order {order_id}")]
    Overfill {
        order_id: String,
        requested: String,
        remaining: String,
    },

    #[error("Market {symbol} already has resting orders")]
    MarketNotEmpty { symbol: String },
}

/// Reference to an entity the engine does not hold
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotFoundError {
    #[error("Order not found: {order_id}")]
    Order { order_id: String },

    #[error("Position not found for account {account_id} on {symbol}")]
    Position { account_id: String, symbol: String },

    #[error("Market not found: {symbol}")]
    Market { symbol: String },
}

/// Failures reported by the storage collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistenceError {
    #[error("Write failed for {entity}: {reason}")]
    WriteFailed { entity: String, reason: String },

    #[error("Read failed: {reason}")]
    ReadFailed { reason: String },

    #[error("Persistence channel closed")]
    ChannelClosed,
}
