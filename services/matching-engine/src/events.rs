//! Event structures for matching engine
//!
//! Events are emitted in causal order: the order is accepted, each fill is
//! followed by the position updates it caused (resting trader, then
//! incoming trader), and a remainder, if any, rests last.

use serde::{Deserialize, Serialize};
use types::errors::PersistenceError;
use types::fill::Fill;
use types::ids::{AccountId, MarketId, OrderId};
use types::numeric::{Price, Quantity};
use types::order::Side;

pub use crate::ledger::{PositionChange, PositionUpdate};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEvent {
    OrderAccepted(OrderAcceptedEvent),
    Fill(Fill),
    PositionUpdated(PositionUpdate),
    OrderRested(OrderRestedEvent),
    OrderCanceled(OrderCanceledEvent),
    PersistenceFailed(PersistenceFailedEvent),
}

impl EngineEvent {
    pub fn event_type_label(&self) -> &'static str {
        match self {
            EngineEvent::OrderAccepted(_) => "OrderAccepted",
            EngineEvent::Fill(_) => "Fill",
            EngineEvent::PositionUpdated(_) => "PositionUpdated",
            EngineEvent::OrderRested(_) => "OrderRested",
            EngineEvent::OrderCanceled(_) => "OrderCanceled",
            EngineEvent::PersistenceFailed(_) => "PersistenceFailed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAcceptedEvent {
    pub order_id: OrderId,
    pub account_id: AccountId,
    pub symbol: MarketId,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub accepted_at: i64,
}

/// Remainder of an incoming order placed on the book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRestedEvent {
    pub order_id: OrderId,
    pub symbol: MarketId,
    pub side: Side,
    pub price: Price,
    pub remaining_quantity: Quantity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCanceledEvent {
    pub order_id: OrderId,
    pub symbol: MarketId,
    pub filled_quantity: Quantity,
    pub unfilled_quantity: Quantity,
    pub canceled_at: i64,
}

/// A store write failed after the in-memory state had committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceFailedEvent {
    pub operation: String,
    pub reason: String,
}

impl PersistenceFailedEvent {
    pub fn new(operation: &str, error: &PersistenceError) -> Self {
        Self {
            operation: operation.to_string(),
            reason: error.to_string(),
        }
    }
}
