//! Order types
//!
//! An order is immutable apart from its fill progress: `remaining_quantity`
//! only ever decreases, and `filled_quantity + remaining_quantity == quantity`
//! holds after every mutation.

use crate::errors::OrderError;
use crate::ids::{AccountId, MarketId, OrderId};
use crate::numeric::{Price, Quantity, MAX_PRICE, MAX_QUANTITY};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order (bid)
    BUY,
    /// Sell order (ask)
    SELL,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::BUY => Side::SELL,
            Side::SELL => Side::BUY,
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Accepted, nothing executed yet
    Pending,
    /// Some volume executed, remainder live
    Partial,
    /// Completely executed (terminal)
    Filled,
    /// Removed from the book before completion (terminal)
    Canceled,
}

impl OrderStatus {
    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Canceled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub account_id: AccountId,
    pub symbol: MarketId,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub filled_quantity: Quantity,
    pub remaining_quantity: Quantity,
    pub status: OrderStatus,
    pub created_at: i64, // Unix nanos
    pub updated_at: i64, // Unix nanos
}

impl Order {
    /// Create a new pending order without validating it
    pub fn new(
        account_id: AccountId,
        symbol: MarketId,
        side: Side,
        price: Price,
        quantity: Quantity,
        timestamp: i64,
    ) -> Self {
        Self {
            order_id: OrderId::new(),
            account_id,
            symbol,
            side,
            price,
            quantity,
            filled_quantity: Quantity::zero(),
            remaining_quantity: quantity,
            status: OrderStatus::Pending,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Build an order from raw ingress values.
    ///
    /// Rejects non-positive price or volume and malformed symbols.
    pub fn from_intent(
        account_id: AccountId,
        symbol: &str,
        side: Side,
        price: Decimal,
        volume: Decimal,
        timestamp: i64,
    ) -> Result<Self, OrderError> {
        let symbol = MarketId::try_new(symbol).ok_or_else(|| OrderError::InvalidMarket {
            symbol: symbol.to_string(),
        })?;
        let price = validate_price(price)?;
        let quantity = validate_quantity(volume)?;
        Ok(Self::new(account_id, symbol, side, price, quantity, timestamp))
    }

    /// Check the resting-order preconditions: price and remaining volume are
    /// positive, and neither exceeds the order limits
    pub fn validate(&self) -> Result<(), OrderError> {
        if !self.price.is_positive() || self.price.as_decimal() > MAX_PRICE {
            return Err(OrderError::InvalidPrice(self.price.to_string()));
        }
        if !self.remaining_quantity.is_positive() || self.quantity.as_decimal() > MAX_QUANTITY {
            return Err(OrderError::InvalidQuantity(self.remaining_quantity.to_string()));
        }
        Ok(())
    }

    /// Check quantity invariant: filled + remaining = total
    pub fn check_invariant(&self) -> bool {
        self.filled_quantity.as_decimal() + self.remaining_quantity.as_decimal()
            == self.quantity.as_decimal()
    }

    pub fn is_filled(&self) -> bool {
        self.remaining_quantity.is_zero()
    }

    pub fn has_fills(&self) -> bool {
        !self.filled_quantity.is_zero()
    }

    /// Record an execution of `fill_quantity` against this order
    pub fn add_fill(&mut self, fill_quantity: Quantity, timestamp: i64) -> Result<(), OrderError> {
        let remaining = self
            .remaining_quantity
            .checked_sub(fill_quantity)
            .ok_or_else(|| OrderError::Overfill {
                order_id: self.order_id.to_string(),
                requested: fill_quantity.to_string(),
                remaining: self.remaining_quantity.to_string(),
            })?;

        self.remaining_quantity = remaining;
        self.filled_quantity = self.filled_quantity + fill_quantity;
        self.status = if self.is_filled() {
            OrderStatus::Filled
        } else if self.has_fills() {
            OrderStatus::Partial
        } else {
            self.status
        };
        self.updated_at = timestamp;

        debug_assert!(self.check_invariant(), "Invariant violated after fill");
        Ok(())
    }

    /// Mark the order as canceled; a terminal order keeps its status
    pub fn cancel(&mut self, timestamp: i64) {
        if !self.status.is_terminal() {
            self.status = OrderStatus::Canceled;
            self.updated_at = timestamp;
        }
    }
}

/// Validate a raw ingress price
pub fn validate_price(price: Decimal) -> Result<Price, OrderError> {
    if price <= Decimal::ZERO || price > MAX_PRICE {
        return Err(OrderError::InvalidPrice(price.to_string()));
    }
    Price::try_new(price).map_err(|e| OrderError::InvalidPrice(e.to_string()))
}

/// Validate a raw ingress volume
pub fn validate_quantity(volume: Decimal) -> Result<Quantity, OrderError> {
    if volume <= Decimal::ZERO || volume > MAX_QUANTITY {
        return Err(OrderError::InvalidQuantity(volume.to_string()));
    }
    Quantity::try_new(volume).map_err(|e| OrderError::InvalidQuantity(e.to_string()))
}
