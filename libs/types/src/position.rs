//! Position tracking types
//!
//! A position is a FIFO queue of open lots on one side of one instrument.
//! Invariant: `size == sum(lots.quantity)`, and a position with zero size
//! does not exist.

use crate::ids::{AccountId, MarketId};
use crate::numeric::{Price, Quantity};
use crate::order::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Position side enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    /// Long position - profit when price increases
    LONG,
    /// Short position - profit when price decreases
    SHORT,
}

impl PositionSide {
    /// BUY executions build LONG exposure, SELL executions build SHORT
    pub fn from_fill_side(side: Side) -> Self {
        match side {
            Side::BUY => PositionSide::LONG,
            Side::SELL => PositionSide::SHORT,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            PositionSide::LONG => PositionSide::SHORT,
            PositionSide::SHORT => PositionSide::LONG,
        }
    }

    /// PnL of `quantity` entered at `entry` and exited at `exit`.
    ///
    /// Saturates instead of panicking; within the order limits it is exact.
    pub fn pnl(&self, entry: Price, exit: Price, quantity: Quantity) -> Decimal {
        let qty = quantity.as_decimal();
        // Both prices are non-negative, so the difference cannot overflow
        match self {
            // LONG: (exit - entry) × qty
            PositionSide::LONG => (exit.as_decimal() - entry.as_decimal()).saturating_mul(qty),
            // SHORT: (entry - exit) × qty
            PositionSide::SHORT => (entry.as_decimal() - exit.as_decimal()).saturating_mul(qty),
        }
    }
}

/// One open entry slice of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub price: Price,
    pub quantity: Quantity,
}

impl Lot {
    pub fn new(price: Price, quantity: Quantity) -> Self {
        Self { price, quantity }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: Uuid,
    pub account_id: AccountId,
    pub symbol: MarketId,
    pub side: PositionSide,
    pub size: Quantity,
    /// Open lots, oldest first
    pub lots: VecDeque<Lot>,
    pub realized_pnl: Decimal,
    pub opened_at: i64,
    pub updated_at: i64,
    pub version: u64,
}

impl Position {
    /// Open a position with a single lot
    pub fn open(
        account_id: AccountId,
        symbol: MarketId,
        side: PositionSide,
        lot: Lot,
        timestamp: i64,
    ) -> Self {
        Self {
            position_id: Uuid::now_v7(),
            account_id,
            symbol,
            side,
            size: lot.quantity,
            lots: VecDeque::from([lot]),
            realized_pnl: Decimal::ZERO,
            opened_at: timestamp,
            updated_at: timestamp,
            version: 0,
        }
    }

    /// Sum of open lot quantities
    pub fn lot_total(&self) -> Quantity {
        self.lots.iter().map(|lot| lot.quantity).sum()
    }

    /// Check size invariant: size == sum(lots) and no empty lots
    pub fn check_invariant(&self) -> bool {
        self.size == self.lot_total() && self.lots.iter().all(|lot| lot.quantity.is_positive())
    }

    pub fn is_closed(&self) -> bool {
        self.size.is_zero()
    }

    /// Volume-weighted average entry price of the open lots
    pub fn entry_price(&self) -> Option<Price> {
        if self.size.is_zero() {
            return None;
        }
        let cost = self.lots.iter().try_fold(Decimal::ZERO, |acc, lot| {
            acc.checked_add(lot.price.as_decimal().checked_mul(lot.quantity.as_decimal())?)
        })?;
        Price::try_new(cost.checked_div(self.size.as_decimal())?).ok()
    }

    /// Mark-to-market PnL of the open lots
    pub fn unrealized_pnl(&self, mark_price: Price) -> Decimal {
        self.lots
            .iter()
            .map(|lot| self.side.pnl(lot.price, mark_price, lot.quantity))
            .fold(Decimal::ZERO, Decimal::saturating_add)
    }
}
