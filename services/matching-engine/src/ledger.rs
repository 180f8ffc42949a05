//! Position ledger with FIFO lot accounting
//!
//! Each fill touches two traders: the resting side and the incoming side.
//! For each of them an execution either opens/extends a position (same
//! direction) or closes lots oldest-first (opposite direction), realizing
//! PnL per consumed slice. Volume left over after every lot is consumed
//! flips the trader into a fresh position on the other side.
//!
//! Every loop here terminates because each iteration either shrinks the
//! remaining execution volume or pops a lot.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use types::errors::{EngineError, NotFoundError, OrderError, PersistenceError};
use types::fill::Fill;
use types::ids::{AccountId, MarketId};
use types::numeric::{Price, Quantity};
use types::order::Side;
use types::position::{Lot, Position, PositionSide};

/// What an execution did to a trader's position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionChange {
    Opened,
    Increased,
    Reduced,
    Closed,
    Flipped,
}

/// Position state after one ledger mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub account_id: AccountId,
    pub symbol: MarketId,
    pub change: PositionChange,
    /// Side held after the update; for `Closed`, the side that was closed
    pub side: PositionSide,
    pub size: Quantity,
    pub lots: Vec<Lot>,
    /// PnL realized by this mutation alone
    pub realized_pnl_delta: Decimal,
    /// Cumulative realized PnL of the position
    pub realized_pnl: Decimal,
    /// Sequence of the fill that caused the update, if any
    pub fill_sequence: Option<u64>,
    pub updated_at: i64,
}

impl PositionUpdate {
    fn from_position(
        position: &Position,
        change: PositionChange,
        realized_pnl_delta: Decimal,
        fill_sequence: Option<u64>,
    ) -> Self {
        Self {
            account_id: position.account_id,
            symbol: position.symbol.clone(),
            change,
            side: position.side,
            size: position.size,
            lots: position.lots.iter().copied().collect(),
            realized_pnl_delta,
            realized_pnl: position.realized_pnl,
            fill_sequence,
            updated_at: position.updated_at,
        }
    }
}

/// One execution from a single trader's point of view
#[derive(Debug, Clone, Copy)]
pub struct Execution {
    pub account_id: AccountId,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub timestamp: i64,
    pub fill_sequence: Option<u64>,
}

/// Positions for every trader on one instrument
#[derive(Debug, Clone)]
pub struct PositionLedger {
    symbol: MarketId,
    positions: HashMap<AccountId, Position>,
    /// Realized PnL per account, kept after positions close
    lifetime_realized: HashMap<AccountId, Decimal>,
}

impl PositionLedger {
    pub fn new(symbol: MarketId) -> Self {
        Self {
            symbol,
            positions: HashMap::new(),
            lifetime_realized: HashMap::new(),
        }
    }

    /// Apply both legs of a fill: resting trader first, then incoming
    pub fn apply_fill(&mut self, fill: &Fill) -> [PositionUpdate; 2] {
        let resting = self.apply_execution(Execution {
            account_id: fill.resting_account_id,
            side: fill.resting_side(),
            price: fill.price,
            quantity: fill.quantity,
            timestamp: fill.executed_at,
            fill_sequence: Some(fill.sequence),
        });
        let incoming = self.apply_execution(Execution {
            account_id: fill.incoming_account_id,
            side: fill.side,
            price: fill.price,
            quantity: fill.quantity,
            timestamp: fill.executed_at,
            fill_sequence: Some(fill.sequence),
        });
        [resting, incoming]
    }

    /// Apply one execution to one trader's position
    pub fn apply_execution(&mut self, execution: Execution) -> PositionUpdate {
        let direction = PositionSide::from_fill_side(execution.side);
        let lot = Lot::new(execution.price, execution.quantity);

        let (position, update) = match self.positions.remove(&execution.account_id) {
            None => {
                let position = Position::open(
                    execution.account_id,
                    self.symbol.clone(),
                    direction,
                    lot,
                    execution.timestamp,
                );
                let update = PositionUpdate::from_position(
                    &position,
                    PositionChange::Opened,
                    Decimal::ZERO,
                    execution.fill_sequence,
                );
                (Some(position), update)
            }
            Some(mut position) if position.side == direction => {
                position.lots.push_back(lot);
                position.size = position.size + execution.quantity;
                touch(&mut position, execution.timestamp);
                let update = PositionUpdate::from_position(
                    &position,
                    PositionChange::Increased,
                    Decimal::ZERO,
                    execution.fill_sequence,
                );
                (Some(position), update)
            }
            Some(position) => self.close_lots(position, execution),
        };

        if let Some(position) = position {
            debug_assert!(position.check_invariant(), "lot sum diverged from size");
            self.positions.insert(execution.account_id, position);
        }

        debug!(
            symbol = %self.symbol,
            account = %update.account_id,
            change = ?update.change,
            size = %update.size,
            realized = %update.realized_pnl_delta,
            "Position updated"
        );
        update
    }

    /// Close every open lot of `account_id` at `exit_price`
    pub fn close_position(
        &mut self,
        account_id: AccountId,
        exit_price: Price,
        timestamp: i64,
    ) -> Result<PositionUpdate, EngineError> {
        if !exit_price.is_positive() {
            return Err(OrderError::InvalidPrice(exit_price.to_string()).into());
        }
        let position = self.positions.remove(&account_id).ok_or_else(|| NotFoundError::Position {
            account_id: account_id.to_string(),
            symbol: self.symbol.to_string(),
        })?;

        let execution = Execution {
            account_id,
            side: match position.side {
                PositionSide::LONG => Side::SELL,
                PositionSide::SHORT => Side::BUY,
            },
            price: exit_price,
            quantity: position.size,
            timestamp,
            fill_sequence: None,
        };
        let (remaining, update) = self.close_lots(position, execution);
        debug_assert!(remaining.is_none(), "full close left a position behind");
        Ok(update)
    }

    /// Consume lots FIFO against an opposite-direction execution
    fn close_lots(&mut self, mut position: Position, execution: Execution) -> (Option<Position>, PositionUpdate) {
        let (realized, excess) = consume_fifo(&mut position, execution.price, execution.quantity);
        position.realized_pnl = position.realized_pnl.saturating_add(realized);
        let lifetime = self.lifetime_realized.entry(execution.account_id).or_insert(Decimal::ZERO);
        *lifetime = lifetime.saturating_add(realized);
        touch(&mut position, execution.timestamp);

        if excess.is_positive() {
            let mut flipped = Position::open(
                execution.account_id,
                self.symbol.clone(),
                position.side.opposite(),
                Lot::new(execution.price, excess),
                execution.timestamp,
            );
            flipped.realized_pnl = position.realized_pnl;
            let update = PositionUpdate::from_position(
                &flipped,
                PositionChange::Flipped,
                realized,
                execution.fill_sequence,
            );
            (Some(flipped), update)
        } else if position.lots.is_empty() {
            let update = PositionUpdate::from_position(
                &position,
                PositionChange::Closed,
                realized,
                execution.fill_sequence,
            );
            (None, update)
        } else {
            let update = PositionUpdate::from_position(
                &position,
                PositionChange::Reduced,
                realized,
                execution.fill_sequence,
            );
            (Some(position), update)
        }
    }

    /// Load open positions read back from the store into an empty ledger.
    ///
    /// Each position's realized PnL seeds the account's lifetime total. All
    /// positions are checked before any is loaded.
    pub fn restore(&mut self, positions: Vec<Position>) -> Result<usize, EngineError> {
        if !self.positions.is_empty() {
            return Err(OrderError::MarketNotEmpty {
                symbol: self.symbol.to_string(),
            }
            .into());
        }

        let mut restored = HashMap::with_capacity(positions.len());
        for position in positions {
            if position.symbol != self.symbol || !position.check_invariant() || position.is_closed() {
                return Err(corrupt(&position, "not an open position on this instrument"));
            }
            if restored.contains_key(&position.account_id) {
                return Err(corrupt(&position, "duplicate account"));
            }
            restored.insert(position.account_id, position);
        }

        for position in restored.values() {
            let lifetime = self.lifetime_realized.entry(position.account_id).or_insert(Decimal::ZERO);
            *lifetime = lifetime.saturating_add(position.realized_pnl);
        }
        let count = restored.len();
        self.positions = restored;
        Ok(count)
    }

    pub fn position(&self, account_id: &AccountId) -> Option<&Position> {
        self.positions.get(account_id)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Realized PnL across every position the account has held here
    pub fn realized_pnl(&self, account_id: &AccountId) -> Decimal {
        self.lifetime_realized.get(account_id).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

fn corrupt(position: &Position, reason: &str) -> EngineError {
    PersistenceError::ReadFailed {
        reason: format!("stored position {} for {}: {}", position.position_id, position.account_id, reason),
    }
    .into()
}

/// Pop lots oldest-first until `quantity` is consumed or no lots remain.
///
/// Returns (realized PnL, unconsumed quantity). Leaves `position.size`
/// equal to the sum of the remaining lots.
fn consume_fifo(position: &mut Position, exit_price: Price, mut quantity: Quantity) -> (Decimal, Quantity) {
    let side = position.side;
    let mut realized = Decimal::ZERO;

    while quantity.is_positive() {
        let Some(lot) = position.lots.front_mut() else {
            break;
        };
        let consumed = lot.quantity.min(quantity);
        realized = realized.saturating_add(side.pnl(lot.price, exit_price, consumed));
        lot.quantity = lot.quantity - consumed;
        quantity = quantity - consumed;
        if lot.quantity.is_zero() {
            position.lots.pop_front();
        }
    }

    position.size = position.lot_total();
    (realized, quantity)
}

fn touch(position: &mut Position, timestamp: i64) {
    position.updated_at = timestamp;
    position.version += 1;
}
