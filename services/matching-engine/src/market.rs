//! Single-instrument state
//!
//! A [`Market`] owns everything one instrument needs: both sides of the book,
//! the fill sequencer and the position ledger. Each mutating call is one
//! in-memory transaction. It either fails before touching anything or
//! commits and returns the events it produced plus the store writes that
//! mirror it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::errors::{EngineError, NotFoundError, OrderError};
use types::fill::Fill;
use types::ids::{AccountId, MarketId, OrderId};
use types::numeric::{Price, Quantity};
use types::order::{Order, Side};
use types::position::Position;

use crate::book::BookPair;
use crate::events::{EngineEvent, OrderAcceptedEvent, OrderCanceledEvent, OrderRestedEvent, PositionUpdate};
use crate::ledger::PositionLedger;
use crate::matching::{match_order, FillExecutor};
use crate::store::{PersistBatch, PersistCommand};

/// Result of submitting one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub order_id: OrderId,
    /// Fills in execution order
    pub fills: Vec<Fill>,
    /// Set when a remainder of the order rests in the book
    pub resting_order_id: Option<OrderId>,
    /// Everything the submit caused, in causal order
    pub events: Vec<EngineEvent>,
}

impl SubmitResult {
    pub fn filled_quantity(&self) -> Quantity {
        self.fills.iter().map(|f| f.quantity).sum()
    }
}

/// Aggregated depth of one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: MarketId,
    /// Best bid first
    pub bids: Vec<(Price, Quantity)>,
    /// Best ask first
    pub asks: Vec<(Price, Quantity)>,
    /// Sequence the next fill will carry
    pub next_sequence: u64,
}

/// A committed mutation: what callers see, and what the store must replay
#[derive(Debug)]
pub struct Committed<T> {
    pub value: T,
    pub persist: PersistBatch,
}

/// Stored state of one instrument, as read back at cold start
#[derive(Debug, Clone, Default)]
pub struct StoredMarket {
    pub bids: Vec<Order>,
    pub asks: Vec<Order>,
    pub positions: Vec<Position>,
    /// Highest fill sequence already persisted, if any
    pub last_fill_sequence: Option<u64>,
}

/// What a rehydration loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RehydrateSummary {
    pub orders: usize,
    pub positions: usize,
    pub next_sequence: u64,
}

/// Books, sequencer and ledger for one instrument
#[derive(Debug, Clone)]
pub struct Market {
    symbol: MarketId,
    books: BookPair,
    executor: FillExecutor,
    ledger: PositionLedger,
    /// Latest `created_at` handed to an accepted order
    clock: i64,
}

impl Market {
    pub fn new(symbol: MarketId, starting_sequence: u64) -> Self {
        Self {
            books: BookPair::new(),
            executor: FillExecutor::new(starting_sequence),
            ledger: PositionLedger::new(symbol.clone()),
            symbol,
            clock: i64::MIN,
        }
    }

    pub fn symbol(&self) -> &MarketId {
        &self.symbol
    }

    /// Match `order`, apply its fills to the ledger and rest any remainder.
    ///
    /// `created_at` is clamped to the latest accepted time so it never runs
    /// backwards within the instrument.
    pub fn submit(&mut self, mut order: Order) -> Result<Committed<SubmitResult>, EngineError> {
        self.check_symbol(&order)?;
        let timestamp = order.created_at.max(self.clock);
        order.created_at = timestamp;
        order.updated_at = timestamp;
        let accepted = OrderAcceptedEvent {
            order_id: order.order_id,
            account_id: order.account_id,
            symbol: order.symbol.clone(),
            side: order.side,
            price: order.price,
            quantity: order.quantity,
            accepted_at: timestamp,
        };

        let outcome = match_order(&mut self.books, &mut self.executor, order, timestamp)?;
        self.clock = timestamp;

        let mut events = Vec::with_capacity(2 + outcome.fills.len() * 3);
        events.push(EngineEvent::OrderAccepted(accepted));

        let mut touched_accounts: Vec<AccountId> = Vec::new();
        for fill in &outcome.fills {
            events.push(EngineEvent::Fill(fill.clone()));
            for update in self.ledger.apply_fill(fill) {
                if !touched_accounts.contains(&update.account_id) {
                    touched_accounts.push(update.account_id);
                }
                events.push(EngineEvent::PositionUpdated(update));
            }
        }

        let incoming = outcome.incoming;
        if outcome.rested {
            events.push(EngineEvent::OrderRested(OrderRestedEvent {
                order_id: incoming.order_id,
                symbol: incoming.symbol.clone(),
                side: incoming.side,
                price: incoming.price,
                remaining_quantity: incoming.remaining_quantity,
            }));
        }

        let mut persist = Vec::new();
        for resting in outcome.resting_updates {
            persist.push(self.order_write(resting));
        }
        if outcome.rested {
            persist.push(PersistCommand::UpsertOrder(incoming.clone()));
        }
        if !outcome.fills.is_empty() {
            persist.push(PersistCommand::Fills(outcome.fills.clone()));
        }
        for account_id in touched_accounts {
            persist.push(self.position_write(account_id));
        }

        Ok(Committed {
            value: SubmitResult {
                order_id: incoming.order_id,
                fills: outcome.fills,
                resting_order_id: outcome.rested.then_some(incoming.order_id),
                events,
            },
            persist,
        })
    }

    /// Remove a resting order from whichever side holds it
    pub fn cancel(&mut self, order_id: &OrderId, timestamp: i64) -> Result<Committed<OrderCanceledEvent>, EngineError> {
        let side = [Side::BUY, Side::SELL]
            .into_iter()
            .find(|side| self.books.side(*side).get(order_id).is_some())
            .ok_or_else(|| NotFoundError::Order {
                order_id: order_id.to_string(),
            })?;

        let mut order = self.books.own_mut(side).remove(order_id)?;
        order.cancel(timestamp);

        Ok(Committed {
            value: OrderCanceledEvent {
                order_id: order.order_id,
                symbol: self.symbol.clone(),
                filled_quantity: order.filled_quantity,
                unfilled_quantity: order.remaining_quantity,
                canceled_at: timestamp,
            },
            persist: vec![PersistCommand::RemoveOrder {
                symbol: self.symbol.clone(),
                order_id: order.order_id,
            }],
        })
    }

    /// Flatten an account's position at `exit_price`
    pub fn close_position(
        &mut self,
        account_id: AccountId,
        exit_price: Price,
        timestamp: i64,
    ) -> Result<Committed<PositionUpdate>, EngineError> {
        let update = self.ledger.close_position(account_id, exit_price, timestamp)?;
        Ok(Committed {
            value: update,
            persist: vec![PersistCommand::RemovePosition {
                account_id,
                symbol: self.symbol.clone(),
            }],
        })
    }

    /// Load an instrument's stored state into an empty market.
    ///
    /// Orders keep their stored `created_at`, so time priority survives the
    /// reload. Positions come back with their lots, and fill numbering
    /// resumes after the last stored sequence. Nothing is loaded unless
    /// every order and position is acceptable.
    pub fn rehydrate(&mut self, stored: StoredMarket) -> Result<RehydrateSummary, EngineError> {
        if !self.books.is_empty() || !self.ledger.is_empty() {
            return Err(OrderError::MarketNotEmpty {
                symbol: self.symbol.to_string(),
            }
            .into());
        }

        let mut staged = BookPair::new();
        let mut clock = self.clock;
        for order in stored.bids.into_iter().chain(stored.asks) {
            self.check_symbol(&order)?;
            clock = clock.max(order.created_at);
            staged.own_mut(order.side).insert(order)?;
        }

        let positions = self.ledger.restore(stored.positions)?;

        let orders = staged.bids.len() + staged.asks.len();
        self.books = staged;
        self.clock = clock;
        if let Some(last) = stored.last_fill_sequence {
            self.executor.resume_after(last);
        }

        Ok(RehydrateSummary {
            orders,
            positions,
            next_sequence: self.executor.next_sequence(),
        })
    }

    pub fn snapshot(&self, depth: usize) -> OrderBookSnapshot {
        let (bids, asks) = self.books.snapshot(depth);
        OrderBookSnapshot {
            symbol: self.symbol.clone(),
            bids,
            asks,
            next_sequence: self.executor.next_sequence(),
        }
    }

    pub fn best_bid_ask(&self) -> (Option<Price>, Option<Price>) {
        (self.books.bids.best_price(), self.books.asks.best_price())
    }

    pub fn books(&self) -> &BookPair {
        &self.books
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn position(&self, account_id: &AccountId) -> Option<&Position> {
        self.ledger.position(account_id)
    }

    pub fn realized_pnl(&self, account_id: &AccountId) -> Decimal {
        self.ledger.realized_pnl(account_id)
    }

    fn check_symbol(&self, order: &Order) -> Result<(), OrderError> {
        if order.symbol != self.symbol {
            return Err(OrderError::InvalidMarket {
                symbol: order.symbol.to_string(),
            });
        }
        Ok(())
    }

    fn order_write(&self, order: Order) -> PersistCommand {
        if order.is_filled() {
            PersistCommand::RemoveOrder {
                symbol: self.symbol.clone(),
                order_id: order.order_id,
            }
        } else {
            PersistCommand::UpsertOrder(order)
        }
    }

    /// Store write reflecting the account's position after the whole submit
    fn position_write(&self, account_id: AccountId) -> PersistCommand {
        match self.ledger.position(&account_id) {
            Some(position) => PersistCommand::UpsertPosition(position.clone()),
            None => PersistCommand::RemovePosition {
                account_id,
                symbol: self.symbol.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PositionChange;
    use types::order::OrderStatus;

    fn market() -> Market {
        Market::new(MarketId::new("EUR/USD"), 1)
    }

    fn order(account: AccountId, side: Side, price: &str, qty: &str, ts: i64) -> Order {
        Order::new(
            account,
            MarketId::new("EUR/USD"),
            side,
            Price::from_str(price).unwrap(),
            Quantity::from_str(qty).unwrap(),
            ts,
        )
    }

    #[test]
    fn test_submit_event_order() {
        let mut market = market();
        let maker = AccountId::new();
        let taker = AccountId::new();
        market.submit(order(maker, Side::SELL, "1.0010", "2", 1)).unwrap();

        let committed = market.submit(order(taker, Side::BUY, "1.0010", "5", 2)).unwrap();
        let labels: Vec<_> = committed.value.events.iter().map(|e| e.event_type_label()).collect();
        assert_eq!(
            labels,
            vec!["OrderAccepted", "Fill", "PositionUpdated", "PositionUpdated", "OrderRested"]
        );

        match &committed.value.events[2] {
            EngineEvent::PositionUpdated(update) => assert_eq!(update.account_id, maker),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(committed.value.resting_order_id, Some(committed.value.order_id));
        assert_eq!(committed.value.filled_quantity(), Quantity::from_u64(2));
    }

    #[test]
    fn test_submit_persist_batch() {
        let mut market = market();
        let maker = AccountId::new();
        let taker = AccountId::new();
        let partial = order(maker, Side::SELL, "1.0000", "10", 1);
        let partial_id = partial.order_id;
        market.submit(partial).unwrap();

        let committed = market.submit(order(taker, Side::BUY, "1.0000", "4", 2)).unwrap();
        let persist = committed.persist;

        assert!(matches!(
            &persist[0],
            PersistCommand::UpsertOrder(o) if o.order_id == partial_id && o.status == OrderStatus::Partial
        ));
        assert!(matches!(&persist[1], PersistCommand::Fills(fills) if fills.len() == 1));
        assert!(matches!(&persist[2], PersistCommand::UpsertPosition(p) if p.account_id == maker));
        assert!(matches!(&persist[3], PersistCommand::UpsertPosition(p) if p.account_id == taker));
        assert_eq!(persist.len(), 4);
    }

    #[test]
    fn test_filled_resting_order_is_removed_from_store() {
        let mut market = market();
        let maker = order(AccountId::new(), Side::BUY, "1.0000", "3", 1);
        let maker_id = maker.order_id;
        market.submit(maker).unwrap();

        let committed = market
            .submit(order(AccountId::new(), Side::SELL, "1.0000", "3", 2))
            .unwrap();
        assert!(committed.value.resting_order_id.is_none());
        assert!(matches!(
            &committed.persist[0],
            PersistCommand::RemoveOrder { order_id, .. } if *order_id == maker_id
        ));
        assert!(market.books().is_empty());
    }

    #[test]
    fn test_self_match_persists_position_removal() {
        let mut market = market();
        let a = AccountId::new();
        market.submit(order(a, Side::BUY, "1.0000", "1", 1)).unwrap();

        let committed = market.submit(order(a, Side::SELL, "1.0000", "1", 2)).unwrap();
        let removals = committed
            .persist
            .iter()
            .filter(|c| matches!(c, PersistCommand::RemovePosition { .. }))
            .count();
        assert_eq!(removals, 1);
        assert!(market.position(&a).is_none());
    }

    #[test]
    fn test_wrong_symbol_is_rejected() {
        let mut market = market();
        let foreign = Order::new(
            AccountId::new(),
            MarketId::new("BTC/USD"),
            Side::BUY,
            Price::from_u64(1),
            Quantity::from_u64(1),
            1,
        );
        let err = market.submit(foreign).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOrder(OrderError::InvalidMarket { .. })));
        assert!(market.books().is_empty());
    }

    #[test]
    fn test_cancel() {
        let mut market = market();
        let resting = order(AccountId::new(), Side::SELL, "1.0020", "6", 1);
        let id = resting.order_id;
        market.submit(resting).unwrap();

        let committed = market.cancel(&id, 5).unwrap();
        assert_eq!(committed.value.unfilled_quantity, Quantity::from_u64(6));
        assert!(market.books().is_empty());

        let err = market.cancel(&id, 6).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(NotFoundError::Order { .. })));
    }

    #[test]
    fn test_close_position_persists_removal() {
        let mut market = market();
        let a = AccountId::new();
        market.submit(order(a, Side::BUY, "1.0000", "2", 1)).unwrap();
        market.submit(order(AccountId::new(), Side::SELL, "1.0000", "2", 2)).unwrap();

        let committed = market.close_position(a, Price::from_str("1.0100").unwrap(), 3).unwrap();
        assert_eq!(committed.value.change, PositionChange::Closed);
        assert!(matches!(committed.persist[0], PersistCommand::RemovePosition { account_id, .. } if account_id == a));
    }

    #[test]
    fn test_rehydrate_keeps_time_priority() {
        let mut market = market();
        let early = order(AccountId::new(), Side::BUY, "1.0000", "1", 10);
        let late = order(AccountId::new(), Side::BUY, "1.0000", "1", 20);
        let early_id = early.order_id;

        let stored = StoredMarket {
            bids: vec![late, early],
            ..StoredMarket::default()
        };
        let summary = market.rehydrate(stored).unwrap();
        assert_eq!(summary.orders, 2);
        assert_eq!(market.books().bids.peek_best().map(|o| o.order_id), Some(early_id));

        let err = market.rehydrate(StoredMarket::default()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOrder(OrderError::MarketNotEmpty { .. })));
    }

    #[test]
    fn test_rehydrate_resumes_state() {
        let mut live = market();
        let a = AccountId::new();
        let b = AccountId::new();
        live.submit(order(a, Side::BUY, "1.0000", "3", 1)).unwrap();
        live.submit(order(b, Side::SELL, "1.0000", "2", 2)).unwrap();
        let long = live.position(&a).cloned().unwrap();
        let short = live.position(&b).cloned().unwrap();
        let resting = live.books().bids.peek_best().cloned().unwrap();

        let mut restarted = market();
        let summary = restarted
            .rehydrate(StoredMarket {
                bids: vec![resting],
                asks: Vec::new(),
                positions: vec![long, short],
                last_fill_sequence: Some(1),
            })
            .unwrap();
        assert_eq!(summary, RehydrateSummary { orders: 1, positions: 2, next_sequence: 2 });

        // An order stamped before the reloaded one still queues behind it
        let committed = restarted.submit(order(b, Side::SELL, "1.0000", "1", 0)).unwrap();
        assert_eq!(committed.value.fills[0].sequence, 2);
        assert_eq!(committed.value.fills[0].executed_at, 1);
        assert_eq!(restarted.position(&a).map(|p| p.size), Some(Quantity::from_u64(3)));
        assert_eq!(restarted.position(&b).map(|p| p.size), Some(Quantity::from_u64(3)));
    }

    #[test]
    fn test_created_at_never_runs_backwards() {
        let mut market = market();
        let first = order(AccountId::new(), Side::BUY, "1.0000", "1", 10);
        let first_id = first.order_id;
        market.submit(first).unwrap();

        let second = market.submit(order(AccountId::new(), Side::BUY, "1.0000", "1", 5)).unwrap();
        match &second.persist[0] {
            PersistCommand::UpsertOrder(o) => assert_eq!(o.created_at, 10),
            other => panic!("unexpected command {other:?}"),
        }
        let queue: Vec<_> = market.books().bids.top_n(2).iter().map(|o| o.order_id).collect();
        assert_eq!(queue[0], first_id);
        assert_eq!(queue[1], second.value.order_id);
    }

    #[test]
    fn test_rehydrate_is_all_or_nothing() {
        let mut market = market();
        let dup = order(AccountId::new(), Side::SELL, "1.0010", "1", 1);
        let other = order(AccountId::new(), Side::BUY, "1.0000", "1", 2);

        let stored = StoredMarket {
            bids: vec![other],
            asks: vec![dup.clone(), dup],
            ..StoredMarket::default()
        };
        let err = market.rehydrate(stored).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOrder(OrderError::DuplicateOrder { .. })));
        assert!(market.books().is_empty());
    }

    #[test]
    fn test_snapshot() {
        let mut market = market();
        market.submit(order(AccountId::new(), Side::BUY, "0.9990", "2", 1)).unwrap();
        market.submit(order(AccountId::new(), Side::BUY, "0.9990", "3", 2)).unwrap();
        market.submit(order(AccountId::new(), Side::SELL, "1.0010", "1", 3)).unwrap();

        let snapshot = market.snapshot(10);
        assert_eq!(snapshot.bids, vec![(Price::from_str("0.9990").unwrap(), Quantity::from_u64(5))]);
        assert_eq!(snapshot.asks.len(), 1);
        assert_eq!(snapshot.next_sequence, 1);
        assert_eq!(
            market.best_bid_ask(),
            (Price::from_str("0.999").ok(), Price::from_str("1.001").ok())
        );
    }
}
