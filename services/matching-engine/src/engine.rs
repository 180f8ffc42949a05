//! Matching engine facade
//!
//! Routes requests to per-instrument [`Market`]s. Each market sits behind its
//! own mutex, held for the whole match and ledger update, so one instrument
//! has a single writer while different instruments proceed in parallel.
//! Store writes and event broadcasts are queued while the lock is still held,
//! which keeps them in commit order per instrument.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use types::errors::{EngineError, NotFoundError, OrderError, PersistenceError};
use types::ids::{AccountId, MarketId, OrderId};
use types::numeric::Price;
use types::order::{validate_price, Order, Side};
use types::position::Position;

use crate::config::EngineConfig;
use crate::events::{EngineEvent, OrderCanceledEvent, PersistenceFailedEvent, PositionUpdate};
use crate::market::{Committed, Market, OrderBookSnapshot, RehydrateSummary, StoredMarket, SubmitResult};
use crate::store::{OrderStore, PersistBatch, PersistenceStats, PersistenceWriter};

/// Multi-instrument matching engine
pub struct MatchingEngine {
    markets: DashMap<MarketId, Arc<Mutex<Market>>>,
    config: EngineConfig,
    events: broadcast::Sender<EngineEvent>,
    persist_tx: Option<mpsc::UnboundedSender<PersistBatch>>,
    store: Option<Arc<dyn OrderStore>>,
    stats: Arc<PersistenceStats>,
}

impl MatchingEngine {
    /// Engine without a store; nothing is persisted
    pub fn new(config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        info!(
            starting_sequence = config.starting_sequence,
            persistence = false,
            "Matching engine initialized"
        );
        Self {
            markets: DashMap::new(),
            config,
            events,
            persist_tx: None,
            store: None,
            stats: Arc::new(PersistenceStats::default()),
        }
    }

    /// Engine backed by `store`.
    ///
    /// The returned writer must be driven by the caller, typically with
    /// `tokio::spawn(writer.run())`.
    pub fn with_store(config: EngineConfig, store: Arc<dyn OrderStore>) -> (Self, PersistenceWriter) {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(PersistenceStats::default());
        let writer = PersistenceWriter::new(store.clone(), persist_rx, events.clone(), stats.clone());
        info!(
            starting_sequence = config.starting_sequence,
            persistence = config.persistence_enabled,
            "Matching engine initialized"
        );
        let engine = Self {
            markets: DashMap::new(),
            config,
            events,
            persist_tx: Some(persist_tx),
            store: Some(store),
            stats,
        };
        (engine, writer)
    }

    /// Submit a limit order stamped with the current time
    pub fn submit_order(
        &self,
        account_id: AccountId,
        symbol: &str,
        side: Side,
        price: Decimal,
        volume: Decimal,
    ) -> Result<SubmitResult, EngineError> {
        self.submit(account_id, symbol, side, price, volume, None)
    }

    /// Submit a limit order with an explicit creation time (Unix nanos).
    ///
    /// A time earlier than the instrument's latest accepted order is raised
    /// to it.
    pub fn submit_order_at(
        &self,
        account_id: AccountId,
        symbol: &str,
        side: Side,
        price: Decimal,
        volume: Decimal,
        timestamp: i64,
    ) -> Result<SubmitResult, EngineError> {
        self.submit(account_id, symbol, side, price, volume, Some(timestamp))
    }

    fn submit(
        &self,
        account_id: AccountId,
        symbol: &str,
        side: Side,
        price: Decimal,
        volume: Decimal,
        timestamp: Option<i64>,
    ) -> Result<SubmitResult, EngineError> {
        let mut order = Order::from_intent(account_id, symbol, side, price, volume, timestamp.unwrap_or_default())
            .map_err(|e| {
                warn!(account = %account_id, symbol, error = %e, "Order rejected");
                e
            })?;

        let market = self.market_or_create(&order.symbol);
        let mut market = lock(&market)?;
        // Stamp under the lock so arrival order and time order agree
        if timestamp.is_none() {
            order.created_at = now_nanos();
            order.updated_at = order.created_at;
        }
        let Committed { value, persist } = market.submit(order)?;

        self.dispatch(persist);
        for event in &value.events {
            self.broadcast(event.clone());
        }
        Ok(value)
    }

    /// Cancel a resting order
    pub fn cancel_order(&self, symbol: &str, order_id: &OrderId) -> Result<OrderCanceledEvent, EngineError> {
        let symbol = parse_symbol(symbol)?;
        let market = self.market(&symbol)?;
        let mut market = lock(&market)?;
        let Committed { value, persist } = market.cancel(order_id, now_nanos())?;

        info!(
            symbol = %symbol,
            order_id = %order_id,
            unfilled = %value.unfilled_quantity,
            "Order canceled"
        );
        self.dispatch(persist);
        self.broadcast(EngineEvent::OrderCanceled(value.clone()));
        Ok(value)
    }

    /// Flatten an account's position at `exit_price`
    pub fn close_position(
        &self,
        account_id: AccountId,
        symbol: &str,
        exit_price: Decimal,
    ) -> Result<PositionUpdate, EngineError> {
        let symbol = parse_symbol(symbol)?;
        let exit_price: Price = validate_price(exit_price)?;
        let market = self.market(&symbol)?;
        let mut market = lock(&market)?;
        let Committed { value, persist } = market.close_position(account_id, exit_price, now_nanos())?;

        info!(
            symbol = %symbol,
            account = %account_id,
            realized = %value.realized_pnl_delta,
            "Position closed"
        );
        self.dispatch(persist);
        self.broadcast(EngineEvent::PositionUpdated(value.clone()));
        Ok(value)
    }

    /// Open position of `account_id` on `symbol`, if any
    pub fn get_position(&self, account_id: &AccountId, symbol: &str) -> Option<Position> {
        let market = self.existing(symbol)?;
        let market = lock(&market).ok()?;
        market.position(account_id).cloned()
    }

    /// Realized PnL of `account_id` on `symbol`, including closed positions
    pub fn realized_pnl(&self, account_id: &AccountId, symbol: &str) -> Decimal {
        let Some(market) = self.existing(symbol) else {
            return Decimal::ZERO;
        };
        let Ok(market) = lock(&market) else {
            return Decimal::ZERO;
        };
        market.realized_pnl(account_id)
    }

    pub fn order_book(&self, symbol: &str, depth: usize) -> Option<OrderBookSnapshot> {
        let market = self.existing(symbol)?;
        let market = lock(&market).ok()?;
        Some(market.snapshot(depth))
    }

    /// Best bid and best ask; both None for an unknown instrument
    pub fn best_bid_ask(&self, symbol: &str) -> (Option<Price>, Option<Price>) {
        let Some(market) = self.existing(symbol) else {
            return (None, None);
        };
        let Ok(market) = lock(&market) else {
            return (None, None);
        };
        market.best_bid_ask()
    }

    /// The first `n` resting orders on one side, in matching priority
    pub fn top_of_book(&self, symbol: &str, side: Side, n: usize) -> Vec<Order> {
        let Some(market) = self.existing(symbol) else {
            return Vec::new();
        };
        let Ok(market) = lock(&market) else {
            return Vec::new();
        };
        market.books().side(side).top_n(n)
    }

    /// Load an instrument's stored state into an empty market: the top
    /// `depth` resting orders per side, every open position, and the fill
    /// sequence to continue from.
    pub async fn rehydrate(&self, symbol: &str, depth: usize) -> Result<RehydrateSummary, EngineError> {
        let symbol = parse_symbol(symbol)?;
        let store = self.store.clone().ok_or_else(|| PersistenceError::ReadFailed {
            reason: "no store configured".to_string(),
        })?;

        if let Some(market) = self.markets.get(&symbol).map(|m| m.value().clone()) {
            let market = lock(&market)?;
            if !market.books().is_empty() || !market.ledger().is_empty() {
                return Err(OrderError::MarketNotEmpty {
                    symbol: symbol.to_string(),
                }
                .into());
            }
        }

        // Read before taking the lock; the guard is never held across an await
        let stored = StoredMarket {
            bids: store.query_top_of_book(&symbol, Side::BUY, depth).await?,
            asks: store.query_top_of_book(&symbol, Side::SELL, depth).await?,
            positions: store.query_positions(&symbol).await?,
            last_fill_sequence: store.last_fill_sequence(&symbol).await?,
        };

        let market = self.market_or_create(&symbol);
        let summary = lock(&market)?.rehydrate(stored)?;
        info!(
            symbol = %symbol,
            depth,
            orders = summary.orders,
            positions = summary.positions,
            next_sequence = summary.next_sequence,
            "Market rehydrated"
        );
        Ok(summary)
    }

    /// Rehydrate using the configured depth
    pub async fn rehydrate_default(&self, symbol: &str) -> Result<RehydrateSummary, EngineError> {
        self.rehydrate(symbol, self.config.rehydrate_depth).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Instruments that have a book, in no particular order
    pub fn markets(&self) -> Vec<MarketId> {
        self.markets.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn persistence_stats(&self) -> Arc<PersistenceStats> {
        self.stats.clone()
    }

    fn market_or_create(&self, symbol: &MarketId) -> Arc<Mutex<Market>> {
        self.markets
            .entry(symbol.clone())
            .or_insert_with(|| {
                info!(symbol = %symbol, "Order book created");
                Arc::new(Mutex::new(Market::new(symbol.clone(), self.config.starting_sequence)))
            })
            .value()
            .clone()
    }

    fn market(&self, symbol: &MarketId) -> Result<Arc<Mutex<Market>>, NotFoundError> {
        self.markets
            .get(symbol)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| NotFoundError::Market {
                symbol: symbol.to_string(),
            })
    }

    fn existing(&self, symbol: &str) -> Option<Arc<Mutex<Market>>> {
        let symbol = MarketId::try_new(symbol)?;
        self.markets.get(&symbol).map(|entry| entry.value().clone())
    }

    fn dispatch(&self, batch: PersistBatch) {
        if batch.is_empty() || !self.config.persistence_enabled {
            return;
        }
        let Some(tx) = &self.persist_tx else {
            return;
        };
        if let Err(mpsc::error::SendError(batch)) = tx.send(batch) {
            let e = PersistenceError::ChannelClosed;
            for command in &batch {
                self.stats.record_failure();
                error!(operation = command.operation(), error = %e, "Persistence write dropped");
                self.broadcast(EngineEvent::PersistenceFailed(PersistenceFailedEvent::new(command.operation(), &e)));
            }
        }
    }

    fn broadcast(&self, event: EngineEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Lock an instrument. A poisoned lock means a transaction panicked part way
/// through, so the instrument is refused from then on.
fn lock(market: &Mutex<Market>) -> Result<MutexGuard<'_, Market>, EngineError> {
    market.lock().map_err(|poisoned| {
        let symbol = poisoned.get_ref().symbol().to_string();
        error!(symbol = %symbol, "Market halted: its lock was poisoned");
        EngineError::MarketHalted { symbol }
    })
}

fn parse_symbol(symbol: &str) -> Result<MarketId, OrderError> {
    MarketId::try_new(symbol).ok_or_else(|| OrderError::InvalidMarket {
        symbol: symbol.to_string(),
    })
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}
