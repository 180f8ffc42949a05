//! Storage collaborator interface and the asynchronous persistence writer
//!
//! The engine never writes to storage on the matching path. After a match
//! and its ledger updates commit in memory, the resulting writes are queued
//! as one batch per transaction and drained by [`PersistenceWriter`] on its
//! own task. Write failures are logged, counted and broadcast as events;
//! they never roll back in-memory state and are never retried here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use types::errors::PersistenceError;
use types::fill::Fill;
use types::ids::{AccountId, MarketId, OrderId};
use types::order::{Order, Side};
use types::position::Position;

use crate::events::{EngineEvent, PersistenceFailedEvent};

/// Durable store for orders, fills and positions
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert or replace a resting order
    async fn persist_order(&self, order: &Order) -> Result<(), PersistenceError>;

    async fn remove_order(&self, symbol: &MarketId, order_id: &OrderId) -> Result<(), PersistenceError>;

    async fn persist_fill_batch(&self, fills: &[Fill]) -> Result<(), PersistenceError>;

    /// Insert or replace an open position
    async fn persist_position(&self, position: &Position) -> Result<(), PersistenceError>;

    async fn remove_position(&self, account_id: &AccountId, symbol: &MarketId) -> Result<(), PersistenceError>;

    /// First `n` resting orders for one side in price-time priority.
    ///
    /// Used for cold-start rehydration only.
    async fn query_top_of_book(
        &self,
        symbol: &MarketId,
        side: Side,
        n: usize,
    ) -> Result<Vec<Order>, PersistenceError>;

    /// Open positions on one instrument (cold start)
    async fn query_positions(&self, symbol: &MarketId) -> Result<Vec<Position>, PersistenceError>;

    /// Highest fill sequence stored for the instrument, None if it never traded
    async fn last_fill_sequence(&self, symbol: &MarketId) -> Result<Option<u64>, PersistenceError>;
}

/// One store write produced by a committed transaction
#[derive(Debug, Clone, PartialEq)]
pub enum PersistCommand {
    UpsertOrder(Order),
    RemoveOrder { symbol: MarketId, order_id: OrderId },
    Fills(Vec<Fill>),
    UpsertPosition(Position),
    RemovePosition { account_id: AccountId, symbol: MarketId },
}

impl PersistCommand {
    pub fn operation(&self) -> &'static str {
        match self {
            PersistCommand::UpsertOrder(_) => "persist_order",
            PersistCommand::RemoveOrder { .. } => "remove_order",
            PersistCommand::Fills(_) => "persist_fill_batch",
            PersistCommand::UpsertPosition(_) => "persist_position",
            PersistCommand::RemovePosition { .. } => "remove_position",
        }
    }
}

/// Writes from one committed transaction, applied in order
pub type PersistBatch = Vec<PersistCommand>;

/// Counters shared between the engine and its writer
#[derive(Debug, Default)]
pub struct PersistenceStats {
    written: AtomicU64,
    failed: AtomicU64,
}

impl PersistenceStats {
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Drains persistence batches into an [`OrderStore`].
///
/// Created alongside the engine; the caller decides where it runs, e.g.
/// `tokio::spawn(writer.run())`. It stops once the engine is dropped and
/// every queued batch has been written.
pub struct PersistenceWriter {
    store: Arc<dyn OrderStore>,
    rx: mpsc::UnboundedReceiver<PersistBatch>,
    events: broadcast::Sender<EngineEvent>,
    stats: Arc<PersistenceStats>,
}

impl PersistenceWriter {
    pub(crate) fn new(
        store: Arc<dyn OrderStore>,
        rx: mpsc::UnboundedReceiver<PersistBatch>,
        events: broadcast::Sender<EngineEvent>,
        stats: Arc<PersistenceStats>,
    ) -> Self {
        Self {
            store,
            rx,
            events,
            stats,
        }
    }

    pub async fn run(mut self) {
        info!("Persistence writer started");
        while let Some(batch) = self.rx.recv().await {
            self.write_batch(batch).await;
        }
        info!(
            written = self.stats.written(),
            failed = self.stats.failed(),
            "Persistence writer stopped"
        );
    }

    async fn write_batch(&self, batch: PersistBatch) {
        for command in batch {
            match self.write(&command).await {
                Ok(()) => {
                    self.stats.written.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.record_failure();
                    error!(operation = command.operation(), error = %e, "Persistence write failed");
                    // No subscribers is not an error
                    let _ = self
                        .events
                        .send(EngineEvent::PersistenceFailed(PersistenceFailedEvent::new(command.operation(), &e)));
                }
            }
        }
    }

    async fn write(&self, command: &PersistCommand) -> Result<(), PersistenceError> {
        match command {
            PersistCommand::UpsertOrder(order) => self.store.persist_order(order).await,
            PersistCommand::RemoveOrder { symbol, order_id } => self.store.remove_order(symbol, order_id).await,
            PersistCommand::Fills(fills) => self.store.persist_fill_batch(fills).await,
            PersistCommand::UpsertPosition(position) => self.store.persist_position(position).await,
            PersistCommand::RemovePosition { account_id, symbol } => {
                self.store.remove_position(account_id, symbol).await
            }
        }
    }
}

/// In-process [`OrderStore`], for tests and single-node setups
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
    fail_writes: AtomicBool,
}

#[derive(Debug, Default)]
struct MemoryState {
    orders: HashMap<OrderId, Order>,
    fills: Vec<Fill>,
    positions: HashMap<(AccountId, MarketId), Position>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (reads keep working)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn order(&self, order_id: &OrderId) -> Option<Order> {
        self.state().ok()?.orders.get(order_id).cloned()
    }

    pub fn order_count(&self) -> usize {
        self.state().map(|s| s.orders.len()).unwrap_or(0)
    }

    pub fn fills(&self) -> Vec<Fill> {
        self.state().map(|s| s.fills.clone()).unwrap_or_default()
    }

    pub fn position(&self, account_id: &AccountId, symbol: &MarketId) -> Option<Position> {
        self.state().ok()?.positions.get(&(*account_id, symbol.clone())).cloned()
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, PersistenceError> {
        self.inner.lock().map_err(|_| PersistenceError::ReadFailed {
            reason: "memory store lock poisoned".to_string(),
        })
    }

    fn writable(&self, entity: &str) -> Result<std::sync::MutexGuard<'_, MemoryState>, PersistenceError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(PersistenceError::WriteFailed {
                entity: entity.to_string(),
                reason: "store unavailable".to_string(),
            });
        }
        self.inner.lock().map_err(|_| PersistenceError::WriteFailed {
            entity: entity.to_string(),
            reason: "memory store lock poisoned".to_string(),
        })
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn persist_order(&self, order: &Order) -> Result<(), PersistenceError> {
        self.writable("order")?.orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn remove_order(&self, _symbol: &MarketId, order_id: &OrderId) -> Result<(), PersistenceError> {
        self.writable("order")?.orders.remove(order_id);
        Ok(())
    }

    async fn persist_fill_batch(&self, fills: &[Fill]) -> Result<(), PersistenceError> {
        self.writable("fill")?.fills.extend_from_slice(fills);
        Ok(())
    }

    async fn persist_position(&self, position: &Position) -> Result<(), PersistenceError> {
        self.writable("position")?
            .positions
            .insert((position.account_id, position.symbol.clone()), position.clone());
        Ok(())
    }

    async fn remove_position(&self, account_id: &AccountId, symbol: &MarketId) -> Result<(), PersistenceError> {
        self.writable("position")?.positions.remove(&(*account_id, symbol.clone()));
        Ok(())
    }

    async fn query_top_of_book(
        &self,
        symbol: &MarketId,
        side: Side,
        n: usize,
    ) -> Result<Vec<Order>, PersistenceError> {
        let state = self.state()?;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| &o.symbol == symbol && o.side == side)
            .cloned()
            .collect();
        orders.sort_by(|a, b| {
            let by_price = match side {
                Side::BUY => b.price.cmp(&a.price),
                Side::SELL => a.price.cmp(&b.price),
            };
            by_price.then(a.created_at.cmp(&b.created_at))
        });
        orders.truncate(n);
        Ok(orders)
    }

    async fn query_positions(&self, symbol: &MarketId) -> Result<Vec<Position>, PersistenceError> {
        let state = self.state()?;
        Ok(state
            .positions
            .values()
            .filter(|p| &p.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn last_fill_sequence(&self, symbol: &MarketId) -> Result<Option<u64>, PersistenceError> {
        let state = self.state()?;
        Ok(state
            .fills
            .iter()
            .filter(|f| &f.symbol == symbol)
            .map(|f| f.sequence)
            .max())
    }
}
