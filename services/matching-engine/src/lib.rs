//! Matching Engine Service
//!
//! Continuous limit-order matching with price-time priority, plus a
//! per-trader position ledger with FIFO lot accounting.
//!
//! **Key Invariants:**
//! - Price-time priority strictly enforced, with no depth limit
//! - Fills execute at the resting order's price
//! - Conservation of quantity: filled + remaining = submitted
//! - Position size always equals the sum of its open lots
//! - Match and ledger update commit together under the instrument's lock

pub mod book;
pub mod config;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod market;
pub mod matching;
pub mod store;

pub use config::EngineConfig;
pub use engine::MatchingEngine;
pub use events::EngineEvent;
pub use market::{OrderBookSnapshot, RehydrateSummary, StoredMarket, SubmitResult};
pub use store::{MemoryStore, OrderStore, PersistenceWriter};
