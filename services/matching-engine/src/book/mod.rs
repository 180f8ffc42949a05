//! Order book infrastructure module
//!
//! Contains price levels and the per-side order book, plus the bid/ask pair
//! that makes up one instrument's book.

pub mod price_level;
pub mod order_book;

pub use order_book::OrderBook;
pub use price_level::PriceLevel;

use types::numeric::{Price, Quantity};
use types::order::Side;

/// Both sides of one instrument's book
#[derive(Debug, Clone)]
pub struct BookPair {
    pub bids: OrderBook,
    pub asks: OrderBook,
}

impl BookPair {
    pub fn new() -> Self {
        Self {
            bids: OrderBook::bids(),
            asks: OrderBook::asks(),
        }
    }

    /// Book an order of `side` rests on
    pub fn own_mut(&mut self, side: Side) -> &mut OrderBook {
        match side {
            Side::BUY => &mut self.bids,
            Side::SELL => &mut self.asks,
        }
    }

    /// Book an order of `side` matches against
    pub fn opposite_mut(&mut self, side: Side) -> &mut OrderBook {
        self.own_mut(side.opposite())
    }

    pub fn side(&self, side: Side) -> &OrderBook {
        match side {
            Side::BUY => &self.bids,
            Side::SELL => &self.asks,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Aggregated depth for both sides
    pub fn snapshot(&self, depth: usize) -> (Vec<(Price, Quantity)>, Vec<(Price, Quantity)>) {
        (self.bids.depth_snapshot(depth), self.asks.depth_snapshot(depth))
    }
}

impl Default for BookPair {
    fn default() -> Self {
        Self::new()
    }
}
