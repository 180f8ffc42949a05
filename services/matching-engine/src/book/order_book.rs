//! One side of an instrument's order book
//!
//! Bids are ranked by price descending, asks by price ascending, and orders
//! at the same price by time priority. Levels live in a BTreeMap so the best
//! level is found in O(log n) and iteration is deterministic; an id index
//! maps each resting order to its level for cancel and reduce.

use std::collections::{BTreeMap, HashMap};
use types::errors::{EngineError, NotFoundError, OrderError};
use types::ids::OrderId;
use types::numeric::{Price, Quantity};
use types::order::{Order, Side};

use super::price_level::PriceLevel;

/// Resting orders for one side of one instrument
#[derive(Debug, Clone)]
pub struct OrderBook {
    side: Side,
    /// Price levels keyed ascending; bids read them from the back
    levels: BTreeMap<Price, PriceLevel>,
    /// order_id -> price of the level holding it
    index: HashMap<OrderId, Price>,
    /// Arrival counter used as the final priority tie-break
    next_arrival: u64,
}

impl OrderBook {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
            index: HashMap::new(),
            next_arrival: 0,
        }
    }

    pub fn bids() -> Self {
        Self::new(Side::BUY)
    }

    pub fn asks() -> Self {
        Self::new(Side::SELL)
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Insert a resting order at its priority position
    pub fn insert(&mut self, order: Order) -> Result<(), OrderError> {
        order.validate()?;
        if order.side != self.side {
            return Err(OrderError::WrongSide {
                order_id: order.order_id.to_string(),
            });
        }
        if self.index.contains_key(&order.order_id) {
            return Err(OrderError::DuplicateOrder {
                order_id: order.order_id.to_string(),
            });
        }
        if !self.can_rest(&order) {
            return Err(OrderError::InvalidQuantity(order.remaining_quantity.to_string()));
        }

        let arrival = self.next_arrival;
        self.next_arrival += 1;
        self.index.insert(order.order_id, order.price);
        self.levels
            .entry(order.price)
            .or_insert_with(PriceLevel::new)
            .insert(order, arrival);
        Ok(())
    }

    /// Remove a resting order (cancellation)
    pub fn remove(&mut self, order_id: &OrderId) -> Result<Order, NotFoundError> {
        let price = self.index.remove(order_id).ok_or_else(|| not_found(order_id))?;
        let level = self.levels.get_mut(&price).ok_or_else(|| not_found(order_id))?;
        let order = level.remove(order_id).ok_or_else(|| not_found(order_id))?;
        if level.is_empty() {
            self.levels.remove(&price);
        }
        Ok(order)
    }

    /// Decrement a resting order's volume by `amount`.
    ///
    /// Returns the order after the reduction; an order reaching zero has
    /// already been removed from the book when this returns.
    pub fn reduce(&mut self, order_id: &OrderId, amount: Quantity, timestamp: i64) -> Result<Order, EngineError> {
        let price = *self.index.get(order_id).ok_or_else(|| not_found(order_id))?;
        let level = self.levels.get_mut(&price).ok_or_else(|| not_found(order_id))?;
        let current = level.get(order_id).ok_or_else(|| not_found(order_id))?;

        if !amount.is_positive() || amount > current.remaining_quantity {
            return Err(OrderError::Overfill {
                order_id: order_id.to_string(),
                requested: amount.to_string(),
                remaining: current.remaining_quantity.to_string(),
            }
            .into());
        }

        let order = level.reduce(order_id, amount, timestamp).ok_or_else(|| not_found(order_id))?;
        if order.is_filled() {
            self.index.remove(order_id);
        }
        if level.is_empty() {
            self.levels.remove(&price);
        }
        Ok(order)
    }

    /// Best resting price, or None on an empty book
    pub fn best_price(&self) -> Option<Price> {
        match self.side {
            Side::BUY => self.levels.keys().next_back().copied(),
            Side::SELL => self.levels.keys().next().copied(),
        }
    }

    /// Order with overall priority
    pub fn peek_best(&self) -> Option<&Order> {
        self.ranked_levels().next().and_then(|(_, level)| level.front())
    }

    /// First `n` orders in priority order; empty on an empty book
    pub fn top_n(&self, n: usize) -> Vec<Order> {
        self.iter().take(n).cloned().collect()
    }

    /// All resting orders in priority order
    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.ranked_levels().flat_map(|(_, level)| level.iter())
    }

    pub fn get(&self, order_id: &OrderId) -> Option<&Order> {
        let price = self.index.get(order_id)?;
        self.levels.get(price)?.get(order_id)
    }

    /// Aggregated (price, quantity) for the top `depth` levels
    pub fn depth_snapshot(&self, depth: usize) -> Vec<(Price, Quantity)> {
        self.ranked_levels()
            .take(depth)
            .map(|(price, level)| (*price, level.total_quantity()))
            .collect()
    }

    pub fn total_quantity(&self) -> Quantity {
        self.levels.values().map(PriceLevel::total_quantity).sum()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Resting quantity at `price`; zero when the level does not exist
    pub fn level_quantity(&self, price: &Price) -> Quantity {
        self.levels
            .get(price)
            .map(PriceLevel::total_quantity)
            .unwrap_or_else(Quantity::zero)
    }

    /// Whether the order's remainder fits in its level without overflowing the level total
    pub fn can_rest(&self, order: &Order) -> bool {
        self.level_quantity(&order.price)
            .checked_add(order.remaining_quantity)
            .is_some()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn ranked_levels(&self) -> Box<dyn Iterator<Item = (&Price, &PriceLevel)> + '_> {
        match self.side {
            Side::BUY => Box::new(self.levels.iter().rev()),
            Side::SELL => Box::new(self.levels.iter()),
        }
    }
}

fn not_found(order_id: &OrderId) -> NotFoundError {
    NotFoundError::Order {
        order_id: order_id.to_string(),
    }
}
