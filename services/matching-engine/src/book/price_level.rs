//! Price level implementation with a time-ordered queue
//!
//! A price level holds every resting order at one price. Orders are kept
//! sorted by `created_at`, then by arrival in the book, so the front of the
//! queue is always the order with time priority. Live submissions arrive in
//! time order and append; rehydrated orders may land in the middle.

use std::collections::VecDeque;
use types::ids::OrderId;
use types::numeric::Quantity;
use types::order::Order;

/// A price level containing orders at a specific price
#[derive(Debug, Clone)]
pub struct PriceLevel {
    /// Orders in time priority (front = next to match)
    orders: VecDeque<LevelEntry>,
    /// Total remaining quantity at this level
    total_quantity: Quantity,
}

#[derive(Debug, Clone)]
struct LevelEntry {
    /// Book arrival counter, breaks `created_at` ties
    arrival: u64,
    order: Order,
}

impl LevelEntry {
    fn priority(&self) -> (i64, u64) {
        (self.order.created_at, self.arrival)
    }
}

impl PriceLevel {
    pub fn new() -> Self {
        Self {
            orders: VecDeque::new(),
            total_quantity: Quantity::zero(),
        }
    }

    /// Insert an order at its time-priority position
    pub fn insert(&mut self, order: Order, arrival: u64) {
        let entry = LevelEntry { arrival, order };
        let key = entry.priority();
        let index = self.orders.partition_point(|e| e.priority() <= key);
        self.total_quantity = self.total_quantity + entry.order.remaining_quantity;
        self.orders.insert(index, entry);
    }

    /// Remove an order by id, returning it if present
    pub fn remove(&mut self, order_id: &OrderId) -> Option<Order> {
        let position = self.orders.iter().position(|e| &e.order.order_id == order_id)?;
        let entry = self.orders.remove(position)?;
        self.total_quantity = self.total_quantity - entry.order.remaining_quantity;
        Some(entry.order)
    }

    /// Order with time priority at this level
    pub fn front(&self) -> Option<&Order> {
        self.orders.front().map(|e| &e.order)
    }

    pub fn get(&self, order_id: &OrderId) -> Option<&Order> {
        self.iter().find(|order| &order.order_id == order_id)
    }

    /// Execute `amount` against a resting order.
    ///
    /// Returns the order as it stands after the reduction. An order reduced
    /// to zero is removed in the same step. The caller checks that `amount`
    /// does not exceed the remaining quantity.
    pub(crate) fn reduce(&mut self, order_id: &OrderId, amount: Quantity, timestamp: i64) -> Option<Order> {
        let position = self.orders.iter().position(|e| &e.order.order_id == order_id)?;
        let entry = self.orders.get_mut(position)?;
        entry.order.add_fill(amount, timestamp).ok()?;
        self.total_quantity = self.total_quantity - amount;

        if entry.order.is_filled() {
            self.orders.remove(position).map(|e| e.order)
        } else {
            Some(entry.order.clone())
        }
    }

    /// Orders in priority order
    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().map(|e| &e.order)
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn total_quantity(&self) -> Quantity {
        self.total_quantity
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

impl Default for PriceLevel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::{AccountId, MarketId};
    use types::numeric::Price;
    use types::order::{OrderStatus, Side};

    fn order_at(created_at: i64, qty: u64) -> Order {
        Order::new(
            AccountId::new(),
            MarketId::new("EUR/USD"),
            Side::BUY,
            Price::from_str("1.0000").unwrap(),
            Quantity::from_u64(qty),
            created_at,
        )
    }

    #[test]
    fn test_price_level_fifo_order() {
        let mut level = PriceLevel::new();
        let first = order_at(100, 1);
        let second = order_at(200, 2);
        let first_id = first.order_id;

        level.insert(first, 0);
        level.insert(second, 1);

        assert_eq!(level.front().unwrap().order_id, first_id);
        assert_eq!(level.total_quantity(), Quantity::from_u64(3));
    }

    #[test]
    fn test_out_of_order_insert_respects_created_at() {
        let mut level = PriceLevel::new();
        let late = order_at(300, 1);
        let early = order_at(100, 1);
        let early_id = early.order_id;

        level.insert(late, 0);
        level.insert(early, 1);

        assert_eq!(level.front().unwrap().order_id, early_id);
    }

    #[test]
    fn test_equal_created_at_uses_arrival() {
        let mut level = PriceLevel::new();
        let a = order_at(100, 1);
        let b = order_at(100, 1);
        let a_id = a.order_id;
        let b_id = b.order_id;

        level.insert(a, 5);
        level.insert(b, 6);

        let ids: Vec<_> = level.iter().map(|o| o.order_id).collect();
        assert_eq!(ids, vec![a_id, b_id]);
    }

    #[test]
    fn test_price_level_remove() {
        let mut level = PriceLevel::new();
        let a = order_at(1, 1);
        let b = order_at(2, 2);
        let a_id = a.order_id;
        level.insert(a, 0);
        level.insert(b, 1);

        let removed = level.remove(&a_id).unwrap();
        assert_eq!(removed.order_id, a_id);
        assert_eq!(level.order_count(), 1);
        assert_eq!(level.total_quantity(), Quantity::from_u64(2));
        assert!(level.remove(&a_id).is_none());
    }

    #[test]
    fn test_reduce_partial_then_full() {
        let mut level = PriceLevel::new();
        let order = order_at(1, 5);
        let id = order.order_id;
        level.insert(order, 0);

        let after = level.reduce(&id, Quantity::from_u64(2), 10).unwrap();
        assert_eq!(after.remaining_quantity, Quantity::from_u64(3));
        assert_eq!(after.status, OrderStatus::Partial);
        assert_eq!(level.total_quantity(), Quantity::from_u64(3));

        let done = level.reduce(&id, Quantity::from_u64(3), 11).unwrap();
        assert_eq!(done.status, OrderStatus::Filled);
        assert!(level.is_empty());
        assert_eq!(level.total_quantity(), Quantity::zero());
    }
}
