//! Continuous price-time matching
//!
//! An incoming order walks the opposite book from the best price outward,
//! trading at each resting order's price, until it is filled or the book no
//! longer crosses its limit. Whatever is left rests on its own side. There
//! is no depth limit: the walk ends only on one of those two conditions.

use tracing::debug;
use types::errors::{EngineError, OrderError};
use types::fill::Fill;
use types::order::Order;

use super::crossing;
use super::executor::FillExecutor;
use crate::book::BookPair;

/// Result of running one incoming order through the book
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// Fills in execution order
    pub fills: Vec<Fill>,
    /// Resting orders touched by the fills, as they stand afterwards
    pub resting_updates: Vec<Order>,
    /// Incoming order after matching
    pub incoming: Order,
    /// Whether a remainder of the incoming order now rests in the book
    pub rested: bool,
}

/// Match `incoming` against `books`.
///
/// Validation happens before any mutation, so an `InvalidOrder` error leaves
/// both books untouched.
pub fn match_order(
    books: &mut BookPair,
    executor: &mut FillExecutor,
    mut incoming: Order,
    timestamp: i64,
) -> Result<MatchOutcome, EngineError> {
    incoming.validate()?;
    // A remainder must be able to rest; checked up front so a failure leaves
    // both books untouched
    if !books.side(incoming.side).can_rest(&incoming) {
        return Err(OrderError::InvalidQuantity(incoming.remaining_quantity.to_string()).into());
    }

    let mut fills = Vec::new();
    let mut resting_updates = Vec::new();
    let side = incoming.side;

    while !incoming.is_filled() {
        let opposite = books.opposite_mut(side);
        if !crossing::crosses(side, incoming.price, opposite.best_price()) {
            break;
        }
        let Some(resting) = opposite.peek_best() else {
            break;
        };

        let quantity = incoming.remaining_quantity.min(resting.remaining_quantity);
        let resting_id = resting.order_id;
        let fill = executor.execute(&incoming.symbol, resting, &incoming, quantity, timestamp);

        let updated = opposite.reduce(&resting_id, quantity, timestamp)?;
        incoming.add_fill(quantity, timestamp)?;

        debug!(
            symbol = %fill.symbol,
            sequence = fill.sequence,
            price = %fill.price,
            quantity = %fill.quantity,
            resting_order = %resting_id,
            incoming_order = %incoming.order_id,
            "Fill executed"
        );

        fills.push(fill);
        resting_updates.push(updated);
    }

    let rested = !incoming.is_filled();
    if rested {
        books.own_mut(side).insert(incoming.clone())?;
    }

    Ok(MatchOutcome {
        fills,
        resting_updates,
        incoming,
        rested,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::{AccountId, MarketId};
    use types::numeric::{Price, Quantity};
    use types::order::{OrderStatus, Side};

    fn order(side: Side, price: &str, qty: &str, created_at: i64) -> Order {
        Order::new(
            AccountId::new(),
            MarketId::new("EUR/USD"),
            side,
            Price::from_str(price).unwrap(),
            Quantity::from_str(qty).unwrap(),
            created_at,
        )
    }

    fn run(books: &mut BookPair, executor: &mut FillExecutor, o: Order) -> MatchOutcome {
        let ts = o.created_at;
        match_order(books, executor, o, ts).unwrap()
    }

    #[test]
    fn test_no_cross_rests_everything() {
        let mut books = BookPair::new();
        let mut executor = FillExecutor::new(0);

        let outcome = run(&mut books, &mut executor, order(Side::BUY, "1.0000", "10", 1));
        assert!(outcome.fills.is_empty());
        assert!(outcome.rested);

        // SELL above the best bid does not cross
        let outcome = run(&mut books, &mut executor, order(Side::SELL, "1.0010", "10", 2));
        assert!(outcome.fills.is_empty());
        assert_eq!(books.bids.len(), 1);
        assert_eq!(books.asks.len(), 1);
    }

    #[test]
    fn test_resting_price_wins() {
        let mut books = BookPair::new();
        let mut executor = FillExecutor::new(0);
        let buy = order(Side::BUY, "1.0000", "10", 1);
        let buy_id = buy.order_id;
        run(&mut books, &mut executor, buy);

        let outcome = run(&mut books, &mut executor, order(Side::SELL, "0.9990", "5", 2));

        assert_eq!(outcome.fills.len(), 1);
        assert_eq!(outcome.fills[0].price, Price::from_str("1.0000").unwrap());
        assert_eq!(outcome.fills[0].quantity, Quantity::from_u64(5));
        assert!(!outcome.rested);
        assert_eq!(outcome.incoming.status, OrderStatus::Filled);
        assert_eq!(books.bids.get(&buy_id).unwrap().remaining_quantity, Quantity::from_u64(5));
    }

    #[test]
    fn test_walks_multiple_levels_then_rests() {
        let mut books = BookPair::new();
        let mut executor = FillExecutor::new(0);
        run(&mut books, &mut executor, order(Side::SELL, "1.0000", "2", 1));
        run(&mut books, &mut executor, order(Side::SELL, "1.0005", "3", 2));
        run(&mut books, &mut executor, order(Side::SELL, "1.0020", "4", 3));

        let outcome = run(&mut books, &mut executor, order(Side::BUY, "1.0010", "10", 4));

        let prices: Vec<_> = outcome.fills.iter().map(|f| f.price.to_string()).collect();
        assert_eq!(prices, vec!["1", "1.0005"]);
        assert!(outcome.rested);
        assert_eq!(outcome.incoming.remaining_quantity, Quantity::from_u64(5));
        assert_eq!(books.asks.best_price(), Some(Price::from_str("1.0020").unwrap()));
        assert_eq!(books.bids.best_price(), Some(Price::from_str("1.0010").unwrap()));
    }

    #[test]
    fn test_time_priority_within_level() {
        let mut books = BookPair::new();
        let mut executor = FillExecutor::new(0);
        let first = order(Side::BUY, "1.0000", "1", 1);
        let second = order(Side::BUY, "1.0000", "1", 2);
        let (first_id, second_id) = (first.order_id, second.order_id);
        run(&mut books, &mut executor, second);
        run(&mut books, &mut executor, first);

        let outcome = run(&mut books, &mut executor, order(Side::SELL, "1.0000", "1", 3));
        assert_eq!(outcome.fills[0].resting_order_id, first_id);
        assert!(books.bids.get(&second_id).is_some());
    }

    #[test]
    fn test_deep_book_has_no_depth_limit() {
        let mut books = BookPair::new();
        let mut executor = FillExecutor::new(0);
        for i in 0..25 {
            let price = format!("1.{:04}", i);
            run(&mut books, &mut executor, order(Side::SELL, &price, "1", i));
        }

        let outcome = run(&mut books, &mut executor, order(Side::BUY, "2", "25", 100));
        assert_eq!(outcome.fills.len(), 25);
        assert!(books.asks.is_empty());
        assert!(!outcome.rested);
        let sequences: Vec<_> = outcome.fills.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, (0..25).collect::<Vec<_>>());
    }

    #[test]
    fn test_invalid_order_has_no_side_effects() {
        let mut books = BookPair::new();
        let mut executor = FillExecutor::new(0);
        run(&mut books, &mut executor, order(Side::SELL, "1.0000", "1", 1));

        let bad = order(Side::BUY, "1.0000", "0", 2);
        let err = match_order(&mut books, &mut executor, bad, 2).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOrder(OrderError::InvalidQuantity(_))));
        assert_eq!(books.asks.len(), 1);
        assert_eq!(executor.next_sequence(), 0);
    }
}
