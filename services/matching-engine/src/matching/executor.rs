//! Fill construction and sequencing
//!
//! Every fill produced for an instrument gets the next number from a
//! monotonically increasing sequence, so downstream consumers can order and
//! deduplicate them.

use types::fill::Fill;
use types::ids::MarketId;
use types::numeric::Quantity;
use types::order::Order;

/// Builds fills with gapless sequence numbers
#[derive(Debug, Clone)]
pub struct FillExecutor {
    sequence_counter: u64,
}

impl FillExecutor {
    /// Create a new executor with starting sequence number
    pub fn new(starting_sequence: u64) -> Self {
        Self {
            sequence_counter: starting_sequence,
        }
    }

    /// Sequence number the next fill will receive
    pub fn next_sequence(&self) -> u64 {
        self.sequence_counter
    }

    /// Continue numbering after `last`, a sequence already handed out by a
    /// previous run. Never moves the counter backwards.
    pub fn resume_after(&mut self, last: u64) {
        self.sequence_counter = self.sequence_counter.max(last.saturating_add(1));
    }

    fn take_sequence(&mut self) -> u64 {
        let seq = self.sequence_counter;
        self.sequence_counter += 1;
        seq
    }

    /// Record an execution of `quantity` between a resting and an incoming order.
    ///
    /// The execution price is always the resting order's price.
    pub fn execute(
        &mut self,
        symbol: &MarketId,
        resting: &Order,
        incoming: &Order,
        quantity: Quantity,
        timestamp: i64,
    ) -> Fill {
        let sequence = self.take_sequence();
        Fill::new(
            sequence,
            symbol.clone(),
            resting.order_id,
            incoming.order_id,
            resting.account_id,
            incoming.account_id,
            incoming.side,
            resting.price,
            quantity,
            timestamp,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::AccountId;
    use types::numeric::Price;
    use types::order::Side;

    fn order(side: Side, price: &str) -> Order {
        Order::new(
            AccountId::new(),
            MarketId::new("EUR/USD"),
            side,
            Price::from_str(price).unwrap(),
            Quantity::from_u64(10),
            1708123456789000000,
        )
    }

    #[test]
    fn test_execute_uses_resting_price() {
        let mut executor = FillExecutor::new(1000);
        let resting = order(Side::BUY, "1.0000");
        let incoming = order(Side::SELL, "0.9990");

        let fill = executor.execute(&resting.symbol, &resting, &incoming, Quantity::from_u64(5), 1);

        assert_eq!(fill.sequence, 1000);
        assert_eq!(fill.price, resting.price);
        assert_eq!(fill.side, Side::SELL);
        assert_eq!(fill.resting_order_id, resting.order_id);
        assert_eq!(fill.incoming_account_id, incoming.account_id);
    }

    #[test]
    fn test_sequence_monotonic() {
        let mut executor = FillExecutor::new(7);
        let resting = order(Side::SELL, "1.0000");
        let incoming = order(Side::BUY, "1.0000");

        let a = executor.execute(&resting.symbol, &resting, &incoming, Quantity::from_u64(1), 1);
        let b = executor.execute(&resting.symbol, &resting, &incoming, Quantity::from_u64(1), 2);

        assert_eq!(a.sequence, 7);
        assert_eq!(b.sequence, 8);
        assert_eq!(executor.next_sequence(), 9);
    }

    #[test]
    fn test_resume_after_never_goes_backwards() {
        let mut executor = FillExecutor::new(1);
        executor.resume_after(41);
        assert_eq!(executor.next_sequence(), 42);

        executor.resume_after(3);
        assert_eq!(executor.next_sequence(), 42);
    }
}
