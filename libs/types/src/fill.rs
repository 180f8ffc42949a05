//! Fill (execution) types
//!
//! A fill records one execution between a resting order and the incoming
//! order that crossed it. It always carries the resting order's price.

use crate::ids::{AccountId, FillId, MarketId, OrderId};
use crate::numeric::{Price, Quantity};
use crate::order::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: FillId,
    pub sequence: u64, // Per-instrument monotonic sequence
    pub symbol: MarketId,

    pub resting_order_id: OrderId,
    pub incoming_order_id: OrderId,
    pub resting_account_id: AccountId,
    pub incoming_account_id: AccountId,

    /// Side of the incoming order
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,

    pub executed_at: i64, // Unix nanos
}

impl Fill {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sequence: u64,
        symbol: MarketId,
        resting_order_id: OrderId,
        incoming_order_id: OrderId,
        resting_account_id: AccountId,
        incoming_account_id: AccountId,
        side: Side,
        price: Price,
        quantity: Quantity,
        executed_at: i64,
    ) -> Self {
        Self {
            fill_id: FillId::new(),
            sequence,
            symbol,
            resting_order_id,
            incoming_order_id,
            resting_account_id,
            incoming_account_id,
            side,
            price,
            quantity,
            executed_at,
        }
    }

    /// Side the resting trader traded on
    pub fn resting_side(&self) -> Side {
        self.side.opposite()
    }

    /// Notional value (price × quantity)
    pub fn notional(&self) -> Decimal {
        self.quantity.as_decimal().saturating_mul(self.price.as_decimal())
    }

    pub fn is_self_match(&self) -> bool {
        self.resting_account_id == self.incoming_account_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fill() -> Fill {
        Fill::new(
            42,
            MarketId::new("EUR/USD"),
            OrderId::new(),
            OrderId::new(),
            AccountId::new(),
            AccountId::new(),
            Side::SELL,
            Price::from_str("1.0000").unwrap(),
            Quantity::from_u64(5),
            1708123456789000000,
        )
    }

    #[test]
    fn test_fill_sides() {
        let fill = sample_fill();
        assert_eq!(fill.side, Side::SELL);
        assert_eq!(fill.resting_side(), Side::BUY);
        assert!(!fill.is_self_match());
    }

    #[test]
    fn test_fill_notional() {
        let fill = sample_fill();
        assert_eq!(fill.notional(), Decimal::from(5));
    }
}
