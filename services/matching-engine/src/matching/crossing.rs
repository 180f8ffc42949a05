//! Crossing detection logic
//!
//! Determines when an incoming order can trade against the opposite side.

use types::numeric::Price;
use types::order::Side;

/// Check if an incoming order's limit reaches a resting price
///
/// - BUY crosses when incoming price >= resting ask
/// - SELL crosses when incoming price <= resting bid
pub fn incoming_can_match(incoming_side: Side, incoming_price: Price, resting_price: Price) -> bool {
    match incoming_side {
        Side::BUY => incoming_price >= resting_price,
        Side::SELL => incoming_price <= resting_price,
    }
}

/// Crossing test against the opposite book's best price; an empty book never crosses
pub fn crosses(incoming_side: Side, incoming_price: Price, opposite_best: Option<Price>) -> bool {
    opposite_best.is_some_and(|best| incoming_can_match(incoming_side, incoming_price, best))
}
