//! Types library for the matching engine and position ledger
//!
//! Shared, serializable domain types. Nothing in here holds engine state;
//! the matching-engine service owns books, ledgers and sequencing.
//!
//! # Modules
//! - `ids`: Unique identifiers (OrderId, FillId, AccountId, MarketId)
//! - `numeric`: Fixed-point decimal types (Price, Quantity)
//! - `order`: Orders, sides and ingress validation
//! - `fill`: Execution records
//! - `position`: Lots and FIFO positions
//! - `errors`: Error taxonomy

pub mod ids;
pub mod numeric;
pub mod order;
pub mod fill;
pub mod position;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::order::*;
    pub use crate::fill::*;
    pub use crate::position::*;
    pub use crate::errors::*;
}
