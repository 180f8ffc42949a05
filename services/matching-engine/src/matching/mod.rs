//! Matching logic module
//!
//! Implements the price-time priority matching algorithm

pub mod crossing;
pub mod executor;
pub mod matcher;

pub use executor::FillExecutor;
pub use matcher::{match_order, MatchOutcome};
