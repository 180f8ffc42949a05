//! Unique identifier types for engine entities
//!
//! Order, fill and account identifiers are UUID v7 so they sort by creation
//! time. Instruments are identified by their `BASE/QUOTE` symbol.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new identifier stamped with the current time
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an order
    OrderId
);

uuid_id!(
    /// Unique identifier for a fill (one resting/incoming execution)
    FillId
);

uuid_id!(
    /// Unique identifier for a trader account
    AccountId
);

/// Instrument identifier (trading pair)
///
/// Format: "BASE/QUOTE" (e.g., "EUR/USD", "BTC/USDT")
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketId(String);

impl MarketId {
    /// Create a new MarketId from a string
    ///
    /// # Panics
    /// Panics if the format is invalid; use [`MarketId::try_new`] for input
    /// that has not been validated yet.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self::try_new(symbol).expect("MarketId must be in BASE/QUOTE format")
    }

    /// Try to create a MarketId, returning None unless both halves are non-empty
    pub fn try_new(symbol: impl Into<String>) -> Option<Self> {
        let s = symbol.into();
        match s.split_once('/') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() && !quote.contains('/') => {
                Some(Self(s))
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into base and quote assets
    pub fn split(&self) -> (&str, &str) {
        self.0.split_once('/').unwrap_or((self.0.as_str(), ""))
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
