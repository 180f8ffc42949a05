//! Engine configuration

use serde::{Deserialize, Serialize};

/// Matching engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// First fill sequence number handed out for each instrument
    pub starting_sequence: u64,
    /// Capacity of the event broadcast channel; slow subscribers lag past it
    pub event_channel_capacity: usize,
    /// Send committed state to the store collaborator
    pub persistence_enabled: bool,
    /// Orders loaded per side when rehydrating a book from the store
    pub rehydrate_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            starting_sequence: 1,
            event_channel_capacity: 10_000,
            persistence_enabled: true,
            rehydrate_depth: 1_000,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{ "rehydrate_depth": 50 }"#).unwrap();
        assert_eq!(config.rehydrate_depth, 50);
        assert_eq!(config.starting_sequence, 1);
        assert!(config.persistence_enabled);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(EngineConfig::from_json(r#"{ "rehydrate_depth": "deep" }"#).is_err());
    }
}
