//! Broker configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the in-memory broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Maximum number of queued jobs per lane.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_lane_size: Option<usize>,
    /// Reject updates that leave the job lifecycle graph.
    pub enforce_transitions: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_lane_size: None,
            enforce_transitions: true,
        }
    }
}

impl BrokerConfig {
    /// Set the per-lane capacity.
    pub fn with_max_lane_size(mut self, max_lane_size: usize) -> Self {
        self.max_lane_size = Some(max_lane_size);
        self
    }

    /// Enable or disable lifecycle enforcement in `update_job`.
    pub fn with_enforce_transitions(mut self, enforce: bool) -> Self {
        self.enforce_transitions = enforce;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: BrokerConfig = serde_json::from_str(r#"{ "max_lane_size": 8 }"#).unwrap();
        assert_eq!(config.max_lane_size, Some(8));
        assert!(config.enforce_transitions);
    }
}
