//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

use crate::engine::{DEFAULT_MAX_PRIMITIVES, DEFAULT_QUEUE_SIZE};
use crate::error::GraphError;
use crate::router::DEFAULT_MAX_DEPTH;

/// How [`Orchestrator::apply`](crate::Orchestrator::apply) moves from one
/// description to the next.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileMode {
    /// Touch only what changed. Untouched units keep their state.
    #[default]
    Diff,
    /// Dispose everything and build from scratch.
    Rebuild,
}

/// Settings for an [`Orchestrator`](crate::Orchestrator) and the engine it
/// creates. Missing fields take their defaults when deserialized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Engine sample rate in Hz.
    pub sample_rate: u32,
    /// Destination channel count.
    pub channels: usize,
    /// Message queue slots per primitive.
    pub queue_size: usize,
    /// Primitive budget.
    pub max_primitives: usize,
    /// Nested publish limit for the event router.
    pub max_dispatch_depth: usize,
    /// Reconciliation strategy.
    pub reconcile: ReconcileMode,
    /// Frames per block. Fixed by the renderer; read-only in practice.
    pub block_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            queue_size: DEFAULT_QUEUE_SIZE,
            max_primitives: DEFAULT_MAX_PRIMITIVES,
            max_dispatch_depth: DEFAULT_MAX_DEPTH,
            reconcile: ReconcileMode::Diff,
            block_size: dasp_graph::Buffer::LEN,
        }
    }
}

impl OrchestratorConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.max(1);
        self
    }

    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size.max(1);
        self
    }

    pub fn with_max_primitives(mut self, max: usize) -> Self {
        self.max_primitives = max;
        self
    }

    pub fn with_max_dispatch_depth(mut self, depth: usize) -> Self {
        self.max_dispatch_depth = depth.max(1);
        self
    }

    pub fn with_reconcile(mut self, mode: ReconcileMode) -> Self {
        self.reconcile = mode;
        self
    }

    /// Block duration in milliseconds.
    pub fn block_ms(&self) -> f64 {
        self.block_size as f64 * 1000.0 / self.sample_rate.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = OrchestratorConfig::from_json(r#"{ "sampleRate": 44100, "reconcile": "rebuild" }"#).unwrap();
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.reconcile, ReconcileMode::Rebuild);
        assert_eq!(config.channels, 2);
        assert_eq!(config.block_size, 64);
    }
}
