//! Engine tuning options.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on closeout rounds per command. Hitting it halts the replica.
    #[serde(default = "default_closeout_rounds")]
    pub max_closeout_rounds: usize,
    /// Initial capacity of the event buffer.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_closeout_rounds() -> usize {
    64
}

fn default_event_buffer() -> usize {
    4_096
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_closeout_rounds: default_closeout_rounds(),
            event_buffer: default_event_buffer(),
        }
    }
}
