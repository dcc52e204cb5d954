// ── Aggregate summaries ──

use serde::{Deserialize, Serialize};

use super::adapter::{MessageLevel, RunState};

/// Entity counts per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub started: u32,
    pub starting: u32,
    pub stopping: u32,
    pub stopped: u32,
    /// `error` plus both exception states.
    pub error: u32,
}

impl StateCounts {
    pub fn add(&mut self, state: RunState) {
        match state {
            RunState::Started => self.started += 1,
            RunState::Starting => self.starting += 1,
            RunState::Stopping => self.stopping += 1,
            RunState::Stopped | RunState::Unknown => self.stopped += 1,
            RunState::Error | RunState::ExceptionStarting | RunState::ExceptionStopping => {
                self.error += 1;
            }
        }
    }

    pub fn total(&self) -> u32 {
        self.started + self.starting + self.stopping + self.stopped + self.error
    }
}

/// Message counts per level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCounts {
    pub info: u32,
    pub warn: u32,
    pub error: u32,
}

impl LevelCounts {
    pub fn add(&mut self, level: MessageLevel) {
        match level {
            MessageLevel::Info => self.info += 1,
            MessageLevel::Warn => self.warn += 1,
            MessageLevel::Error => self.error += 1,
        }
    }
}

/// Aggregate view over the adapters of one configuration (or all of them).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// `None` means every configuration.
    pub configuration: Option<String>,
    pub adapters: StateCounts,
    pub receivers: StateCounts,
    pub messages: LevelCounts,
}
