//! Engine settings: the `[engine]` section of a pipeline configuration
//!
//! These are properties of the execution platform rather than of any single
//! flow: how many outputs one branch stage can drive, how deep boundary
//! queues are, which hardware targets exist, and how the graph is scheduled.
//! Every field has a default, so the section may be omitted entirely.

use crate::error::{Result, VisionFlowError};
use crate::pipeline::module_kind::ModuleKind;
use crate::pipeline::pool::MAX_POOL_CAPACITY;
use crate::pipeline::target::default_targets;
use crate::pipeline::GraphOptions;
use crate::types::ScheduleMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default number of output groups per branch stage
pub const DEFAULT_BRANCH_FANOUT: usize = 4;

/// Default in-flight depth of boundary pads
pub const DEFAULT_QUEUE_DEPTH: usize = 4;

/// Default depth of the statistics feedback pads
pub const DEFAULT_FEEDBACK_DEPTH: usize = 2;

/// Default time the runtime loop waits for an output buffer
pub const DEFAULT_DEQUEUE_TIMEOUT_MS: u64 = 100;

/// Default number of kernels the software backend accepts
pub const DEFAULT_KERNEL_BUDGET: usize = 64;

/// Platform-level settings shared by all flows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Maximum output groups of one branch stage
    pub branch_fanout: usize,

    /// In-flight depth of boundary pads that do not request one
    pub queue_depth: usize,

    /// Depth of the H3A statistics / AEWB parameter pads (at least 2)
    pub feedback_depth: usize,

    /// Automatic (backend self-schedules) or manual (runtime steps the graph)
    pub schedule: ScheduleMode,

    /// How long the runtime loop waits for a completed output buffer
    pub dequeue_timeout_ms: u64,

    /// Kernel budget checked during graph verification
    pub kernel_budget: usize,

    /// Hardware targets per module kind, assigned round-robin
    pub targets: BTreeMap<ModuleKind, Vec<String>>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            branch_fanout: DEFAULT_BRANCH_FANOUT,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            feedback_depth: DEFAULT_FEEDBACK_DEPTH,
            schedule: ScheduleMode::default(),
            dequeue_timeout_ms: DEFAULT_DEQUEUE_TIMEOUT_MS,
            kernel_budget: DEFAULT_KERNEL_BUDGET,
            targets: default_targets(),
        }
    }
}

impl EngineSettings {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    /// Options for the graph built from these settings
    pub fn graph_options(&self) -> GraphOptions {
        GraphOptions {
            schedule: self.schedule,
            default_depth: self.queue_depth,
            targets: self.targets.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.branch_fanout == 0 {
            return Err(VisionFlowError::config_at(
                "engine.branch_fanout",
                "must be at least 1",
            ));
        }
        if !(1..=MAX_POOL_CAPACITY).contains(&self.queue_depth) {
            return Err(VisionFlowError::config_at(
                "engine.queue_depth",
                format!("must be within 1..={}", MAX_POOL_CAPACITY),
            ));
        }
        if !(2..=MAX_POOL_CAPACITY).contains(&self.feedback_depth) {
            return Err(VisionFlowError::config_at(
                "engine.feedback_depth",
                format!("must be within 2..={}", MAX_POOL_CAPACITY),
            ));
        }
        if self.kernel_budget == 0 {
            return Err(VisionFlowError::config_at(
                "engine.kernel_budget",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = EngineSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.branch_fanout, 4);
        assert_eq!(settings.dequeue_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let settings: EngineSettings = toml::from_str("branch_fanout = 2\nschedule = \"manual\"").unwrap();
        assert_eq!(settings.branch_fanout, 2);
        assert_eq!(settings.schedule, ScheduleMode::Manual);
        assert_eq!(settings.queue_depth, DEFAULT_QUEUE_DEPTH);
        assert!(settings.targets.contains_key(&ModuleKind::Branch));
    }

    #[test]
    fn test_target_table_override() {
        let settings: EngineSettings =
            toml::from_str("[targets]\nbranch = [\"MSC0\"]").unwrap();
        assert_eq!(settings.targets.len(), 1);
        assert_eq!(settings.targets[&ModuleKind::Branch], vec!["MSC0".to_string()]);
    }

    #[test]
    fn test_invalid_values() {
        let mut settings = EngineSettings {
            feedback_depth: 1,
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("engine.feedback_depth"));

        settings.feedback_depth = 2;
        settings.branch_fanout = 0;
        assert!(settings.validate().is_err());
    }
}
