//! Output deduplication.
//!
//! Outputs are shared by name: however many subflows reference `disp0`,
//! the graph gets one output node for it, with one compositing slot per
//! referencing subflow.

use crate::config::{FlowSpec, OutputSpec, PipelineConfig};
use crate::error::{Result, VisionFlowError};
use crate::types::Rect;

/// One compositing input of an output node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSlot {
    pub flow: usize,
    pub subflow: usize,
    pub window: Rect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputEntry {
    pub name: String,
    pub spec: OutputSpec,
    pub slots: Vec<OutputSlot>,
}

impl OutputEntry {
    pub fn windows(&self) -> Vec<Rect> {
        self.slots.iter().map(|s| s.window).collect()
    }
}

/// Outputs in first-reference order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputTable {
    entries: Vec<OutputEntry>,
}

impl OutputTable {
    pub fn build(config: &PipelineConfig, flows: &[FlowSpec]) -> Result<Self> {
        let mut table = Self::default();
        for (f, flow) in flows.iter().enumerate() {
            for (s, subflow) in flow.subflows.iter().enumerate() {
                let slot = OutputSlot {
                    flow: f,
                    subflow: s,
                    window: subflow.mosaic,
                };
                match table.entries.iter_mut().find(|e| e.name == subflow.output) {
                    Some(entry) => entry.slots.push(slot),
                    None => {
                        let spec = config.outputs.get(&subflow.output).ok_or_else(|| {
                            VisionFlowError::config_at(
                                format!("flows[{}].output", subflow.entry),
                                format!("unknown output '{}'", subflow.output),
                            )
                        })?;
                        table.entries.push(OutputEntry {
                            name: subflow.output.clone(),
                            spec: spec.clone(),
                            slots: vec![slot],
                        });
                    }
                }
            }
        }
        Ok(table)
    }

    pub fn entries(&self) -> &[OutputEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Output entry and slot index serving a subflow.
    pub fn slot_of(&self, flow: usize, subflow: usize) -> Option<(usize, usize)> {
        self.entries.iter().enumerate().find_map(|(e, entry)| {
            entry
                .slots
                .iter()
                .position(|s| s.flow == flow && s.subflow == subflow)
                .map(|slot| (e, slot))
        })
    }
}
