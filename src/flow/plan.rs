//! Result of flow compilation: the materialized graph plus the boundary pads
//! the runtime loop must feed and drain.

use crate::config::{InputSpec, OutputSpec};
use crate::pipeline::id::{NodeId, PadId};
use crate::pipeline::modules::BranchGroup;
use crate::pipeline::Graph;

/// Statistics pad / parameter pad pair of a camera's AEWB loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackBinding {
    /// Boundary source carrying H3A statistics.
    pub stats: PadId,
    /// Boundary sink accepting AEWB parameters.
    pub params: PadId,
}

/// Boundary sink of a flow's input stage.
#[derive(Debug, Clone, PartialEq)]
pub struct InputBinding {
    pub name: String,
    pub spec: InputSpec,
    pub frame: PadId,
    pub feedback: Option<FeedbackBinding>,
}

/// Boundary source of an output node.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputBinding {
    pub name: String,
    pub spec: OutputSpec,
    pub frame: PadId,
    /// Number of compositing slots (referencing subflows).
    pub slots: usize,
}

/// One synthesized branch stage.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchStage {
    pub flow: usize,
    pub node: NodeId,
    pub groups: Vec<BranchGroup>,
}

/// Statistics about a compiled pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowStats {
    /// Number of flows (distinct inputs)
    pub flows: usize,

    /// Number of subflows across all flows
    pub subflows: usize,

    /// Number of output nodes after deduplication
    pub outputs: usize,

    /// Number of unique branch resolutions across all flows
    pub unique_resolutions: usize,

    /// Number of synthesized branch stages
    pub branch_stages: usize,

    /// Number of pre-process / inference / post-process chains
    pub inference_chains: usize,

    /// Total number of graph nodes
    pub nodes: usize,

    /// Number of boundary pads (graph parameters)
    pub boundary_pads: usize,

    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

/// Materialized graph and its external bindings.
pub struct CompiledPipeline {
    pub graph: Graph,
    pub inputs: Vec<InputBinding>,
    pub outputs: Vec<OutputBinding>,
    pub branches: Vec<BranchStage>,
    pub stats: FlowStats,
}

impl CompiledPipeline {
    /// Branch stages of one flow, in declaration order.
    pub fn branches_of(&self, flow: usize) -> impl Iterator<Item = &BranchStage> {
        self.branches.iter().filter(move |b| b.flow == flow)
    }

    pub fn output(&self, name: &str) -> Option<&OutputBinding> {
        self.outputs.iter().find(|o| o.name == name)
    }
}
