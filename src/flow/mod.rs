//! Flow compilation.
//!
//! A configuration lists flow entries `(input, model?, output, mosaic)`.
//! Entries sharing an input form one flow; each entry is a subflow. The
//! compiler turns them into a single graph:
//!
//! ```text
//!  [Isp/Ldc/Split] ──► [Branch k] ──► [Preproc] ──► [Inference] ──► [Postproc] ──► [Output]
//!                          │                                            ▲              ▲
//!                          └────────────────────────────────────────────┘──────────────┘
//! ```
//!
//! Identical branch resolutions are shared between subflows
//! ([`resolution`]) and outputs are shared by name ([`outputs`]).

pub mod compiler;
pub mod outputs;
pub mod plan;
pub mod resolution;

pub use compiler::{FlowCompiler, FlowPlan};
pub use outputs::{OutputEntry, OutputSlot, OutputTable};
pub use plan::{
    BranchStage, CompiledPipeline, FeedbackBinding, FlowStats, InputBinding, OutputBinding,
};
pub use resolution::{inference_tuple, GroupLocation, ResolutionEntry, ResolutionTable, SubflowTuples};
