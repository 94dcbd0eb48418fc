//! Dataflow graph engine.
//!
//! Typed nodes are wired together through pads; peerless (boundary) pads get
//! pooled, queue-managed buffers through which external producers and
//! consumers exchange data with the backend.
//!
//! # Architecture
//!
//! ```text
//!  producer ──► [pool] ──► [Isp] ──► [Branch] ──► [Preproc] ──► [Inference]
//!                                        │             │              │
//!                                        │             └──► [Postproc] ◄┘
//!                                        ▼                     │
//!                                    [Output] ◄────────────────┘
//!                                        │
//!                                      [pool] ──► consumer
//! ```
//!
//! # Design
//!
//! - **Arenas with stable IDs** — nodes and pads live in `Vec`s indexed by
//!   `NodeId` / `PadId`; nothing is reallocated after declaration.
//! - **Enum dispatch** — `BuiltinModule` for the built-in modules,
//!   `ModulePlugin` trait objects for everything else.
//! - **Explicit lifecycle** — `Graph` is a `Declaring → Materialized →
//!   TornDown` state machine.
//! - **Move-only buffers** — `Buffer` handles are owned by exactly one of
//!   free-list, in-flight ring or caller.

pub mod backend;
pub mod error;
pub mod exemplar;
pub mod graph;
pub mod id;
pub mod module_kind;
pub mod modules;
pub mod node;
pub mod pad;
pub mod pool;
pub mod target;
pub mod topology;

pub use backend::{Backend, KernelDesc, KernelPort, SoftwareBackend};
pub use error::{BackendError, EnqueueError, GraphState, PipelineError, PipelineResult, QueueError};
pub use exemplar::{Exemplar, Justification, RawContainer, TensorType};
pub use graph::{Graph, GraphOptions, DEFAULT_PAD_DEPTH};
pub use id::{KernelHandle, NodeId, PadId, ParamId};
pub use module_kind::ModuleKind;
pub use node::{
    AnyModule, BuiltinModule, InitContext, MaterializeContext, ModulePlugin, Node,
    PostMaterializeContext,
};
pub use pad::{Pad, PadDirection, PadSpec, PadView};
pub use pool::{Buffer, BufferPool, PoolStats, MAX_POOL_CAPACITY};
pub use target::{default_targets, Target, TargetAllocator};
pub use topology::{Topology, TopologyStats};
