//! Node and module abstraction for the graph engine.
//!
//! Two-layer design:
//! - **`ModulePlugin` trait** — lifecycle callbacks every processing module
//!   implements, and the extension point for externally provided modules.
//! - **`BuiltinModule` enum** — closed set of the modules the flow compiler
//!   instantiates. Callbacks dispatch through a match, so per-module config
//!   and private state live inside each variant without type erasure.
//!
//! `AnyModule` wraps either variant so the graph can handle both uniformly.

use crate::pipeline::backend::{Backend, KernelDesc};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{KernelHandle, NodeId, PadId};
use crate::pipeline::module_kind::ModuleKind;
use crate::pipeline::modules::{
    BranchModule, InferenceModule, IspModule, LdcModule, OutputModule, PostprocModule,
    PreprocModule, SplitModule,
};
use crate::pipeline::pad::{PadSpec, PadView};
use crate::pipeline::target::Target;

/// Context passed to `init`: the module declares its pads here.
pub struct InitContext<'a> {
    node_name: &'a str,
    pub(crate) sinks: Vec<PadSpec>,
    pub(crate) sources: Vec<PadSpec>,
}

impl<'a> InitContext<'a> {
    pub(crate) fn new(node_name: &'a str) -> Self {
        Self {
            node_name,
            sinks: Vec::new(),
            sources: Vec::new(),
        }
    }

    pub fn node_name(&self) -> &str {
        self.node_name
    }

    /// Declare a sink pad; returns its index among the node's sinks.
    pub fn add_sink(&mut self, spec: PadSpec) -> usize {
        self.sinks.push(spec);
        self.sinks.len() - 1
    }

    /// Declare a source pad; returns its index among the node's sources.
    pub fn add_source(&mut self, spec: PadSpec) -> usize {
        self.sources.push(spec);
        self.sources.len() - 1
    }

    /// Error attributed to this node.
    pub fn error(&self, message: impl Into<String>) -> PipelineError {
        PipelineError::module(self.node_name, message)
    }
}

/// Context passed to `materialize`: the node's pads with their final
/// (post-link) exemplars.
pub struct MaterializeContext<'a> {
    pub name: &'a str,
    pub kind: ModuleKind,
    pub target: Option<&'a Target>,
    pub sinks: Vec<PadView>,
    pub sources: Vec<PadView>,
}

impl MaterializeContext<'_> {
    /// Kernel description straight from the pads.
    pub fn kernel_desc(&self) -> KernelDesc {
        KernelDesc {
            name: self.name.to_string(),
            kind: self.kind,
            target: self.target.cloned(),
            inputs: self.sinks.iter().map(|p| p.exemplar.clone()).collect(),
            outputs: self.sources.iter().map(|p| p.exemplar.clone()).collect(),
        }
    }

    pub fn error(&self, message: impl Into<String>) -> PipelineError {
        PipelineError::module(self.name, message)
    }
}

/// Context passed to `post_materialize`, after global verification.
pub struct PostMaterializeContext<'a> {
    pub name: &'a str,
    pub kernel: KernelHandle,
    backend: &'a dyn Backend,
}

impl<'a> PostMaterializeContext<'a> {
    pub(crate) fn new(name: &'a str, kernel: KernelHandle, backend: &'a dyn Backend) -> Self {
        Self {
            name,
            kernel,
            backend,
        }
    }

    /// One-time configuration upload to this node's kernel.
    pub fn upload(&self, key: &str, data: &[u8]) -> PipelineResult<()> {
        self.backend
            .upload(self.kernel, key, data)
            .map_err(|e| PipelineError::module(self.name, format!("upload '{}': {}", key, e)))
    }
}

/// Lifecycle callbacks of a processing module.
pub trait ModulePlugin: Send {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Custom
    }

    /// Called once when the node is declared. Declares pads and checks
    /// module-specific preconditions.
    fn init(&mut self, ctx: &mut InitContext) -> PipelineResult<()>;

    /// Describe the backend kernel from the final pad shapes.
    fn materialize(&mut self, ctx: &MaterializeContext) -> PipelineResult<KernelDesc> {
        Ok(ctx.kernel_desc())
    }

    /// One-time configuration once the whole graph is verified.
    fn post_materialize(&mut self, _ctx: &PostMaterializeContext) -> PipelineResult<()> {
        Ok(())
    }

    /// Called when the graph is torn down.
    fn teardown(&mut self) {}
}

/// Enum dispatch for built-in modules.
pub enum BuiltinModule {
    Isp(IspModule),
    Ldc(LdcModule),
    Split(SplitModule),
    Branch(BranchModule),
    Preproc(PreprocModule),
    Inference(InferenceModule),
    Postproc(PostprocModule),
    Output(OutputModule),
}

impl BuiltinModule {
    pub fn kind(&self) -> ModuleKind {
        match self {
            BuiltinModule::Isp(m) => m.kind(),
            BuiltinModule::Ldc(m) => m.kind(),
            BuiltinModule::Split(m) => m.kind(),
            BuiltinModule::Branch(m) => m.kind(),
            BuiltinModule::Preproc(m) => m.kind(),
            BuiltinModule::Inference(m) => m.kind(),
            BuiltinModule::Postproc(m) => m.kind(),
            BuiltinModule::Output(m) => m.kind(),
        }
    }

    pub fn init(&mut self, ctx: &mut InitContext) -> PipelineResult<()> {
        match self {
            BuiltinModule::Isp(m) => m.init(ctx),
            BuiltinModule::Ldc(m) => m.init(ctx),
            BuiltinModule::Split(m) => m.init(ctx),
            BuiltinModule::Branch(m) => m.init(ctx),
            BuiltinModule::Preproc(m) => m.init(ctx),
            BuiltinModule::Inference(m) => m.init(ctx),
            BuiltinModule::Postproc(m) => m.init(ctx),
            BuiltinModule::Output(m) => m.init(ctx),
        }
    }

    pub fn materialize(&mut self, ctx: &MaterializeContext) -> PipelineResult<KernelDesc> {
        match self {
            BuiltinModule::Isp(m) => m.materialize(ctx),
            BuiltinModule::Ldc(m) => m.materialize(ctx),
            BuiltinModule::Split(m) => m.materialize(ctx),
            BuiltinModule::Branch(m) => m.materialize(ctx),
            BuiltinModule::Preproc(m) => m.materialize(ctx),
            BuiltinModule::Inference(m) => m.materialize(ctx),
            BuiltinModule::Postproc(m) => m.materialize(ctx),
            BuiltinModule::Output(m) => m.materialize(ctx),
        }
    }

    pub fn post_materialize(&mut self, ctx: &PostMaterializeContext) -> PipelineResult<()> {
        match self {
            BuiltinModule::Isp(m) => m.post_materialize(ctx),
            BuiltinModule::Ldc(m) => m.post_materialize(ctx),
            BuiltinModule::Split(m) => m.post_materialize(ctx),
            BuiltinModule::Branch(m) => m.post_materialize(ctx),
            BuiltinModule::Preproc(m) => m.post_materialize(ctx),
            BuiltinModule::Inference(m) => m.post_materialize(ctx),
            BuiltinModule::Postproc(m) => m.post_materialize(ctx),
            BuiltinModule::Output(m) => m.post_materialize(ctx),
        }
    }

    pub fn teardown(&mut self) {
        match self {
            BuiltinModule::Isp(m) => m.teardown(),
            BuiltinModule::Ldc(m) => m.teardown(),
            BuiltinModule::Split(m) => m.teardown(),
            BuiltinModule::Branch(m) => m.teardown(),
            BuiltinModule::Preproc(m) => m.teardown(),
            BuiltinModule::Inference(m) => m.teardown(),
            BuiltinModule::Postproc(m) => m.teardown(),
            BuiltinModule::Output(m) => m.teardown(),
        }
    }
}

/// Wrapper that holds either a built-in module (enum dispatch) or a plugin
/// (trait object).
pub enum AnyModule {
    Builtin(BuiltinModule),
    Plugin(Box<dyn ModulePlugin>),
}

impl AnyModule {
    pub fn kind(&self) -> ModuleKind {
        match self {
            AnyModule::Builtin(m) => m.kind(),
            AnyModule::Plugin(m) => m.kind(),
        }
    }

    pub fn init(&mut self, ctx: &mut InitContext) -> PipelineResult<()> {
        match self {
            AnyModule::Builtin(m) => m.init(ctx),
            AnyModule::Plugin(m) => m.init(ctx),
        }
    }

    pub fn materialize(&mut self, ctx: &MaterializeContext) -> PipelineResult<KernelDesc> {
        match self {
            AnyModule::Builtin(m) => m.materialize(ctx),
            AnyModule::Plugin(m) => m.materialize(ctx),
        }
    }

    pub fn post_materialize(&mut self, ctx: &PostMaterializeContext) -> PipelineResult<()> {
        match self {
            AnyModule::Builtin(m) => m.post_materialize(ctx),
            AnyModule::Plugin(m) => m.post_materialize(ctx),
        }
    }

    pub fn teardown(&mut self) {
        match self {
            AnyModule::Builtin(m) => m.teardown(),
            AnyModule::Plugin(m) => m.teardown(),
        }
    }
}

impl From<BuiltinModule> for AnyModule {
    fn from(module: BuiltinModule) -> Self {
        AnyModule::Builtin(module)
    }
}

impl From<Box<dyn ModulePlugin>> for AnyModule {
    fn from(module: Box<dyn ModulePlugin>) -> Self {
        AnyModule::Plugin(module)
    }
}

/// A declared processing stage.
pub struct Node {
    pub id: NodeId,
    /// Unique within the graph.
    pub name: String,
    pub kind: ModuleKind,
    pub target: Option<Target>,
    pub module: AnyModule,
    pub sinks: Vec<PadId>,
    pub sources: Vec<PadId>,
    /// Backend kernel, set during materialization.
    pub kernel: Option<KernelHandle>,
}

impl Node {
    pub fn sink(&self, index: usize) -> Option<PadId> {
        self.sinks.get(index).copied()
    }

    pub fn source(&self, index: usize) -> Option<PadId> {
        self.sources.get(index).copied()
    }
}
