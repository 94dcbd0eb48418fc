//! The dataflow graph: node and pad arenas, linking and materialization.
//!
//! A graph moves through three states:
//!
//! ```text
//! Declaring ──materialize()──► Materialized ──teardown()──► TornDown
//!     └──────────── materialize() fails ──────────────────────┘
//! ```
//!
//! Nodes are added and pads linked only while `Declaring`. `materialize`
//! runs once: it creates one backend kernel per node, turns every peerless
//! pad into a graph parameter with its own `BufferPool`, connects linked
//! pads directly, verifies the whole graph and finally lets each module do
//! its post-verification configuration. Any failure releases what was
//! created and leaves the graph `TornDown`.

use crate::pipeline::backend::{Backend, KernelPort};
use crate::pipeline::error::{GraphState, PipelineError, PipelineResult};
use crate::pipeline::id::{NodeId, PadId, ParamId};
use crate::pipeline::module_kind::ModuleKind;
use crate::pipeline::node::{AnyModule, InitContext, MaterializeContext, Node, PostMaterializeContext};
use crate::pipeline::pad::{Pad, PadDirection, PadSpec, PadView};
use crate::pipeline::pool::BufferPool;
use crate::pipeline::target::{default_targets, TargetAllocator};
use crate::pipeline::topology::{Topology, TopologyStats};
use crate::types::ScheduleMode;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

/// Default in-flight depth of a boundary pad that does not request one.
pub const DEFAULT_PAD_DEPTH: usize = 4;

/// Graph-wide options fixed at construction.
#[derive(Debug, Clone)]
pub struct GraphOptions {
    pub schedule: ScheduleMode,
    pub default_depth: usize,
    pub targets: BTreeMap<ModuleKind, Vec<String>>,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            schedule: ScheduleMode::Automatic,
            default_depth: DEFAULT_PAD_DEPTH,
            targets: default_targets(),
        }
    }
}

/// A declared or materialized processing graph.
pub struct Graph {
    state: GraphState,
    backend: Arc<dyn Backend>,
    options: GraphOptions,
    allocator: TargetAllocator,
    nodes: Vec<Node>,
    pads: Vec<Pad>,
    names: HashSet<String>,
    /// Boundary pads in parameter order (`ParamId` indexes this list).
    params: Vec<PadId>,
    stats: TopologyStats,
}

impl Graph {
    pub fn new(backend: Arc<dyn Backend>, options: GraphOptions) -> Self {
        let allocator = TargetAllocator::new(&options.targets);
        Self {
            state: GraphState::Declaring,
            backend,
            options,
            allocator,
            nodes: Vec::new(),
            pads: Vec::new(),
            names: HashSet::new(),
            params: Vec::new(),
            stats: TopologyStats::default(),
        }
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn schedule_mode(&self) -> ScheduleMode {
        self.options.schedule
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn stats(&self) -> &TopologyStats {
        &self.stats
    }

    fn require(&self, state: GraphState, operation: &'static str) -> PipelineResult<()> {
        if self.state != state {
            return Err(PipelineError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn unique_name(&self, requested: &str, kind: ModuleKind) -> String {
        let base = if requested.is_empty() {
            kind.name_prefix()
        } else {
            requested
        };
        if !self.names.contains(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{}_{}", base, n))
            .find(|candidate| !self.names.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Declare a node. The module's `init` callback runs immediately and
    /// declares the node's pads.
    pub fn add_node(
        &mut self,
        name: &str,
        module: impl Into<AnyModule>,
    ) -> PipelineResult<NodeId> {
        self.require(GraphState::Declaring, "add_node")?;
        let mut module = module.into();
        let kind = module.kind();
        let name = self.unique_name(name, kind);

        let mut ctx = InitContext::new(&name);
        module.init(&mut ctx)?;
        let InitContext { sinks, sources, .. } = ctx;

        for spec in sinks.iter().chain(sources.iter()) {
            if spec.channels == 0 {
                return Err(PipelineError::module(
                    &name,
                    format!("pad '{}' declares zero channels", spec.name),
                ));
            }
        }

        let id = NodeId(self.nodes.len() as u32);
        let sink_count = sinks.len();
        let sink_ids = self.push_pads(id, PadDirection::Sink, sinks, 0);
        let source_ids = self.push_pads(id, PadDirection::Source, sources, sink_count);
        let target = self.allocator.next(kind);

        tracing::debug!(
            "Added node {:?} '{}' ({}) on {} with {} sinks / {} sources",
            id,
            name,
            kind,
            target.as_ref().map_or("any", |t| t.as_str()),
            sink_ids.len(),
            source_ids.len()
        );

        self.names.insert(name.clone());
        self.nodes.push(Node {
            id,
            name,
            kind,
            target,
            module,
            sinks: sink_ids,
            sources: source_ids,
            kernel: None,
        });
        Ok(id)
    }

    fn push_pads(
        &mut self,
        node: NodeId,
        direction: PadDirection,
        specs: Vec<PadSpec>,
        port_offset: usize,
    ) -> Vec<PadId> {
        specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| {
                let id = PadId(self.pads.len() as u32);
                self.pads.push(Pad {
                    id,
                    node,
                    name: spec.name,
                    direction,
                    index,
                    port_index: port_offset + index,
                    channels: spec.channels,
                    depth: spec.depth.unwrap_or(self.options.default_depth),
                    peer: None,
                    exemplar: Arc::new(spec.exemplar),
                    pool: None,
                    param: None,
                });
                id
            })
            .collect()
    }

    /// Link a source pad to a sink pad with a direct, unqueued connection.
    pub fn link(&mut self, source: PadId, sink: PadId) -> PipelineResult<()> {
        self.require(GraphState::Declaring, "link")?;
        let src = self.pad(source)?;
        let dst = self.pad(sink)?;

        if src.direction != PadDirection::Source {
            return Err(PipelineError::WrongDirection {
                pad: source,
                expected: PadDirection::Source,
                actual: src.direction,
            });
        }
        if dst.direction != PadDirection::Sink {
            return Err(PipelineError::WrongDirection {
                pad: sink,
                expected: PadDirection::Sink,
                actual: dst.direction,
            });
        }
        if src.is_linked() {
            return Err(PipelineError::AlreadyLinked(source));
        }
        if dst.is_linked() {
            return Err(PipelineError::AlreadyLinked(sink));
        }
        if src.channels != dst.channels {
            return Err(PipelineError::ChannelMismatch {
                source_pad: source,
                sink_pad: sink,
                source_channels: src.channels,
                sink_channels: dst.channels,
            });
        }
        if src.exemplar != dst.exemplar {
            return Err(PipelineError::TypeMismatch {
                source_pad: source,
                sink_pad: sink,
                source_type: src.exemplar.to_string(),
                sink_type: dst.exemplar.to_string(),
            });
        }

        let exemplar = src.exemplar.clone();
        tracing::debug!(
            "Linked {}.{} -> {}.{} ({})",
            self.nodes[src.node.index()].name,
            src.name,
            self.nodes[dst.node.index()].name,
            dst.name,
            exemplar
        );

        self.pads[source.index()].peer = Some(sink);
        let dst = &mut self.pads[sink.index()];
        dst.peer = Some(source);
        dst.exemplar = exemplar;
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> PipelineResult<&Node> {
        self.nodes.get(id.index()).ok_or(PipelineError::UnknownNode(id))
    }

    pub fn pad(&self, id: PadId) -> PipelineResult<&Pad> {
        self.pads.get(id.index()).ok_or(PipelineError::UnknownPad(id))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn pads(&self) -> &[Pad] {
        &self.pads
    }

    pub fn find_node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// The `index`-th sink pad of `node`.
    pub fn sink_pad(&self, node: NodeId, index: usize) -> PipelineResult<PadId> {
        let n = self.node(node)?;
        n.sink(index)
            .ok_or_else(|| PipelineError::module(&n.name, format!("no sink pad {}", index)))
    }

    /// The `index`-th source pad of `node`.
    pub fn source_pad(&self, node: NodeId, index: usize) -> PipelineResult<PadId> {
        let n = self.node(node)?;
        n.source(index)
            .ok_or_else(|| PipelineError::module(&n.name, format!("no source pad {}", index)))
    }

    /// Pads promoted to graph parameters, in parameter order.
    pub fn boundary_pads(&self) -> &[PadId] {
        &self.params
    }

    /// The pool attached to a boundary pad.
    pub fn pool(&self, pad: PadId) -> Option<&BufferPool> {
        self.pads.get(pad.index())?.pool.as_ref()
    }

    /// The boundary pad behind a parameter.
    pub fn param_pad(&self, param: ParamId) -> Option<PadId> {
        self.params.get(param.index()).copied()
    }

    fn node_links(&self) -> Vec<(usize, usize)> {
        self.pads
            .iter()
            .filter(|p| p.is_source())
            .filter_map(|p| {
                let peer = p.peer?;
                Some((p.node.index(), self.pads[peer.index()].node.index()))
            })
            .collect()
    }

    /// Create backend resources for the whole graph. Runs exactly once.
    pub fn materialize(&mut self) -> PipelineResult<()> {
        self.require(GraphState::Declaring, "materialize")?;
        let start = Instant::now();

        match self.materialize_inner() {
            Ok(()) => {
                self.stats.verify_time_us = start.elapsed().as_micros() as u64;
                self.state = GraphState::Materialized;
                tracing::info!(
                    "Graph materialized: {} nodes, {} links, {} boundary pads, {} mode ({}us)",
                    self.stats.total_nodes,
                    self.stats.links,
                    self.params.len(),
                    self.options.schedule,
                    self.stats.verify_time_us
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Materialization failed, releasing resources: {}", e);
                self.release_resources();
                self.state = GraphState::TornDown;
                Err(e)
            }
        }
    }

    fn materialize_inner(&mut self) -> PipelineResult<()> {
        for i in 0..self.nodes.len() {
            self.materialize_node(i)?;
        }

        for pad in self.pads.iter().filter(|p| p.is_source()) {
            let Some(peer) = pad.peer else { continue };
            let peer = &self.pads[peer.index()];
            let from = self.kernel_port(pad)?;
            let to = self.kernel_port(peer)?;
            self.backend.connect(from, to)?;
        }

        // Global verification
        let topology = Topology::new(self.nodes.len(), &self.node_links());
        topology.order()?;
        self.stats = topology.stats();
        self.backend.verify(self.options.schedule)?;

        for node in &mut self.nodes {
            let Some(kernel) = node.kernel else { continue };
            let ctx = PostMaterializeContext::new(&node.name, kernel, self.backend.as_ref());
            node.module.post_materialize(&ctx)?;
        }
        Ok(())
    }

    fn kernel_port(&self, pad: &Pad) -> PipelineResult<KernelPort> {
        let node = &self.nodes[pad.node.index()];
        let kernel = node
            .kernel
            .ok_or_else(|| PipelineError::module(&node.name, "kernel not created"))?;
        Ok(KernelPort {
            kernel,
            port: pad.port_index,
        })
    }

    fn materialize_node(&mut self, index: usize) -> PipelineResult<()> {
        let view = |ids: &[PadId]| -> Vec<PadView> {
            ids.iter().map(|id| PadView::from(&self.pads[id.index()])).collect()
        };
        let node = &self.nodes[index];
        let sinks = view(&node.sinks);
        let sources = view(&node.sources);
        let name = node.name.clone();
        let kind = node.kind;
        let target = node.target.clone();

        let ctx = MaterializeContext {
            name: &name,
            kind,
            target: target.as_ref(),
            sinks,
            sources,
        };
        let desc = self.nodes[index].module.materialize(&ctx)?;
        let kernel = self.backend.create_kernel(&desc)?;
        self.nodes[index].kernel = Some(kernel);
        tracing::debug!("Materialized '{}' as {:?}", name, kernel);

        let pad_ids: Vec<PadId> = {
            let node = &self.nodes[index];
            node.sinks.iter().chain(node.sources.iter()).copied().collect()
        };
        for pad_id in pad_ids {
            let pad = &self.pads[pad_id.index()];
            if pad.is_linked() {
                continue;
            }
            let param = ParamId(self.params.len() as u32);
            self.backend.add_parameter(
                param,
                KernelPort {
                    kernel,
                    port: pad.port_index,
                },
                pad.direction,
                pad.depth,
            )?;
            let pool = BufferPool::new(
                pad_id,
                param,
                pad.exemplar.clone(),
                pad.channels,
                pad.depth,
                self.backend.clone(),
            )
            .map_err(|e| PipelineError::module(&name, format!("pad '{}': {}", pad.name, e)))?;

            tracing::debug!(
                "Boundary pad {}.{} -> {} (depth {})",
                name,
                pad.name,
                param,
                pad.depth
            );
            let pad = &mut self.pads[pad_id.index()];
            pad.pool = Some(pool);
            pad.param = Some(param);
            self.params.push(pad_id);
        }
        Ok(())
    }

    /// Run one graph execution. Only valid in manual schedule mode.
    pub fn step(&self) -> PipelineResult<()> {
        self.require(GraphState::Materialized, "step")?;
        if self.options.schedule != ScheduleMode::Manual {
            return Err(PipelineError::InvalidState {
                operation: "step in automatic mode",
                state: self.state,
            });
        }
        self.backend.process()?;
        Ok(())
    }

    /// Complete every in-flight buffer so pools can be drained.
    pub fn flush(&self) {
        if self.state == GraphState::Materialized {
            self.backend.flush();
        }
    }

    fn release_resources(&mut self) {
        for node in self.nodes.iter_mut().rev() {
            node.module.teardown();
            if let Some(kernel) = node.kernel.take() {
                self.backend.release_kernel(kernel);
            }
        }
        for pad in &mut self.pads {
            pad.pool = None;
            pad.param = None;
        }
        self.params.clear();
        self.backend.shutdown();
    }

    /// Release all backend resources. Idempotent.
    pub fn teardown(&mut self) {
        if self.state == GraphState::TornDown {
            return;
        }
        self.release_resources();
        self.state = GraphState::TornDown;
        tracing::info!("Graph torn down ({} nodes)", self.nodes.len());
    }

    /// Graphviz rendering of nodes, links and boundary parameters.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph visionflow {\n    rankdir=LR;\n    node [shape=box];\n");
        for node in &self.nodes {
            let target = node.target.as_ref().map_or("any", |t| t.as_str());
            let _ = writeln!(
                out,
                "    n{} [label=\"{}\\n{} @ {}\"];",
                node.id.0, node.name, node.kind, target
            );
        }
        for pad in self.pads.iter().filter(|p| p.is_source()) {
            let Some(peer) = pad.peer else { continue };
            let peer = &self.pads[peer.index()];
            let _ = writeln!(
                out,
                "    n{} -> n{} [label=\"{} -> {}\\n{}\"];",
                pad.node.0, peer.node.0, pad.name, peer.name, pad.exemplar
            );
        }
        for pad in self.pads.iter().filter(|p| !p.is_linked()) {
            let label = match pad.param {
                Some(param) => format!("{}\\n{} depth {}", pad.name, param, pad.depth),
                None => format!("{}\\ndepth {}", pad.name, pad.depth),
            };
            let _ = writeln!(
                out,
                "    p{} [shape=ellipse, label=\"{}\"];",
                pad.id.0, label
            );
            match pad.direction {
                PadDirection::Sink => {
                    let _ = writeln!(out, "    p{} -> n{};", pad.id.0, pad.node.0);
                }
                PadDirection::Source => {
                    let _ = writeln!(out, "    n{} -> p{};", pad.node.0, pad.id.0);
                }
            }
        }
        out.push_str("}\n");
        out
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::backend::{KernelDesc, MockBackend, SoftwareBackend};
    use crate::pipeline::error::BackendError;
    use crate::pipeline::exemplar::Exemplar;
    use crate::pipeline::id::KernelHandle;
    use crate::pipeline::node::ModulePlugin;
    use crate::types::PixelFormat;
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Stage {
        sinks: Vec<PadSpec>,
        sources: Vec<PadSpec>,
        post: Arc<AtomicUsize>,
    }

    impl Stage {
        fn new(sinks: Vec<PadSpec>, sources: Vec<PadSpec>) -> Box<dyn ModulePlugin> {
            Box::new(Stage {
                sinks,
                sources,
                post: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    impl ModulePlugin for Stage {
        fn init(&mut self, ctx: &mut InitContext) -> PipelineResult<()> {
            for spec in self.sinks.drain(..) {
                ctx.add_sink(spec);
            }
            for spec in self.sources.drain(..) {
                ctx.add_source(spec);
            }
            Ok(())
        }

        fn post_materialize(&mut self, _ctx: &PostMaterializeContext) -> PipelineResult<()> {
            self.post.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn image(w: u32, h: u32) -> Exemplar {
        Exemplar::image(PixelFormat::Nv12, w, h)
    }

    fn software_graph() -> (Graph, Arc<SoftwareBackend>) {
        let backend = Arc::new(SoftwareBackend::new(16));
        (Graph::new(backend.clone(), GraphOptions::default()), backend)
    }

    fn producer(graph: &mut Graph, exemplar: Exemplar) -> NodeId {
        graph
            .add_node(
                "producer",
                Stage::new(vec![], vec![PadSpec::new("out", exemplar).with_depth(4)]),
            )
            .unwrap()
    }

    fn consumer(graph: &mut Graph, exemplar: Exemplar) -> NodeId {
        graph
            .add_node("consumer", Stage::new(vec![PadSpec::new("in", exemplar)], vec![]))
            .unwrap()
    }

    #[test]
    fn test_duplicate_names_are_disambiguated() {
        let (mut graph, _) = software_graph();
        let a = producer(&mut graph, image(8, 8));
        let b = producer(&mut graph, image(8, 8));
        assert_eq!(graph.node(a).unwrap().name, "producer");
        assert_eq!(graph.node(b).unwrap().name, "producer_1");
    }

    #[test]
    fn test_link_is_symmetric_and_shares_exemplar() {
        let (mut graph, _) = software_graph();
        let p = producer(&mut graph, image(64, 48));
        let c = consumer(&mut graph, image(64, 48));
        let src = graph.source_pad(p, 0).unwrap();
        let dst = graph.sink_pad(c, 0).unwrap();
        graph.link(src, dst).unwrap();

        assert_eq!(graph.pad(src).unwrap().peer, Some(dst));
        assert_eq!(graph.pad(dst).unwrap().peer, Some(src));
        assert!(Arc::ptr_eq(
            &graph.pad(src).unwrap().exemplar,
            &graph.pad(dst).unwrap().exemplar
        ));
    }

    #[test]
    fn test_link_errors() {
        let (mut graph, _) = software_graph();
        let p = producer(&mut graph, image(64, 48));
        let c = consumer(&mut graph, image(64, 48));
        let wrong = consumer(&mut graph, image(32, 48));
        let multi = graph
            .add_node(
                "multi",
                Stage::new(vec![PadSpec::new("in", image(64, 48)).with_channels(2)], vec![]),
            )
            .unwrap();
        let src = graph.source_pad(p, 0).unwrap();
        let dst = graph.sink_pad(c, 0).unwrap();

        assert!(matches!(
            graph.link(dst, src),
            Err(PipelineError::WrongDirection { .. })
        ));
        assert!(matches!(
            graph.link(src, graph.sink_pad(wrong, 0).unwrap()),
            Err(PipelineError::TypeMismatch { .. })
        ));
        assert!(matches!(
            graph.link(src, graph.sink_pad(multi, 0).unwrap()),
            Err(PipelineError::ChannelMismatch { .. })
        ));
        graph.link(src, dst).unwrap();
        assert!(matches!(
            graph.link(src, dst),
            Err(PipelineError::AlreadyLinked(_))
        ));
        assert!(matches!(
            graph.link(PadId(99), dst),
            Err(PipelineError::UnknownPad(_))
        ));
    }

    #[test]
    fn test_linked_pads_get_no_pool() {
        let (mut graph, backend) = software_graph();
        let p = graph
            .add_node(
                "camera",
                Stage::new(
                    vec![PadSpec::new("ctrl", Exemplar::user_data("ctrl", 16)).with_depth(2)],
                    vec![PadSpec::new("out", image(64, 48)).with_depth(4)],
                ),
            )
            .unwrap();
        let c = graph
            .add_node(
                "display",
                Stage::new(
                    vec![PadSpec::new("in", image(64, 48))],
                    vec![PadSpec::new("stats", Exemplar::user_data("stats", 32)).with_depth(3)],
                ),
            )
            .unwrap();
        let src = graph.source_pad(p, 0).unwrap();
        let dst = graph.sink_pad(c, 0).unwrap();
        graph.link(src, dst).unwrap();
        graph.materialize().unwrap();

        assert!(graph.pool(src).is_none());
        assert!(graph.pool(dst).is_none());
        let ctrl = graph.sink_pad(p, 0).unwrap();
        let stats = graph.source_pad(c, 0).unwrap();
        assert_eq!(graph.pool(ctrl).unwrap().capacity(), 2);
        assert_eq!(graph.pool(stats).unwrap().capacity(), 3);
        assert_eq!(graph.boundary_pads(), &[ctrl, stats]);
        assert_eq!(backend.connection_count(), 1);
        assert_eq!(backend.kernel_count(), 2);
    }

    #[test]
    fn test_state_machine() {
        let (mut graph, _) = software_graph();
        let p = producer(&mut graph, image(8, 8));
        let c = consumer(&mut graph, image(8, 8));
        assert_eq!(graph.state(), GraphState::Declaring);
        graph.materialize().unwrap();
        assert_eq!(graph.state(), GraphState::Materialized);

        let src = graph.source_pad(p, 0).unwrap();
        let dst = graph.sink_pad(c, 0).unwrap();
        assert!(matches!(
            graph.link(src, dst),
            Err(PipelineError::InvalidState { .. })
        ));
        assert!(matches!(
            graph.materialize(),
            Err(PipelineError::InvalidState { .. })
        ));
        assert!(graph.add_node("late", Stage::new(vec![], vec![])).is_err());

        graph.teardown();
        assert_eq!(graph.state(), GraphState::TornDown);
        assert!(graph.pool(src).is_none());
        graph.teardown();
    }

    #[test]
    fn test_step_requires_manual_mode() {
        let (mut graph, _) = software_graph();
        producer(&mut graph, image(8, 8));
        assert!(graph.step().is_err());
        graph.materialize().unwrap();
        assert!(matches!(
            graph.step(),
            Err(PipelineError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_cycle_fails_verification() {
        let (mut graph, backend) = software_graph();
        let spec = || PadSpec::new("x", image(8, 8));
        let a = graph
            .add_node("a", Stage::new(vec![spec()], vec![spec()]))
            .unwrap();
        let b = graph
            .add_node("b", Stage::new(vec![spec()], vec![spec()]))
            .unwrap();
        graph
            .link(graph.source_pad(a, 0).unwrap(), graph.sink_pad(b, 0).unwrap())
            .unwrap();
        graph
            .link(graph.source_pad(b, 0).unwrap(), graph.sink_pad(a, 0).unwrap())
            .unwrap();
        assert!(matches!(
            graph.materialize(),
            Err(PipelineError::CycleDetected { .. })
        ));
        assert_eq!(graph.state(), GraphState::TornDown);
        assert_eq!(backend.kernel_count(), 0);
    }

    #[test]
    fn test_kernel_creation_failure_releases_earlier_kernels() {
        let mut mock = MockBackend::new();
        let mut calls = 0;
        mock.expect_create_kernel().returning(move |_: &KernelDesc| {
            calls += 1;
            if calls == 1 {
                Ok(KernelHandle(0))
            } else {
                Err(BackendError::KernelCreation("no free target".into()))
            }
        });
        mock.expect_add_parameter().returning(|_, _, _, _| Ok(()));
        mock.expect_release_kernel()
            .with(eq(KernelHandle(0)))
            .times(1)
            .return_const(());
        mock.expect_verify().never();
        mock.expect_shutdown().times(1).return_const(());

        let mut graph = Graph::new(Arc::new(mock), GraphOptions::default());
        producer(&mut graph, image(8, 8));
        producer(&mut graph, image(8, 8));
        let err = graph.materialize().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Backend(BackendError::KernelCreation(_))
        ));
        assert_eq!(graph.state(), GraphState::TornDown);
        assert!(graph.boundary_pads().is_empty());
    }

    #[test]
    fn test_verification_failure_skips_post_materialize() {
        let mut mock = MockBackend::new();
        let mut next = 0u32;
        mock.expect_create_kernel().returning(move |_| {
            next += 1;
            Ok(KernelHandle(next - 1))
        });
        mock.expect_add_parameter().returning(|_, _, _, _| Ok(()));
        mock.expect_verify()
            .returning(|_| Err(BackendError::Verification("over budget".into())));
        mock.expect_upload().never();
        mock.expect_release_kernel().times(2).return_const(());
        mock.expect_shutdown().times(1).return_const(());

        let post = Arc::new(AtomicUsize::new(0));
        let mut graph = Graph::new(Arc::new(mock), GraphOptions::default());
        for _ in 0..2 {
            graph
                .add_node(
                    "stage",
                    Box::new(Stage {
                        sinks: vec![],
                        sources: vec![PadSpec::new("out", image(8, 8))],
                        post: post.clone(),
                    }) as Box<dyn ModulePlugin>,
                )
                .unwrap();
        }
        assert!(graph.materialize().is_err());
        assert_eq!(post.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_post_materialize_runs_once_per_node() {
        let (mut graph, _) = software_graph();
        let post = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            graph
                .add_node(
                    "",
                    Box::new(Stage {
                        sinks: vec![],
                        sources: vec![PadSpec::new("out", image(8, 8))],
                        post: post.clone(),
                    }) as Box<dyn ModulePlugin>,
                )
                .unwrap();
        }
        assert!(graph.find_node("custom_2").is_some());
        graph.materialize().unwrap();
        assert_eq!(post.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_dot_dump_lists_links_and_params() {
        let (mut graph, _) = software_graph();
        let p = producer(&mut graph, image(8, 8));
        let c = consumer(&mut graph, image(8, 8));
        graph
            .link(graph.source_pad(p, 0).unwrap(), graph.sink_pad(c, 0).unwrap())
            .unwrap();
        let extra = consumer(&mut graph, image(4, 4));
        graph.materialize().unwrap();

        let dot = graph.to_dot();
        assert!(dot.starts_with("digraph visionflow {"));
        assert!(dot.contains("n0 -> n1"));
        assert!(dot.contains(&format!("-> n{};", extra.0)));
    }
}
