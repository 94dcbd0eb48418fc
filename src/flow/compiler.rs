//! Flow compiler: synthesizes a graph from a pipeline configuration.
//!
//! Declaration order:
//! 1. one output node per distinct output name;
//! 2. per flow, the branch stages sized by resolution deduplication, then
//!    each subflow's inference chain (or a direct branch → output link);
//! 3. the flow's input stage last, once its fan-out (the number of branch
//!    stages) is known.
//!
//! The graph is materialized at the end; any configuration error surfaces
//! before the first node is declared.

use crate::config::{sensor_info, FlowSpec, InputSpec, ModelSpec, PipelineConfig, SourceKind, SubflowSpec};
use crate::error::{Result, ResultExt, VisionFlowError};
use crate::flow::outputs::OutputTable;
use crate::flow::plan::{
    BranchStage, CompiledPipeline, FeedbackBinding, FlowStats, InputBinding, OutputBinding,
};
use crate::flow::resolution::{inference_tuple, ResolutionTable, SubflowTuples};
use crate::pipeline::backend::Backend;
use crate::pipeline::id::{NodeId, PadId};
use crate::pipeline::modules::{
    BranchGroup, BranchModule, InferenceConfig, InferenceModule, IspModule, LdcModule,
    OutputModule, PostprocConfig, PostprocModule, PreprocConfig, PreprocModule, ScaleTuple,
    SplitModule,
};
use crate::pipeline::{BuiltinModule, Graph, PipelineError};
use crate::types::{Dimensions, PixelFormat};
use std::sync::Arc;
use std::time::Instant;

/// Resolution requirements of one flow, before any node exists.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowPlan {
    pub input: String,
    pub dims: Dimensions,
    /// Requirements per subflow, in subflow order.
    pub subflows: Vec<SubflowTuples>,
    pub table: ResolutionTable,
}

impl FlowPlan {
    pub fn stages(&self, fanout: usize) -> Vec<Vec<BranchGroup>> {
        self.table.partition(fanout)
    }
}

fn internal(message: impl Into<String>) -> VisionFlowError {
    PipelineError::module("flow compiler", message).into()
}

/// Hands out the exposed pads of a flow's branch stages, one per consumer.
struct ExposedPads<'p> {
    table: &'p ResolutionTable,
    stages: &'p [Vec<BranchGroup>],
    nodes: &'p [NodeId],
    fanout: usize,
    cursors: Vec<usize>,
}

impl<'p> ExposedPads<'p> {
    fn new(
        table: &'p ResolutionTable,
        stages: &'p [Vec<BranchGroup>],
        nodes: &'p [NodeId],
        fanout: usize,
    ) -> Self {
        Self {
            table,
            stages,
            nodes,
            fanout,
            cursors: vec![0; table.len()],
        }
    }

    fn next(&mut self, graph: &Graph, tuple: &ScaleTuple) -> Result<PadId> {
        let entry = self
            .table
            .find(tuple)
            .ok_or_else(|| internal(format!("no branch group for {}", tuple)))?;
        let location = self
            .table
            .locate(tuple, self.fanout)
            .ok_or_else(|| internal(format!("no branch group for {}", tuple)))?;
        let groups = &self.stages[location.stage];
        let group = &groups[location.group];

        let exposed = self.cursors[entry];
        if exposed >= group.count {
            return Err(internal(format!(
                "branch group {} has only {} exposed pads",
                tuple, group.count
            )));
        }
        self.cursors[entry] += 1;

        let offset: usize = groups[..location.group].iter().map(|g| g.count).sum();
        Ok(graph.source_pad(self.nodes[location.stage], offset + exposed)?)
    }
}

/// Compiles a pipeline configuration into a materialized graph.
pub struct FlowCompiler<'a> {
    config: &'a PipelineConfig,
}

impl<'a> FlowCompiler<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    fn input(&self, name: &str) -> Result<&'a InputSpec> {
        self.config
            .inputs
            .get(name)
            .ok_or_else(|| VisionFlowError::config_at("flows", format!("unknown input '{}'", name)))
    }

    fn model(&self, subflow: &SubflowSpec) -> Result<Option<&'a ModelSpec>> {
        subflow
            .model
            .as_ref()
            .map(|name| {
                self.config.models.get(name).ok_or_else(|| {
                    VisionFlowError::config_at(
                        format!("flows[{}].model", subflow.entry),
                        format!("unknown model '{}'", name),
                    )
                })
            })
            .transpose()
    }

    fn plan_flow(&self, flow: &FlowSpec) -> Result<FlowPlan> {
        let dims = self.input(&flow.input)?.dimensions();
        let subflows = flow
            .subflows
            .iter()
            .map(|s| Ok(SubflowTuples::new(dims, s.mosaic, self.model(s)?)))
            .collect::<Result<Vec<_>>>()?;
        let table = ResolutionTable::from_subflows(&subflows);
        Ok(FlowPlan {
            input: flow.input.clone(),
            dims,
            subflows,
            table,
        })
    }

    /// Validate the configuration and deduplicate branch resolutions,
    /// without declaring any node.
    pub fn plan(&self) -> Result<Vec<FlowPlan>> {
        self.config.validate()?;
        self.config
            .flow_specs()
            .iter()
            .map(|flow| self.plan_flow(flow))
            .collect()
    }

    /// Declare, link and materialize the whole pipeline.
    pub fn compile(&self, backend: Arc<dyn Backend>) -> Result<CompiledPipeline> {
        let start = Instant::now();
        self.config.validate()?;

        let settings = &self.config.engine;
        let fanout = settings.branch_fanout;
        let flows = self.config.flow_specs();
        let plans = flows
            .iter()
            .map(|flow| self.plan_flow(flow))
            .collect::<Result<Vec<_>>>()?;
        let outputs = OutputTable::build(self.config, &flows)?;

        let mut graph = Graph::new(backend, settings.graph_options());

        let mut output_nodes = Vec::with_capacity(outputs.len());
        for entry in outputs.entries() {
            let module = OutputModule::new(entry.spec.dimensions(), entry.windows())
                .with_depth(settings.queue_depth);
            let node = graph
                .add_node(&format!("output_{}", entry.name), BuiltinModule::Output(module))
                .with_context(|| format!("output '{}'", entry.name))?;
            output_nodes.push(node);
        }

        let mut inputs = Vec::with_capacity(flows.len());
        let mut branches = Vec::new();
        let mut inference_chains = 0;

        for (f, (flow, plan)) in flows.iter().zip(&plans).enumerate() {
            let stages = plan.stages(fanout);
            tracing::debug!(
                "Flow '{}': {} subflows, {} unique resolutions, {} branch stages",
                flow.input,
                flow.subflows.len(),
                plan.table.len(),
                stages.len()
            );

            let mut branch_nodes = Vec::with_capacity(stages.len());
            for (k, groups) in stages.iter().enumerate() {
                let module = BranchModule::new(plan.dims, groups.clone(), fanout);
                let node = graph
                    .add_node(
                        &format!("branch_{}_{}", flow.input, k),
                        BuiltinModule::Branch(module),
                    )
                    .with_context(|| format!("flow '{}'", flow.input))?;
                branch_nodes.push(node);
                branches.push(BranchStage {
                    flow: f,
                    node,
                    groups: groups.clone(),
                });
            }

            let mut exposed = ExposedPads::new(&plan.table, &stages, &branch_nodes, fanout);
            for (s, subflow) in flow.subflows.iter().enumerate() {
                let (out, slot) = outputs
                    .slot_of(f, s)
                    .ok_or_else(|| internal(format!("no output slot for flows[{}]", subflow.entry)))?;
                let slot_pad = graph.sink_pad(output_nodes[out], slot)?;

                match self.model(subflow)? {
                    None => {
                        let pad = exposed.next(&graph, &plan.subflows[s].mosaic)?;
                        graph
                            .link(pad, slot_pad)
                            .with_context(|| format!("flows[{}]", subflow.entry))?;
                    }
                    Some(model) => {
                        self.declare_inference_chain(
                            &mut graph,
                            &mut exposed,
                            plan,
                            subflow,
                            &plan.subflows[s],
                            model,
                            slot_pad,
                        )
                        .with_context(|| format!("flows[{}]", subflow.entry))?;
                        inference_chains += 1;
                    }
                }
            }

            let input = self.input(&flow.input)?;
            let binding = self
                .declare_input_stage(&mut graph, &flow.input, input, plan.dims, &branch_nodes)
                .with_context(|| format!("input '{}'", flow.input))?;
            inputs.push(binding);
        }

        graph.materialize().context("Failed to materialize graph")?;

        let outputs = outputs
            .entries()
            .iter()
            .zip(&output_nodes)
            .map(|(entry, &node)| {
                Ok(OutputBinding {
                    name: entry.name.clone(),
                    spec: entry.spec.clone(),
                    frame: graph.source_pad(node, OutputModule::SOURCE_FRAME)?,
                    slots: entry.slots.len(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let stats = FlowStats {
            flows: flows.len(),
            subflows: flows.iter().map(|f| f.subflows.len()).sum(),
            outputs: outputs.len(),
            unique_resolutions: plans.iter().map(|p| p.table.len()).sum(),
            branch_stages: branches.len(),
            inference_chains,
            nodes: graph.nodes().len(),
            boundary_pads: graph.boundary_pads().len(),
            compile_time_us: start.elapsed().as_micros() as u64,
        };
        tracing::info!(
            "Compiled {} flows / {} subflows into {} nodes ({} branch stages, {} outputs) in {}us",
            stats.flows,
            stats.subflows,
            stats.nodes,
            stats.branch_stages,
            stats.outputs,
            stats.compile_time_us
        );

        Ok(CompiledPipeline {
            graph,
            inputs,
            outputs,
            branches,
            stats,
        })
    }

    /// Pre-processing → inference → post-processing, linked to the branch
    /// stages and the subflow's output slot.
    #[allow(clippy::too_many_arguments)]
    fn declare_inference_chain(
        &self,
        graph: &mut Graph,
        exposed: &mut ExposedPads,
        plan: &FlowPlan,
        subflow: &SubflowSpec,
        tuples: &SubflowTuples,
        model: &ModelSpec,
        slot_pad: PadId,
    ) -> Result<()> {
        let crop = inference_tuple(plan.dims, model);
        let passthrough = tuples.coincide();
        let preproc = PreprocConfig {
            input: crop.dimensions(),
            layout: model.layout,
            data_type: model.data_type,
            mean: model.mean,
            scale: model.scale,
            passthrough,
        };
        let tensor = preproc.tensor();
        let results =
            model
                .task
                .output_tensors(model.crop_dims(), model.num_classes, model.max_detections);

        let pre = graph.add_node(
            &format!("preproc_{}", subflow.entry),
            BuiltinModule::Preproc(PreprocModule::new(preproc)),
        )?;
        let infer = graph.add_node(
            &format!("infer_{}", subflow.entry),
            BuiltinModule::Inference(InferenceModule::new(InferenceConfig {
                model_path: model.path.clone(),
                task: model.task,
                input: tensor,
                outputs: results.clone(),
            })),
        )?;
        let post = graph.add_node(
            &format!("postproc_{}", subflow.entry),
            BuiltinModule::Postproc(PostprocModule::new(PostprocConfig {
                dims: subflow.mosaic.dimensions(),
                task: model.task,
                results: results.clone(),
                threshold: model.threshold,
                top_n: model.top_n,
            })),
        )?;

        let crop_pad = exposed.next(graph, &crop)?;
        let pre_in = graph.sink_pad(pre, 0)?;
        graph.link(crop_pad, pre_in)?;

        let tensor_out = graph.source_pad(pre, PreprocModule::SOURCE_TENSOR)?;
        let infer_in = graph.sink_pad(infer, 0)?;
        graph.link(tensor_out, infer_in)?;

        for i in 0..results.len() {
            let from = graph.source_pad(infer, i)?;
            let to = graph.sink_pad(post, 1 + i)?;
            graph.link(from, to)?;
        }

        let image = if passthrough {
            graph.source_pad(pre, PreprocModule::SOURCE_PASSTHROUGH)?
        } else {
            exposed.next(graph, &tuples.mosaic)?
        };
        let post_in = graph.sink_pad(post, PostprocModule::SINK_IMAGE)?;
        graph.link(image, post_in)?;

        let post_out = graph.source_pad(post, 0)?;
        graph.link(post_out, slot_pad)?;
        Ok(())
    }

    /// ISP (+ LDC) for cameras, LDC or a split for everything else; the
    /// tail node fans out to every branch stage.
    fn declare_input_stage(
        &self,
        graph: &mut Graph,
        name: &str,
        input: &InputSpec,
        dims: Dimensions,
        branches: &[NodeId],
    ) -> Result<InputBinding> {
        let fanout = branches.len();
        let (frame, feedback, tail) = match input.source {
            SourceKind::Camera => {
                let sensor_name = input.sensor.as_deref().unwrap_or_default();
                let sensor = sensor_info(sensor_name).ok_or_else(|| {
                    VisionFlowError::config_at(
                        format!("inputs.{}.sensor", name),
                        format!("unsupported sensor '{}'", sensor_name),
                    )
                })?;
                let isp = IspModule::new(
                    sensor,
                    if input.ldc { 1 } else { fanout },
                    self.config.engine.feedback_depth,
                );
                let stats_index = isp.stats_source();
                let isp = graph.add_node(&format!("isp_{}", name), BuiltinModule::Isp(isp))?;
                let feedback = FeedbackBinding {
                    stats: graph.source_pad(isp, stats_index)?,
                    params: graph.sink_pad(isp, IspModule::SINK_AEWB)?,
                };
                let frame = graph.sink_pad(isp, IspModule::SINK_RAW)?;

                let tail = if input.ldc {
                    let ldc = graph.add_node(
                        &format!("ldc_{}", name),
                        BuiltinModule::Ldc(LdcModule::new(dims, fanout)),
                    )?;
                    let from = graph.source_pad(isp, 0)?;
                    let to = graph.sink_pad(ldc, 0)?;
                    graph.link(from, to)?;
                    ldc
                } else {
                    isp
                };
                (frame, Some(feedback), tail)
            }
            SourceKind::RawFile | SourceKind::TestPattern => {
                let node = if input.ldc {
                    graph.add_node(
                        &format!("ldc_{}", name),
                        BuiltinModule::Ldc(LdcModule::new(dims, fanout)),
                    )?
                } else {
                    graph.add_node(
                        &format!("split_{}", name),
                        BuiltinModule::Split(SplitModule::new(PixelFormat::Nv12, dims, fanout)),
                    )?
                };
                (graph.sink_pad(node, 0)?, None, node)
            }
        };

        for (k, &branch) in branches.iter().enumerate() {
            let from = graph.source_pad(tail, k)?;
            let to = graph.sink_pad(branch, 0)?;
            graph.link(from, to)?;
        }

        Ok(InputBinding {
            name: name.to_string(),
            spec: input.clone(),
            frame,
            feedback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FlowEntry, OutputSpec, SinkKind};
    use crate::pipeline::modules::{ModelTask, TensorLayout};
    use crate::pipeline::{GraphState, ModuleKind, SoftwareBackend, TensorType};
    use crate::types::Rect;
    use std::collections::BTreeMap;

    fn input(source: SourceKind) -> InputSpec {
        InputSpec {
            source,
            sensor: (source == SourceKind::Camera).then(|| "imx219".to_string()),
            width: if source == SourceKind::Camera { 0 } else { 640 },
            height: if source == SourceKind::Camera { 0 } else { 480 },
            framerate: 30,
            ldc: false,
            path: None,
            format: PixelFormat::Nv12,
            looping: true,
        }
    }

    fn output(w: u32, h: u32) -> OutputSpec {
        OutputSpec {
            sink: SinkKind::Null,
            width: w,
            height: h,
            path: None,
        }
    }

    fn model(resize: [u32; 2], crop: [u32; 2]) -> ModelSpec {
        ModelSpec {
            path: "models/det".into(),
            task: ModelTask::Detection,
            resize,
            crop,
            layout: TensorLayout::Nchw,
            data_type: TensorType::U8,
            num_classes: 80,
            max_detections: 20,
            threshold: 0.5,
            top_n: 5,
            mean: [0.0; 3],
            scale: [1.0; 3],
        }
    }

    fn entry(input: &str, model: Option<&str>, output: &str, mosaic: Rect) -> FlowEntry {
        FlowEntry {
            input: input.into(),
            model: model.map(Into::into),
            output: output.into(),
            mosaic,
        }
    }

    fn config(flows: Vec<FlowEntry>) -> PipelineConfig {
        PipelineConfig {
            engine: Default::default(),
            inputs: BTreeMap::from([("in0".to_string(), input(SourceKind::TestPattern))]),
            models: BTreeMap::from([
                ("det".to_string(), model([320, 320], [256, 256])),
                ("same".to_string(), model([320, 240], [320, 240])),
            ]),
            outputs: BTreeMap::from([
                ("disp0".to_string(), output(1280, 720)),
                ("disp1".to_string(), output(1280, 720)),
            ]),
            flows,
        }
    }

    fn compile(config: &PipelineConfig) -> (CompiledPipeline, Arc<SoftwareBackend>) {
        let backend = Arc::new(SoftwareBackend::new(64));
        let compiled = FlowCompiler::new(config).compile(backend.clone()).unwrap();
        (compiled, backend)
    }

    #[test]
    fn test_direct_subflows_share_one_group() {
        let config = config(vec![
            entry("in0", None, "disp0", Rect::new(0, 0, 320, 240)),
            entry("in0", None, "disp1", Rect::new(0, 0, 320, 240)),
        ]);
        let (compiled, _) = compile(&config);
        assert_eq!(compiled.branches.len(), 1);
        assert_eq!(
            compiled.branches[0].groups,
            vec![BranchGroup {
                tuple: ScaleTuple::new(320, 240, 0, 0),
                count: 2
            }]
        );
        let graph = &compiled.graph;
        let branch = graph.node(compiled.branches[0].node).unwrap();
        let peers: Vec<NodeId> = branch
            .sources
            .iter()
            .map(|&p| {
                let peer = graph.pad(p).unwrap().peer.unwrap();
                graph.pad(peer).unwrap().node
            })
            .collect();
        assert_eq!(peers.len(), 2);
        assert_ne!(peers[0], peers[1]);
    }

    #[test]
    fn test_inference_chain_with_separate_mosaic_group() {
        let config = config(vec![entry("in0", Some("det"), "disp0", Rect::new(0, 0, 640, 360))]);
        let (compiled, backend) = compile(&config);
        assert_eq!(compiled.stats.inference_chains, 1);
        assert_eq!(compiled.stats.unique_resolutions, 2);
        let graph = &compiled.graph;
        assert_eq!(graph.state(), GraphState::Materialized);
        for name in ["preproc_0", "infer_0", "postproc_0", "split_in0", "output_disp0"] {
            assert!(graph.find_node(name).is_some(), "missing {}", name);
        }
        // 32px margin of 320 → 64px of the 640 wide input, 48px of 480 high
        let groups = &compiled.branches[0].groups;
        assert_eq!(groups[0].tuple, ScaleTuple::new(256, 256, 64, 48));
        assert_eq!(groups[1].tuple, ScaleTuple::new(640, 360, 0, 0));
        assert!(backend.uploads().iter().any(|(_, key, _)| key == "network"));
    }

    #[test]
    fn test_coinciding_crop_uses_passthrough() {
        let config = config(vec![entry("in0", Some("same"), "disp0", Rect::new(0, 0, 320, 240))]);
        let (compiled, _) = compile(&config);
        assert_eq!(compiled.stats.unique_resolutions, 1);
        assert_eq!(compiled.branches[0].groups[0].count, 1);

        let graph = &compiled.graph;
        let pre = graph.find_node("preproc_0").unwrap();
        let passthrough = graph.pad(pre.sources[PreprocModule::SOURCE_PASSTHROUGH]).unwrap();
        let post = graph.find_node("postproc_0").unwrap();
        assert_eq!(passthrough.peer, Some(post.sinks[PostprocModule::SINK_IMAGE]));
    }

    #[test]
    fn test_only_io_pads_are_boundary() {
        let config = config(vec![
            entry("in0", Some("det"), "disp0", Rect::new(0, 0, 640, 360)),
            entry("in0", None, "disp0", Rect::new(640, 0, 640, 360)),
        ]);
        let (compiled, _) = compile(&config);
        let graph = &compiled.graph;
        let mut expected = vec![compiled.inputs[0].frame, compiled.outputs[0].frame];
        expected.sort();
        let mut boundary = graph.boundary_pads().to_vec();
        boundary.sort();
        assert_eq!(boundary, expected);
        assert_eq!(compiled.outputs[0].slots, 2);
    }

    #[test]
    fn test_camera_input_has_feedback_pads() {
        let mut config = config(vec![entry("cam", None, "disp0", Rect::new(0, 0, 640, 360))]);
        config.inputs.insert("cam".into(), input(SourceKind::Camera));
        let (compiled, _) = compile(&config);
        let binding = &compiled.inputs[0];
        let feedback = binding.feedback.unwrap();
        let graph = &compiled.graph;
        assert_eq!(graph.pool(feedback.stats).unwrap().capacity(), 2);
        assert_eq!(graph.pool(feedback.params).unwrap().capacity(), 2);
        assert!(graph.pool(binding.frame).is_some());
        let isp = graph.find_node("isp_cam").unwrap();
        assert_eq!(isp.kind, ModuleKind::Isp);
        assert_eq!(isp.target.as_ref().unwrap().as_str(), "VPAC_VISS1");
    }

    #[test]
    fn test_camera_with_ldc_chains_isp_into_ldc() {
        let mut config = config(vec![entry("cam", None, "disp0", Rect::new(0, 0, 640, 360))]);
        let mut cam = input(SourceKind::Camera);
        cam.ldc = true;
        config.inputs.insert("cam".into(), cam);
        let (compiled, _) = compile(&config);
        let graph = &compiled.graph;
        let ldc = graph.find_node("ldc_cam").unwrap();
        let ldc_in = graph.pad(ldc.sinks[0]).unwrap();
        let isp = graph.find_node("isp_cam").unwrap();
        assert_eq!(graph.pad(ldc_in.peer.unwrap()).unwrap().node, isp.id);
    }

    #[test]
    fn test_invalid_config_declares_nothing() {
        let config = config(vec![entry("in0", None, "disp9", Rect::new(0, 0, 64, 64))]);
        let backend = Arc::new(SoftwareBackend::new(64));
        let err = FlowCompiler::new(&config).compile(backend.clone()).err().unwrap();
        assert!(err.is_config());
        assert_eq!(backend.kernel_count(), 0);
    }

    #[test]
    fn test_custom_fanout() {
        let mut config = config(
            (0..3)
                .map(|i| entry("in0", None, "disp0", Rect::new(0, 0, 64 + 32 * i, 64)))
                .collect(),
        );
        config.engine.branch_fanout = 2;
        let plans = FlowCompiler::new(&config).plan().unwrap();
        assert_eq!(plans[0].stages(2).len(), 2);
        let (compiled, _) = compile(&config);
        assert_eq!(compiled.stats.branch_stages, 2);
    }
}
