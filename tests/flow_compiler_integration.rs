//! Integration tests for flow compilation
//!
//! These tests validate configuration → graph synthesis:
//! - Branch resolution deduplication and stage partitioning
//! - Output deduplication
//! - Inference chains and input stages
//! - Configuration errors before any node exists

mod common;

use common::builders::{null_output, ConfigBuilder, InputBuilder, ModelBuilder};
use common::software_backend;
use std::collections::BTreeSet;
use visionflow_rs::config::PipelineConfig;
use visionflow_rs::flow::{CompiledPipeline, FlowCompiler};
use visionflow_rs::pipeline::modules::{ModelTask, ScaleTuple};
use visionflow_rs::pipeline::{GraphState, ModuleKind, NodeId};
use visionflow_rs::types::Rect;

fn compile(config: &PipelineConfig) -> CompiledPipeline {
    FlowCompiler::new(config)
        .compile(software_backend())
        .expect("compilation should succeed")
}

/// Nodes fed by a node's source pads, in pad order.
fn downstream(compiled: &CompiledPipeline, node: NodeId) -> Vec<NodeId> {
    let graph = &compiled.graph;
    graph
        .node(node)
        .unwrap()
        .sources
        .iter()
        .filter_map(|&pad| graph.pad(pad).unwrap().peer)
        .map(|peer| graph.pad(peer).unwrap().node)
        .collect()
}

#[test]
fn test_two_identical_windows_share_one_group() {
    let config = ConfigBuilder::new()
        .input("in0", InputBuilder::test_pattern(1280, 720).build())
        .output("disp0", null_output(1280, 720))
        .flow("in0", None, "disp0", Rect::new(0, 0, 320, 240))
        .flow("in0", None, "disp0", Rect::new(320, 0, 320, 240))
        .build();

    let compiled = compile(&config);
    assert_eq!(compiled.branches.len(), 1);
    let groups = &compiled.branches[0].groups;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].tuple, ScaleTuple::new(320, 240, 0, 0));
    assert_eq!(groups[0].count, 2);

    // Both exposed pads reach the single output node
    let output = compiled.graph.find_node("output_disp0").unwrap().id;
    assert_eq!(downstream(&compiled, compiled.branches[0].node), vec![output, output]);
}

#[test]
fn test_five_distinct_windows_need_two_stages() {
    let mut builder = ConfigBuilder::new()
        .input("in0", InputBuilder::test_pattern(1280, 720).build())
        .output("disp0", null_output(1920, 1080));
    for i in 0..5 {
        builder = builder.flow("in0", None, "disp0", Rect::new(0, 0, 160 + 32 * i, 120));
    }
    let config = builder.build();

    let compiled = compile(&config);
    let sizes: Vec<usize> = compiled.branches.iter().map(|b| b.groups.len()).collect();
    assert_eq!(sizes, vec![4, 1]);
    assert_eq!(compiled.stats.unique_resolutions, 5);

    // The split fans out once per stage
    let split = compiled.graph.find_node("split_in0").unwrap();
    assert_eq!(split.kind, ModuleKind::Split);
    let stages: Vec<NodeId> = compiled.branches.iter().map(|b| b.node).collect();
    assert_eq!(downstream(&compiled, split.id), stages);
}

#[test]
fn test_fanout_is_configurable() {
    let mut builder = ConfigBuilder::new()
        .input("in0", InputBuilder::test_pattern(1280, 720).build())
        .output("disp0", null_output(1920, 1080))
        .branch_fanout(2);
    for i in 0..5 {
        builder = builder.flow("in0", None, "disp0", Rect::new(0, 0, 160 + 32 * i, 120));
    }
    let compiled = compile(&builder.build());
    let sizes: Vec<usize> = compiled.branches.iter().map(|b| b.groups.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
}

#[test]
fn test_outputs_are_shared_by_name() {
    let config = ConfigBuilder::new()
        .input("a", InputBuilder::test_pattern(640, 480).build())
        .input("b", InputBuilder::test_pattern(640, 480).build())
        .output("disp0", null_output(1280, 480))
        .output("disp1", null_output(640, 480))
        .flow("a", None, "disp0", Rect::new(0, 0, 640, 480))
        .flow("b", None, "disp0", Rect::new(640, 0, 640, 480))
        .flow("a", None, "disp1", Rect::new(0, 0, 320, 240))
        .build();

    let compiled = compile(&config);
    let outputs: Vec<_> = compiled
        .graph
        .nodes()
        .iter()
        .filter(|n| n.kind == ModuleKind::Output)
        .collect();
    assert_eq!(outputs.len(), 2);
    assert_eq!(compiled.output("disp0").unwrap().slots, 2);
    assert_eq!(compiled.output("disp1").unwrap().slots, 1);
    assert_eq!(compiled.stats.flows, 2);
    assert_eq!(compiled.stats.subflows, 3);
}

#[test]
fn test_every_required_tuple_gets_exactly_one_exposed_pad() {
    let config = ConfigBuilder::new()
        .input("in0", InputBuilder::test_pattern(1280, 720).build())
        .model("cls", ModelBuilder::new(ModelTask::Classification).build())
        .model("det", ModelBuilder::new(ModelTask::Detection).resize(320, 320).crop(320, 320).build())
        .output("disp0", null_output(1280, 720))
        .flow("in0", Some("cls"), "disp0", Rect::new(0, 0, 640, 360))
        .flow("in0", Some("det"), "disp0", Rect::new(640, 0, 640, 360))
        .flow("in0", None, "disp0", Rect::new(0, 360, 640, 360))
        .build();

    let compiled = compile(&config);
    let graph = &compiled.graph;
    assert_eq!(graph.state(), GraphState::Materialized);
    assert_eq!(compiled.stats.inference_chains, 2);

    // Two crops and one shared mosaic size
    let tuples: BTreeSet<ScaleTuple> = compiled
        .branches
        .iter()
        .flat_map(|b| b.groups.iter().map(|g| g.tuple))
        .collect();
    assert_eq!(tuples.len(), 3);
    let exposed: usize = compiled
        .branches
        .iter()
        .flat_map(|b| b.groups.iter().map(|g| g.count))
        .sum();
    assert_eq!(exposed, 5);

    // Every branch pad is linked
    for stage in &compiled.branches {
        let node = graph.node(stage.node).unwrap();
        assert!(node.sources.iter().all(|&p| graph.pad(p).unwrap().peer.is_some()));
    }
    // Only the input frame and the output frame are boundary pads
    assert_eq!(graph.boundary_pads().len(), 2);
}

#[test]
fn test_camera_with_ldc_and_model() {
    let config = ConfigBuilder::new()
        .input("cam0", InputBuilder::camera("imx390").ldc(true).build())
        .model("seg", ModelBuilder::new(ModelTask::Segmentation).build())
        .output("disp0", null_output(1920, 1080))
        .flow("cam0", Some("seg"), "disp0", Rect::new(0, 0, 960, 540))
        .build();

    let compiled = compile(&config);
    let graph = &compiled.graph;
    for name in ["isp_cam0", "ldc_cam0", "branch_cam0_0", "preproc_0", "infer_0", "postproc_0"] {
        assert!(graph.find_node(name).is_some(), "missing {}", name);
    }
    let binding = &compiled.inputs[0];
    assert!(binding.feedback.is_some());
    // Raw frame, AEWB params, H3A stats and the composed output frame
    assert_eq!(graph.boundary_pads().len(), 4);
    assert!(graph.to_dot().contains("isp_cam0"));
}

#[test]
fn test_config_error_names_the_flow_entry() {
    let config = ConfigBuilder::new()
        .input("in0", InputBuilder::test_pattern(640, 480).build())
        .output("disp0", null_output(640, 480))
        .flow("in0", None, "disp0", Rect::new(0, 0, 320, 240))
        .flow("in0", Some("missing"), "disp0", Rect::new(0, 0, 320, 240))
        .build();

    let backend = software_backend();
    let err = FlowCompiler::new(&config).compile(backend.clone()).err().unwrap();
    assert!(err.is_config());
    assert!(err.to_string().contains("flows[1].model"), "{}", err);
    assert_eq!(backend.kernel_count(), 0);
}

#[test]
fn test_mosaic_outside_output_is_rejected() {
    let config = ConfigBuilder::new()
        .input("in0", InputBuilder::test_pattern(640, 480).build())
        .output("disp0", null_output(640, 480))
        .flow("in0", None, "disp0", Rect::new(400, 0, 320, 240))
        .build();
    let err = FlowCompiler::new(&config).plan().unwrap_err();
    assert!(err.to_string().contains("flows[0].mosaic"), "{}", err);
}

#[test]
fn test_compile_from_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.toml");
    std::fs::write(
        &path,
        r#"
[engine]
schedule = "manual"

[inputs.in0]
source = "test_pattern"
width = 640
height = 480

[outputs.disp0]
sink = "null"
width = 640
height = 480

[[flows]]
input = "in0"
output = "disp0"
mosaic = { x = 0, y = 0, width = 640, height = 480 }
"#,
    )
    .unwrap();

    let config = PipelineConfig::load(&path).unwrap();
    let compiled = compile(&config);
    assert_eq!(
        compiled.graph.schedule_mode(),
        visionflow_rs::types::ScheduleMode::Manual
    );
    assert_eq!(compiled.stats.branch_stages, 1);
}
