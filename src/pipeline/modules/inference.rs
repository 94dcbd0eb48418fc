//! Neural-network inference stage.

use crate::pipeline::backend::KernelDesc;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::exemplar::{Exemplar, TensorType};
use crate::pipeline::module_kind::ModuleKind;
use crate::pipeline::node::{InitContext, MaterializeContext, ModulePlugin, PostMaterializeContext};
use crate::pipeline::pad::PadSpec;
use crate::types::Dimensions;
use serde::{Deserialize, Serialize};

/// What a model computes, which fixes the shape of its outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTask {
    #[default]
    Classification,
    Detection,
    Segmentation,
}

impl ModelTask {
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelTask::Classification => "classification",
            ModelTask::Detection => "detection",
            ModelTask::Segmentation => "segmentation",
        }
    }

    /// Output tensors of a model of this task.
    ///
    /// Detection rows are `[x1, y1, x2, y2, score, label]`; segmentation
    /// produces one class id per pixel of the model input.
    pub fn output_tensors(&self, input: Dimensions, classes: usize, max_detections: usize) -> Vec<Exemplar> {
        match self {
            ModelTask::Classification => vec![Exemplar::tensor(TensorType::F32, vec![1, classes])],
            ModelTask::Detection => {
                vec![Exemplar::tensor(TensorType::F32, vec![1, max_detections, 6])]
            }
            ModelTask::Segmentation => vec![Exemplar::tensor(
                TensorType::U8,
                vec![1, 1, input.height as usize, input.width as usize],
            )],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    pub model_path: String,
    pub task: ModelTask,
    pub input: Exemplar,
    pub outputs: Vec<Exemplar>,
}

pub struct InferenceModule {
    config: InferenceConfig,
}

impl InferenceModule {
    pub fn new(config: InferenceConfig) -> Self {
        Self { config }
    }
}

impl ModulePlugin for InferenceModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Inference
    }

    fn init(&mut self, ctx: &mut InitContext) -> PipelineResult<()> {
        if self.config.outputs.is_empty() {
            return Err(ctx.error(format!(
                "model '{}' declares no outputs",
                self.config.model_path
            )));
        }
        ctx.add_sink(PadSpec::new("tensor", self.config.input.clone()));
        for (i, output) in self.config.outputs.iter().enumerate() {
            ctx.add_source(PadSpec::new(format!("out_{}", i), output.clone()));
        }
        Ok(())
    }

    fn materialize(&mut self, ctx: &MaterializeContext) -> PipelineResult<KernelDesc> {
        if let Some(pad) = ctx.sinks.iter().find(|p| p.exemplar.byte_size().is_none()) {
            return Err(ctx.error(format!("input '{}' has no storage size", pad.name)));
        }
        Ok(ctx.kernel_desc())
    }

    fn post_materialize(&mut self, ctx: &PostMaterializeContext) -> PipelineResult<()> {
        ctx.upload("network", self.config.model_path.as_bytes())
    }
}
