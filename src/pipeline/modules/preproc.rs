//! Image to tensor conversion ahead of inference.
//!
//! Optionally forwards its input image unchanged through a second source pad
//! so a post-processing stage of the same resolution can reuse it.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::exemplar::{Exemplar, TensorType};
use crate::pipeline::module_kind::ModuleKind;
use crate::pipeline::node::{InitContext, ModulePlugin, PostMaterializeContext};
use crate::pipeline::pad::PadSpec;
use crate::types::{Dimensions, PixelFormat};
use serde::{Deserialize, Serialize};

/// Memory layout of an image tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    #[default]
    Nchw,
    Nhwc,
}

impl TensorLayout {
    /// Batch-of-one shape of a 3-channel image of `dims`.
    pub fn shape(&self, dims: Dimensions) -> Vec<usize> {
        let (w, h) = (dims.width as usize, dims.height as usize);
        match self {
            TensorLayout::Nchw => vec![1, 3, h, w],
            TensorLayout::Nhwc => vec![1, h, w, 3],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreprocConfig {
    /// Size of the cropped image arriving from the branch stage.
    pub input: Dimensions,
    pub layout: TensorLayout,
    pub data_type: TensorType,
    pub mean: [f32; 3],
    pub scale: [f32; 3],
    /// Forward the input image on a second source pad.
    pub passthrough: bool,
}

impl PreprocConfig {
    pub fn tensor(&self) -> Exemplar {
        Exemplar::tensor(self.data_type, self.layout.shape(self.input))
    }
}

pub struct PreprocModule {
    config: PreprocConfig,
}

impl PreprocModule {
    pub const SOURCE_TENSOR: usize = 0;
    pub const SOURCE_PASSTHROUGH: usize = 1;

    pub fn new(config: PreprocConfig) -> Self {
        Self { config }
    }
}

impl ModulePlugin for PreprocModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Preproc
    }

    fn init(&mut self, ctx: &mut InitContext) -> PipelineResult<()> {
        if self.config.input.is_empty() {
            return Err(ctx.error("empty pre-processing input"));
        }
        let image = Exemplar::Image {
            format: PixelFormat::Nv12,
            dims: self.config.input,
        };
        ctx.add_sink(PadSpec::new("image", image.clone()));
        ctx.add_source(PadSpec::new("tensor", self.config.tensor()));
        if self.config.passthrough {
            ctx.add_source(PadSpec::new("passthrough", image));
        }
        Ok(())
    }

    fn post_materialize(&mut self, ctx: &PostMaterializeContext) -> PipelineResult<()> {
        let mut params = Vec::with_capacity(24);
        for v in self.config.mean.iter().chain(self.config.scale.iter()) {
            params.extend_from_slice(&v.to_le_bytes());
        }
        ctx.upload("params", &params)
    }
}
