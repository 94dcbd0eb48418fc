//! Overlay of inference results onto an image.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::exemplar::Exemplar;
use crate::pipeline::module_kind::ModuleKind;
use crate::pipeline::modules::inference::ModelTask;
use crate::pipeline::node::{InitContext, ModulePlugin, PostMaterializeContext};
use crate::pipeline::pad::PadSpec;
use crate::types::{Dimensions, PixelFormat};

#[derive(Debug, Clone, PartialEq)]
pub struct PostprocConfig {
    /// Size of the annotated image (the mosaic window).
    pub dims: Dimensions,
    pub task: ModelTask,
    pub results: Vec<Exemplar>,
    /// Minimum detection score drawn.
    pub threshold: f32,
    /// Number of classification labels drawn.
    pub top_n: u32,
}

pub struct PostprocModule {
    config: PostprocConfig,
}

impl PostprocModule {
    pub const SINK_IMAGE: usize = 0;

    pub fn new(config: PostprocConfig) -> Self {
        Self { config }
    }
}

impl ModulePlugin for PostprocModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Postproc
    }

    fn init(&mut self, ctx: &mut InitContext) -> PipelineResult<()> {
        let image = Exemplar::Image {
            format: PixelFormat::Nv12,
            dims: self.config.dims,
        };
        ctx.add_sink(PadSpec::new("image", image.clone()));
        for (i, result) in self.config.results.iter().enumerate() {
            ctx.add_sink(PadSpec::new(format!("result_{}", i), result.clone()));
        }
        ctx.add_source(PadSpec::new("image", image));
        Ok(())
    }

    fn post_materialize(&mut self, ctx: &PostMaterializeContext) -> PipelineResult<()> {
        let mut params = Vec::with_capacity(9);
        params.push(self.config.task as u8);
        params.extend_from_slice(&self.config.threshold.to_le_bytes());
        params.extend_from_slice(&self.config.top_n.to_le_bytes());
        ctx.upload("thresholds", &params)
    }
}
