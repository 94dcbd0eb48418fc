//! Plain fan-out of one image stream into identical copies.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::exemplar::Exemplar;
use crate::pipeline::module_kind::ModuleKind;
use crate::pipeline::node::{InitContext, ModulePlugin};
use crate::pipeline::pad::PadSpec;
use crate::types::{Dimensions, PixelFormat};

pub struct SplitModule {
    format: PixelFormat,
    dims: Dimensions,
    fanout: usize,
}

impl SplitModule {
    pub fn new(format: PixelFormat, dims: Dimensions, fanout: usize) -> Self {
        Self {
            format,
            dims,
            fanout,
        }
    }
}

impl ModulePlugin for SplitModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Split
    }

    fn init(&mut self, ctx: &mut InitContext) -> PipelineResult<()> {
        if self.fanout == 0 {
            return Err(ctx.error("split needs at least one output"));
        }
        let image = Exemplar::Image {
            format: self.format,
            dims: self.dims,
        };
        ctx.add_sink(PadSpec::new("image", image.clone()));
        for i in 0..self.fanout {
            ctx.add_source(PadSpec::new(format!("out_{}", i), image.clone()));
        }
        Ok(())
    }
}
