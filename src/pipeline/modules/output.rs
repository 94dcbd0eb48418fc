//! Mosaic composition of several image streams into one output frame.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::exemplar::Exemplar;
use crate::pipeline::module_kind::ModuleKind;
use crate::pipeline::node::{InitContext, ModulePlugin, PostMaterializeContext};
use crate::pipeline::pad::PadSpec;
use crate::types::{Dimensions, PixelFormat, Rect};

pub struct OutputModule {
    dims: Dimensions,
    /// One compositing slot per referencing subflow.
    slots: Vec<Rect>,
    depth: Option<usize>,
}

impl OutputModule {
    pub fn new(dims: Dimensions, slots: Vec<Rect>) -> Self {
        Self {
            dims,
            slots,
            depth: None,
        }
    }

    /// In-flight depth of the composed frame pad.
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Source pad index of the composed frame.
    pub const SOURCE_FRAME: usize = 0;

    fn layout(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.slots.len() * 16);
        for slot in &self.slots {
            for v in [slot.x, slot.y, slot.width, slot.height] {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }
}

impl ModulePlugin for OutputModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Output
    }

    fn init(&mut self, ctx: &mut InitContext) -> PipelineResult<()> {
        if self.slots.is_empty() {
            return Err(ctx.error("output has no compositing inputs"));
        }
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.is_empty() || !slot.fits_within(self.dims) {
                return Err(ctx.error(format!(
                    "slot {} window {} outside the {} frame",
                    i, slot, self.dims
                )));
            }
            ctx.add_sink(PadSpec::new(
                format!("slot_{}", i),
                Exemplar::Image {
                    format: PixelFormat::Nv12,
                    dims: slot.dimensions(),
                },
            ));
        }
        let mut frame = PadSpec::new("frame", Exemplar::image(PixelFormat::Nv12, self.dims.width, self.dims.height));
        if let Some(depth) = self.depth {
            frame = frame.with_depth(depth);
        }
        ctx.add_source(frame);
        Ok(())
    }

    fn post_materialize(&mut self, ctx: &PostMaterializeContext) -> PipelineResult<()> {
        ctx.upload("layout", &self.layout())
    }
}
