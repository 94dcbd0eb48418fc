//! Lens distortion correction stage.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::exemplar::Exemplar;
use crate::pipeline::module_kind::ModuleKind;
use crate::pipeline::node::{InitContext, ModulePlugin, PostMaterializeContext};
use crate::pipeline::pad::PadSpec;
use crate::types::{Dimensions, PixelFormat};

/// Mesh subsampling factor (one displacement vector per block).
pub const MESH_BLOCK: u32 = 16;

pub struct LdcModule {
    dims: Dimensions,
    fanout: usize,
}

impl LdcModule {
    pub fn new(dims: Dimensions, fanout: usize) -> Self {
        Self { dims, fanout }
    }

    /// Identity displacement mesh: one (dx, dy) i16 pair per mesh point.
    fn mesh(&self) -> Vec<u8> {
        let cols = self.dims.width / MESH_BLOCK + 1;
        let rows = self.dims.height / MESH_BLOCK + 1;
        vec![0u8; (cols * rows) as usize * 4]
    }
}

impl ModulePlugin for LdcModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Ldc
    }

    fn init(&mut self, ctx: &mut InitContext) -> PipelineResult<()> {
        if self.fanout == 0 {
            return Err(ctx.error("LDC needs at least one output"));
        }
        let image = Exemplar::Image {
            format: PixelFormat::Nv12,
            dims: self.dims,
        };
        ctx.add_sink(PadSpec::new("image", image.clone()));
        for i in 0..self.fanout {
            ctx.add_source(PadSpec::new(format!("image_{}", i), image.clone()));
        }
        Ok(())
    }

    fn post_materialize(&mut self, ctx: &PostMaterializeContext) -> PipelineResult<()> {
        ctx.upload("mesh", &self.mesh())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_size() {
        let ldc = LdcModule::new(Dimensions::new(64, 32), 1);
        assert_eq!(ldc.mesh().len(), 5 * 3 * 4);
    }

    #[test]
    fn test_fanout_sources() {
        let mut ldc = LdcModule::new(Dimensions::new(64, 32), 2);
        let mut ctx = InitContext::new("ldc");
        ldc.init(&mut ctx).unwrap();
        assert_eq!(ctx.sinks.len(), 1);
        assert_eq!(ctx.sources.len(), 2);
    }
}
