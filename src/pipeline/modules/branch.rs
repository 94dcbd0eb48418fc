//! Multi-output scaler ("branch") stage.
//!
//! One input image is cropped and resized into up to `fanout` output groups.
//! Each group produces one buffer per execution, but may feed several
//! consumers: the group exposes `count` source pads that all carry the same
//! data (a sub-fan-out handled inside the kernel).

use crate::pipeline::backend::KernelDesc;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::exemplar::Exemplar;
use crate::pipeline::module_kind::ModuleKind;
use crate::pipeline::node::{InitContext, MaterializeContext, ModulePlugin, PostMaterializeContext};
use crate::pipeline::pad::PadSpec;
use crate::types::{Dimensions, PixelFormat};
use std::fmt;

/// Output resolution plus the crop offset into the branch input.
///
/// The crop window is centred: it spans `(crop_x, crop_y)` to
/// `(in_w - crop_x, in_h - crop_y)` of the input before scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScaleTuple {
    pub width: u32,
    pub height: u32,
    pub crop_x: u32,
    pub crop_y: u32,
}

impl ScaleTuple {
    pub const fn new(width: u32, height: u32, crop_x: u32, crop_y: u32) -> Self {
        Self {
            width,
            height,
            crop_x,
            crop_y,
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Size of the cropped input region, `None` if the crop does not fit.
    pub fn crop_region(&self, input: Dimensions) -> Option<Dimensions> {
        let w = input.width.checked_sub(self.crop_x.checked_mul(2)?)?;
        let h = input.height.checked_sub(self.crop_y.checked_mul(2)?)?;
        let region = Dimensions::new(w, h);
        (!region.is_empty()).then_some(region)
    }
}

impl fmt::Display for ScaleTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} crop({},{})",
            self.width, self.height, self.crop_x, self.crop_y
        )
    }
}

/// One output group of a branch stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchGroup {
    pub tuple: ScaleTuple,
    /// Number of exposed pads (downstream consumers) of this group.
    pub count: usize,
}

pub struct BranchModule {
    input: Dimensions,
    groups: Vec<BranchGroup>,
    fanout: usize,
}

impl BranchModule {
    pub fn new(input: Dimensions, groups: Vec<BranchGroup>, fanout: usize) -> Self {
        Self {
            input,
            groups,
            fanout,
        }
    }

    pub fn groups(&self) -> &[BranchGroup] {
        &self.groups
    }

    /// Source pad index of the `exposed`-th pad of group `group`.
    pub fn exposed_pad_index(&self, group: usize, exposed: usize) -> Option<usize> {
        let g = self.groups.get(group)?;
        if exposed >= g.count {
            return None;
        }
        let offset: usize = self.groups[..group].iter().map(|g| g.count).sum();
        Some(offset + exposed)
    }

    /// Per-group scale ratios (input/output) in Q16 fixed point.
    fn coefficients(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.groups.len() * 8);
        for group in &self.groups {
            let region = group.tuple.crop_region(self.input).unwrap_or(self.input);
            let ratio = |from: u32, to: u32| ((u64::from(from) << 16) / u64::from(to.max(1))) as u32;
            out.extend_from_slice(&ratio(region.width, group.tuple.width).to_le_bytes());
            out.extend_from_slice(&ratio(region.height, group.tuple.height).to_le_bytes());
        }
        out
    }
}

impl ModulePlugin for BranchModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Branch
    }

    fn init(&mut self, ctx: &mut InitContext) -> PipelineResult<()> {
        if self.groups.is_empty() || self.groups.len() > self.fanout {
            return Err(ctx.error(format!(
                "branch needs 1..={} output groups, got {}",
                self.fanout,
                self.groups.len()
            )));
        }

        ctx.add_sink(PadSpec::new(
            "image",
            Exemplar::Image {
                format: PixelFormat::Nv12,
                dims: self.input,
            },
        ));
        for (g, group) in self.groups.iter().enumerate() {
            if group.count == 0 || group.tuple.dimensions().is_empty() {
                return Err(ctx.error(format!("invalid output group {}: {}", g, group.tuple)));
            }
            let exemplar = Exemplar::Image {
                format: PixelFormat::Nv12,
                dims: group.tuple.dimensions(),
            };
            for j in 0..group.count {
                ctx.add_source(PadSpec::new(format!("g{}_{}", g, j), exemplar.clone()));
            }
        }
        Ok(())
    }

    fn materialize(&mut self, ctx: &MaterializeContext) -> PipelineResult<KernelDesc> {
        let input = ctx
            .sinks
            .first()
            .and_then(|p| p.exemplar.dimensions())
            .ok_or_else(|| ctx.error("branch input is not an image"))?;
        for group in &self.groups {
            if group.tuple.crop_region(input).is_none() {
                return Err(ctx.error(format!(
                    "crop of {} does not fit the {} input",
                    group.tuple, input
                )));
            }
        }
        self.input = input;
        Ok(ctx.kernel_desc())
    }

    fn post_materialize(&mut self, ctx: &PostMaterializeContext) -> PipelineResult<()> {
        ctx.upload("coefficients", &self.coefficients())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module() -> BranchModule {
        BranchModule::new(
            Dimensions::new(1920, 1080),
            vec![
                BranchGroup {
                    tuple: ScaleTuple::new(960, 540, 0, 0),
                    count: 2,
                },
                BranchGroup {
                    tuple: ScaleTuple::new(224, 224, 120, 0),
                    count: 1,
                },
            ],
            4,
        )
    }

    #[test]
    fn test_exposed_pads() {
        let mut branch = module();
        let mut ctx = InitContext::new("branch");
        branch.init(&mut ctx).unwrap();
        assert_eq!(ctx.sources.len(), 3);
        assert_eq!(branch.exposed_pad_index(0, 1), Some(1));
        assert_eq!(branch.exposed_pad_index(1, 0), Some(2));
        assert_eq!(branch.exposed_pad_index(1, 1), None);
        assert_eq!(branch.exposed_pad_index(2, 0), None);
    }

    #[test]
    fn test_too_many_groups() {
        let group = BranchGroup {
            tuple: ScaleTuple::new(64, 64, 0, 0),
            count: 1,
        };
        let mut branch = BranchModule::new(Dimensions::new(640, 480), vec![group; 5], 4);
        assert!(branch.init(&mut InitContext::new("branch")).is_err());
    }

    #[test]
    fn test_crop_region() {
        let input = Dimensions::new(640, 480);
        assert_eq!(
            ScaleTuple::new(224, 224, 80, 0).crop_region(input),
            Some(Dimensions::new(480, 480))
        );
        assert_eq!(ScaleTuple::new(224, 224, 320, 0).crop_region(input), None);
    }

    #[test]
    fn test_coefficients_q16() {
        let branch = module();
        let coeffs = branch.coefficients();
        assert_eq!(coeffs.len(), 16);
        let h = u32::from_le_bytes([coeffs[0], coeffs[1], coeffs[2], coeffs[3]]);
        assert_eq!(h, 2 << 16);
    }
}
