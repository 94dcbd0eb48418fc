//! Branch resolution deduplication.
//!
//! Every subflow needs one or two images cut from its flow's input: the
//! mosaic-sized image it composes into the output, and (with a model) the
//! crop its pre-processing stage consumes. Identical requirements are merged
//! into one entry whose `count` is the number of subflows sharing it; the
//! unique entries are then packed into branch stages of at most `fanout`
//! output groups each.

use crate::config::ModelSpec;
use crate::pipeline::modules::{BranchGroup, ScaleTuple};
use crate::types::{Dimensions, Rect};

/// Image requirements of one subflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubflowTuples {
    /// Mosaic window size, uncropped.
    pub mosaic: ScaleTuple,
    /// Model input crop, if the subflow runs inference.
    pub inference: Option<ScaleTuple>,
}

impl SubflowTuples {
    pub fn new(input: Dimensions, mosaic: Rect, model: Option<&ModelSpec>) -> Self {
        Self {
            mosaic: ScaleTuple::new(mosaic.width, mosaic.height, 0, 0),
            inference: model.map(|m| inference_tuple(input, m)),
        }
    }

    /// Whether the inference crop and the mosaic image are the same image.
    pub fn coincide(&self) -> bool {
        self.inference == Some(self.mosaic)
    }

    /// Distinct tuples this subflow needs from the branch stages.
    pub fn distinct(&self) -> Vec<ScaleTuple> {
        match self.inference {
            Some(t) if t != self.mosaic => vec![t, self.mosaic],
            Some(t) => vec![t],
            None => vec![self.mosaic],
        }
    }
}

/// Branch output feeding a model: the centre crop of the resized frame,
/// expressed in input coordinates.
pub fn inference_tuple(input: Dimensions, model: &ModelSpec) -> ScaleTuple {
    let [resize_w, resize_h] = model.resize;
    let [crop_w, crop_h] = model.crop;
    let offset = |resize: u32, crop: u32, full: u32| -> u32 {
        let margin = u64::from(resize.saturating_sub(crop) / 2);
        (margin * u64::from(full) / u64::from(resize.max(1))) as u32
    };
    ScaleTuple::new(
        crop_w,
        crop_h,
        offset(resize_w, crop_w, input.width),
        offset(resize_h, crop_h, input.height),
    )
}

/// One unique resolution and the number of subflows requiring it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionEntry {
    pub tuple: ScaleTuple,
    pub count: usize,
}

/// Position of a unique resolution among the branch stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupLocation {
    pub stage: usize,
    pub group: usize,
}

/// Deduplicated resolutions of one flow, in first-appearance order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionTable {
    entries: Vec<ResolutionEntry>,
}

impl ResolutionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the per-subflow requirements.
    pub fn from_subflows<'a>(subflows: impl IntoIterator<Item = &'a SubflowTuples>) -> Self {
        let mut table = Self::new();
        for tuples in subflows {
            for tuple in tuples.distinct() {
                table.add(tuple);
            }
        }
        table
    }

    /// Count one more consumer of `tuple`; returns its entry index.
    pub fn add(&mut self, tuple: ScaleTuple) -> usize {
        match self.find(&tuple) {
            Some(i) => {
                self.entries[i].count += 1;
                i
            }
            None => {
                self.entries.push(ResolutionEntry { tuple, count: 1 });
                self.entries.len() - 1
            }
        }
    }

    /// Exact match on all four fields.
    pub fn find(&self, tuple: &ScaleTuple) -> Option<usize> {
        self.entries.iter().position(|e| e.tuple == *tuple)
    }

    pub fn entries(&self) -> &[ResolutionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of branch stages needed: `ceil(unique / fanout)`.
    pub fn stage_count(&self, fanout: usize) -> usize {
        self.entries.len().div_ceil(fanout.max(1))
    }

    /// Output groups of each branch stage.
    pub fn partition(&self, fanout: usize) -> Vec<Vec<BranchGroup>> {
        self.entries
            .chunks(fanout.max(1))
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|e| BranchGroup {
                        tuple: e.tuple,
                        count: e.count,
                    })
                    .collect()
            })
            .collect()
    }

    /// Stage and group serving `tuple`.
    pub fn locate(&self, tuple: &ScaleTuple, fanout: usize) -> Option<GroupLocation> {
        let index = self.find(tuple)?;
        let fanout = fanout.max(1);
        Some(GroupLocation {
            stage: index / fanout,
            group: index % fanout,
        })
    }
}
