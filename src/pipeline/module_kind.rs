//! Module kind enumeration.
//!
//! Every node wraps exactly one processing module. The kind tags which one,
//! drives target assignment and labels nodes in topology dumps.

use serde::{Deserialize, Serialize};

/// Kinds of processing modules the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    /// Image signal processor: raw sensor frames to images plus statistics.
    Isp,
    /// Lens distortion correction.
    Ldc,
    /// Plain fan-out of one image stream.
    Split,
    /// Multi-output scaler feeding several resolutions.
    Branch,
    /// Image to tensor conversion ahead of inference.
    Preproc,
    /// Neural-network inference.
    Inference,
    /// Overlay of inference results onto an image.
    Postproc,
    /// Mosaic composition into one output frame.
    Output,
    /// Externally provided module.
    Custom,
}

impl ModuleKind {
    /// Get the display name for this module kind.
    pub fn display_name(&self) -> &'static str {
        match self {
            ModuleKind::Isp => "ISP",
            ModuleKind::Ldc => "LDC",
            ModuleKind::Split => "Split",
            ModuleKind::Branch => "Branch",
            ModuleKind::Preproc => "Pre-process",
            ModuleKind::Inference => "Inference",
            ModuleKind::Postproc => "Post-process",
            ModuleKind::Output => "Output",
            ModuleKind::Custom => "Custom",
        }
    }

    /// Short prefix used to build default node names.
    pub fn name_prefix(&self) -> &'static str {
        match self {
            ModuleKind::Isp => "isp",
            ModuleKind::Ldc => "ldc",
            ModuleKind::Split => "split",
            ModuleKind::Branch => "branch",
            ModuleKind::Preproc => "preproc",
            ModuleKind::Inference => "infer",
            ModuleKind::Postproc => "postproc",
            ModuleKind::Output => "output",
            ModuleKind::Custom => "custom",
        }
    }

    /// Get all module kinds.
    pub fn all() -> &'static [ModuleKind] {
        &[
            ModuleKind::Isp,
            ModuleKind::Ldc,
            ModuleKind::Split,
            ModuleKind::Branch,
            ModuleKind::Preproc,
            ModuleKind::Inference,
            ModuleKind::Postproc,
            ModuleKind::Output,
            ModuleKind::Custom,
        ]
    }

    /// Whether the module belongs to the input stage chain.
    pub fn is_input_stage(&self) -> bool {
        matches!(self, ModuleKind::Isp | ModuleKind::Ldc | ModuleKind::Split)
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
