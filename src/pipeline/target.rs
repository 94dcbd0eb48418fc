//! Hardware execution target assignment.
//!
//! Several module kinds can run on more than one instance of an accelerator
//! (two scalers, two DSPs). `TargetAllocator` hands those instances out
//! round-robin per kind. It is an explicit object owned by whoever builds
//! the graph, so assignment is deterministic for a given declaration order.

use crate::pipeline::module_kind::ModuleKind;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Name of a hardware execution unit, e.g. `MSC0` or `DSP_C7_1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target(pub String);

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Target(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Default target table of the reference SoC.
pub fn default_targets() -> BTreeMap<ModuleKind, Vec<String>> {
    let table: [(ModuleKind, &[&str]); 8] = [
        (ModuleKind::Isp, &["VPAC_VISS1"]),
        (ModuleKind::Ldc, &["VPAC_LDC1"]),
        (ModuleKind::Split, &["MPU_0"]),
        (ModuleKind::Branch, &["VPAC_MSC1", "VPAC_MSC2"]),
        (ModuleKind::Preproc, &["DSP_C66_1", "DSP_C66_2"]),
        (ModuleKind::Inference, &["DSP_C7_1"]),
        (ModuleKind::Postproc, &["DSP_C66_1", "DSP_C66_2"]),
        (ModuleKind::Output, &["VPAC_MSC1"]),
    ];
    table
        .iter()
        .map(|(kind, names)| (*kind, names.iter().map(|n| n.to_string()).collect()))
        .collect()
}

/// Round-robin allocator of execution targets per module kind.
#[derive(Debug, Clone, Default)]
pub struct TargetAllocator {
    targets: HashMap<ModuleKind, Vec<Target>>,
    cursors: HashMap<ModuleKind, usize>,
}

impl TargetAllocator {
    pub fn new(table: &BTreeMap<ModuleKind, Vec<String>>) -> Self {
        let targets = table
            .iter()
            .filter(|(_, names)| !names.is_empty())
            .map(|(kind, names)| (*kind, names.iter().cloned().map(Target).collect()))
            .collect();
        Self {
            targets,
            cursors: HashMap::new(),
        }
    }

    /// Next target for `kind`, or `None` if the kind has no dedicated target
    /// (the backend then picks one).
    pub fn next(&mut self, kind: ModuleKind) -> Option<Target> {
        let targets = self.targets.get(&kind)?;
        let cursor = self.cursors.entry(kind).or_insert(0);
        let target = targets[*cursor % targets.len()].clone();
        *cursor += 1;
        Some(target)
    }

    /// Number of targets handed out so far for `kind`.
    pub fn assigned(&self, kind: ModuleKind) -> usize {
        self.cursors.get(&kind).copied().unwrap_or(0)
    }

    /// Forget all assignments, keeping the table.
    pub fn reset(&mut self) {
        self.cursors.clear();
    }
}
