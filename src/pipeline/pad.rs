//! Pads: typed, directional connection points on a node.
//!
//! Modules declare their pads via `PadSpec` during `init`. The graph turns
//! each spec into a `Pad` in its arena and uses the exemplar and channel count
//! to validate links.

use crate::pipeline::exemplar::Exemplar;
use crate::pipeline::id::{NodeId, PadId, ParamId};
use crate::pipeline::pool::BufferPool;
use std::sync::Arc;

/// Whether a pad consumes (sink) or produces (source) buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadDirection {
    Sink,
    Source,
}

/// Static description of a pad, produced by a module's `init` callback.
#[derive(Debug, Clone)]
pub struct PadSpec {
    pub name: String,
    pub exemplar: Exemplar,
    pub channels: u32,
    /// Requested in-flight depth if the pad ends up as a boundary pad.
    /// `None` uses the engine default.
    pub depth: Option<usize>,
}

impl PadSpec {
    pub fn new(name: impl Into<String>, exemplar: Exemplar) -> Self {
        Self {
            name: name.into(),
            exemplar,
            channels: 1,
            depth: None,
        }
    }

    pub fn with_channels(mut self, channels: u32) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }
}

/// A pad in the graph arena.
#[derive(Debug)]
pub struct Pad {
    pub id: PadId,
    pub node: NodeId,
    pub name: String,
    pub direction: PadDirection,
    /// Index among same-direction pads of the owning node.
    pub index: usize,
    /// Parameter index of the pad on the backend kernel (sinks first, then sources).
    pub port_index: usize,
    pub channels: u32,
    pub depth: usize,
    pub peer: Option<PadId>,
    pub exemplar: Arc<Exemplar>,
    /// Attached at materialization iff the pad has no peer.
    pub pool: Option<BufferPool>,
    pub param: Option<ParamId>,
}

impl Pad {
    pub fn is_linked(&self) -> bool {
        self.peer.is_some()
    }

    pub fn is_sink(&self) -> bool {
        self.direction == PadDirection::Sink
    }

    pub fn is_source(&self) -> bool {
        self.direction == PadDirection::Source
    }
}

/// Read-only view of a pad handed to module callbacks.
#[derive(Debug, Clone)]
pub struct PadView {
    pub id: PadId,
    pub name: String,
    pub exemplar: Arc<Exemplar>,
    pub channels: u32,
    pub linked: bool,
}

impl From<&Pad> for PadView {
    fn from(pad: &Pad) -> Self {
        Self {
            id: pad.id,
            name: pad.name.clone(),
            exemplar: pad.exemplar.clone(),
            channels: pad.channels,
            linked: pad.is_linked(),
        }
    }
}
