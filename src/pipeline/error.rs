//! Graph-engine error types.
//!
//! `PipelineError` covers the fatal classes (link-type, state, resource and
//! backend errors). `QueueError` is reported by buffer pools; its transient
//! variants are back-pressure, which the runtime loop treats as "skip this
//! pad this iteration", and the rest are fatal.

use crate::pipeline::id::{NodeId, PadId};
use crate::pipeline::pad::PadDirection;
use crate::pipeline::pool::Buffer;
use thiserror::Error;

/// Lifecycle state of a graph, see [`crate::pipeline::Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Declaring,
    Materialized,
    TornDown,
}

impl std::fmt::Display for GraphState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphState::Declaring => write!(f, "declaring"),
            GraphState::Materialized => write!(f, "materialized"),
            GraphState::TornDown => write!(f, "torn down"),
        }
    }
}

/// Errors that can occur within the graph engine.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Operation '{operation}' not allowed while graph is {state}")]
    InvalidState {
        operation: &'static str,
        state: GraphState,
    },

    #[error("Unknown pad {0:?}")]
    UnknownPad(PadId),

    #[error("Unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("Pad {pad:?} is a {actual:?} pad, expected {expected:?}")]
    WrongDirection {
        pad: PadId,
        expected: PadDirection,
        actual: PadDirection,
    },

    #[error("Pad {0:?} is already linked")]
    AlreadyLinked(PadId),

    #[error("Channel mismatch linking {source_pad:?} ({source_channels}) to {sink_pad:?} ({sink_channels})")]
    ChannelMismatch {
        source_pad: PadId,
        sink_pad: PadId,
        source_channels: u32,
        sink_channels: u32,
    },

    #[error("Type mismatch linking {source_pad:?} ({source_type}) to {sink_pad:?} ({sink_type})")]
    TypeMismatch {
        source_pad: PadId,
        sink_pad: PadId,
        source_type: String,
        sink_type: String,
    },

    #[error("Node '{node}' error: {message}")]
    Module { node: String, message: String },

    #[error("Buffer pool error: {0}")]
    Pool(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Cycle detected in graph: only {scheduled} of {total} nodes can be ordered")]
    CycleDetected { scheduled: usize, total: usize },
}

impl PipelineError {
    pub fn module(node: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Module {
            node: node.into(),
            message: message.into(),
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Errors reported by an execution backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("kernel creation failed: {0}")]
    KernelCreation(String),

    #[error("graph verification failed: {0}")]
    Verification(String),

    #[error("unknown parameter {0}")]
    UnknownParameter(u32),

    #[error("timed out waiting for completion")]
    TimedOut,

    #[error("graph is not ready to execute: {0}")]
    NotReady(String),

    #[error("backend is closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// Buffer queue conditions reported by pool operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// No buffer available (free-list or in-flight ring empty).
    #[error("queue empty")]
    Empty,
    /// In-flight ring has no room for another buffer.
    #[error("queue full")]
    Full,
    /// The backend did not signal completion in time.
    #[error("timed out")]
    TimedOut,
    /// The backend has been torn down; the pool is unusable.
    #[error("backend closed")]
    Closed,
    /// The buffer belongs to a different pool.
    #[error("buffer {index} belongs to another pool")]
    ForeignBuffer { index: usize },
    /// The backend completed a buffer other than the oldest in flight.
    #[error("backend completed buffer {completed} but buffer {expected} is next")]
    OutOfOrder { expected: usize, completed: usize },
}

impl QueueError {
    /// `Empty`, `Full` and `TimedOut` are back-pressure, not failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QueueError::Empty | QueueError::Full | QueueError::TimedOut
        )
    }
}

/// A failed enqueue hands the buffer back so ownership is never lost.
#[derive(Error, Debug)]
#[error("enqueue failed: {error}")]
pub struct EnqueueError {
    pub error: QueueError,
    pub buffer: Buffer,
}

impl EnqueueError {
    pub fn into_buffer(self) -> Buffer {
        self.buffer
    }
}
