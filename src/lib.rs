//! # VisionFlow-RS: Vision Pipeline Graph Engine
//!
//! Configures and runs fixed-topology vision pipelines: camera or file
//! ingestion → ISP / lens correction → scaling branches → optional neural
//! network inference → mosaic composition → display, encode or file sinks.
//!
//! ## Architecture
//!
//! - **Pipeline**: typed dataflow graph engine. Nodes and pads are declared,
//!   linked, then materialized in one pass against a [`pipeline::Backend`];
//!   every unlinked pad gets its own [`pipeline::BufferPool`]
//! - **Flow**: compiler from flow configuration to a graph, deduplicating
//!   branch resolutions and outputs
//! - **Runtime**: steady-state loop feeding input pads, running the AEWB
//!   feedback and draining output pads
//! - **Config**: TOML/JSON pipeline configuration
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use visionflow_rs::{
//!     config::PipelineConfig, flow::FlowCompiler, pipeline::SoftwareBackend, runtime::Runner,
//! };
//!
//! fn main() -> visionflow_rs::Result<()> {
//!     let config = PipelineConfig::load("pipeline.toml")?;
//!     let backend = Arc::new(SoftwareBackend::new(config.engine.kernel_budget));
//!     let pipeline = FlowCompiler::new(&config).compile(backend)?;
//!     let stats = Runner::new(pipeline, &config.engine)?
//!         .with_iteration_limit(Some(300))
//!         .run()?;
//!     println!("{} frames out", stats.frames_out);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod flow;
pub mod pipeline;
pub mod runtime;
pub mod types;

// Re-export commonly used types
pub use config::{EngineSettings, PipelineConfig};
pub use error::{Result, ResultExt, VisionFlowError};
pub use flow::{CompiledPipeline, FlowCompiler};
pub use pipeline::{Backend, Graph, SoftwareBackend};
pub use runtime::{RunStats, Runner};
pub use types::{Dimensions, PixelFormat, Rect, ScheduleMode};
