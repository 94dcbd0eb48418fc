//! Built-in processing modules.
//!
//! Each module only declares pads, describes its kernel and uploads one-time
//! configuration; the pixel work itself belongs to the backend.

pub mod branch;
pub mod inference;
pub mod isp;
pub mod ldc;
pub mod output;
pub mod postproc;
pub mod preproc;
pub mod split;

pub use branch::{BranchGroup, BranchModule, ScaleTuple};
pub use inference::{InferenceConfig, InferenceModule, ModelTask};
pub use isp::{AewbParams, H3aStats, IspModule, SensorInfo};
pub use ldc::LdcModule;
pub use output::OutputModule;
pub use postproc::{PostprocConfig, PostprocModule};
pub use preproc::{PreprocConfig, PreprocModule, TensorLayout};
pub use split::SplitModule;
