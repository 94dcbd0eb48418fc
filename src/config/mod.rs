//! Configuration module for VisionFlow
//!
//! A pipeline configuration names its inputs, models and outputs in tables
//! and wires them together with a list of flow entries:
//!
//! ```toml
//! [inputs.cam0]
//! source = "camera"
//! sensor = "imx219"
//!
//! [models.det0]
//! path = "models/ssd"
//! task = "detection"
//! resize = [512, 512]
//! crop = [512, 512]
//!
//! [outputs.disp0]
//! sink = "display"
//! width = 1920
//! height = 1080
//!
//! [[flows]]
//! input = "cam0"
//! model = "det0"
//! output = "disp0"
//! mosaic = { x = 0, y = 0, width = 960, height = 540 }
//! ```
//!
//! Files ending in `.json` are parsed as JSON, everything else as TOML.
//! [`PipelineConfig::validate`] rejects inconsistent configurations before
//! any graph resource exists, naming the offending entry and field.

pub mod settings;

pub use settings::*;

use crate::error::{Result, VisionFlowError};
use crate::pipeline::exemplar::TensorType;
use crate::pipeline::modules::{ModelTask, SensorInfo, TensorLayout};
use crate::types::{Dimensions, PixelFormat, Rect};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default capture / playback rate in frames per second
pub const DEFAULT_FRAMERATE: u32 = 30;

/// Supported camera sensors: (name, width, height, bit depth, tuning id)
const SENSORS: &[(&str, u32, u32, u8, u32)] = &[
    ("imx219", 1920, 1080, 10, 219),
    ("imx390", 1936, 1096, 12, 390),
    ("ov2312", 1600, 1300, 10, 2312),
];

/// Look up a supported sensor by name
pub fn sensor_info(name: &str) -> Option<SensorInfo> {
    SENSORS
        .iter()
        .find(|(n, ..)| n.eq_ignore_ascii_case(name))
        .map(|&(n, w, h, bit_depth, dcc_id)| SensorInfo {
            name: n.to_string(),
            dims: Dimensions::new(w, h),
            bit_depth,
            dcc_id,
        })
}

/// Names of all supported sensors
pub fn sensor_names() -> impl Iterator<Item = &'static str> {
    SENSORS.iter().map(|(n, ..)| *n)
}

// ==================== Inputs ====================

/// Where an input's frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Raw sensor frames through the ISP
    Camera,
    /// Pre-recorded frames read from a file
    RawFile,
    /// Generated moving test pattern
    TestPattern,
}

/// One named input source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub source: SourceKind,

    /// Camera sensor name (camera only)
    #[serde(default)]
    pub sensor: Option<String>,

    /// Frame size; cameras default to the sensor resolution
    #[serde(default)]
    pub width: u32,

    #[serde(default)]
    pub height: u32,

    #[serde(default = "default_framerate")]
    pub framerate: u32,

    /// Insert a lens distortion correction stage
    #[serde(default)]
    pub ldc: bool,

    /// Frame file (raw_file only)
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub format: PixelFormat,

    /// Restart at the beginning of the file instead of ending the stream
    #[serde(default = "default_true", rename = "loop")]
    pub looping: bool,
}

fn default_framerate() -> u32 {
    DEFAULT_FRAMERATE
}

fn default_true() -> bool {
    true
}

impl InputSpec {
    /// Frame size produced by the input stage
    pub fn dimensions(&self) -> Dimensions {
        if self.width == 0 && self.height == 0 {
            if let Some(sensor) = self.sensor.as_deref().and_then(sensor_info) {
                return sensor.dims;
            }
        }
        Dimensions::new(self.width, self.height)
    }

    fn validate(&self, name: &str) -> Result<()> {
        let at = |field: &str| format!("inputs.{}.{}", name, field);
        if self.framerate == 0 {
            return Err(VisionFlowError::config_at(at("framerate"), "must be positive"));
        }
        match self.source {
            SourceKind::Camera => {
                let sensor_name = self.sensor.as_deref().ok_or_else(|| {
                    VisionFlowError::config_at(at("sensor"), "camera inputs need a sensor")
                })?;
                let sensor = sensor_info(sensor_name).ok_or_else(|| {
                    VisionFlowError::config_at(
                        at("sensor"),
                        format!(
                            "unsupported sensor '{}' (expected one of: {})",
                            sensor_name,
                            sensor_names().collect::<Vec<_>>().join(", ")
                        ),
                    )
                })?;
                if self.dimensions() != sensor.dims {
                    return Err(VisionFlowError::config_at(
                        at("width"),
                        format!(
                            "{} does not match the {} sensor resolution {}",
                            self.dimensions(),
                            sensor.name,
                            sensor.dims
                        ),
                    ));
                }
            }
            SourceKind::RawFile => {
                if self.path.is_none() {
                    return Err(VisionFlowError::config_at(at("path"), "raw_file inputs need a path"));
                }
            }
            SourceKind::TestPattern => {}
        }
        if self.source != SourceKind::Camera && self.format != PixelFormat::Nv12 {
            return Err(VisionFlowError::config_at(
                at("format"),
                format!("unsupported input format {}", self.format),
            ));
        }
        let dims = self.dimensions();
        if dims.is_empty() || dims.width % 2 != 0 || dims.height % 2 != 0 {
            return Err(VisionFlowError::config_at(
                at("width"),
                format!("frame size {} must be non-zero and even", dims),
            ));
        }
        Ok(())
    }
}

// ==================== Models ====================

/// One named neural-network model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub path: String,

    pub task: ModelTask,

    /// Size the input frame is resized to before cropping
    pub resize: [u32; 2],

    /// Centre crop taken from the resized frame; the network input size
    pub crop: [u32; 2],

    #[serde(default)]
    pub layout: TensorLayout,

    #[serde(default)]
    pub data_type: TensorType,

    #[serde(default = "default_classes")]
    pub num_classes: usize,

    #[serde(default = "default_max_detections")]
    pub max_detections: usize,

    /// Minimum score of drawn detections
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Number of labels drawn for classification
    #[serde(default = "default_top_n")]
    pub top_n: u32,

    #[serde(default)]
    pub mean: [f32; 3],

    #[serde(default = "default_scale")]
    pub scale: [f32; 3],
}

fn default_classes() -> usize {
    1000
}

fn default_max_detections() -> usize {
    100
}

fn default_threshold() -> f32 {
    0.5
}

fn default_top_n() -> u32 {
    5
}

fn default_scale() -> [f32; 3] {
    [1.0; 3]
}

impl ModelSpec {
    pub fn resize_dims(&self) -> Dimensions {
        Dimensions::new(self.resize[0], self.resize[1])
    }

    pub fn crop_dims(&self) -> Dimensions {
        Dimensions::new(self.crop[0], self.crop[1])
    }

    fn validate(&self, name: &str) -> Result<()> {
        let at = |field: &str| format!("models.{}.{}", name, field);
        if self.resize_dims().is_empty() {
            return Err(VisionFlowError::config_at(at("resize"), "must be non-zero"));
        }
        let crop = self.crop_dims();
        if crop.is_empty() || crop.width > self.resize[0] || crop.height > self.resize[1] {
            return Err(VisionFlowError::config_at(
                at("crop"),
                format!("{} must be non-zero and within resize {}", crop, self.resize_dims()),
            ));
        }
        match self.task {
            ModelTask::Classification if self.num_classes == 0 => Err(
                VisionFlowError::config_at(at("num_classes"), "must be positive"),
            ),
            ModelTask::Detection if self.max_detections == 0 => Err(
                VisionFlowError::config_at(at("max_detections"), "must be positive"),
            ),
            _ => Ok(()),
        }
    }
}

// ==================== Outputs ====================

/// Where an output's composed frames go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Display,
    Encode,
    /// Raw frames appended to a file
    File,
    /// Frames are counted and dropped
    Null,
}

/// One named output sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub sink: SinkKind,
    pub width: u32,
    pub height: u32,

    /// Destination file (file sinks only)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl OutputSpec {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    fn validate(&self, name: &str) -> Result<()> {
        let at = |field: &str| format!("outputs.{}.{}", name, field);
        if self.dimensions().is_empty() {
            return Err(VisionFlowError::config_at(at("width"), "must be non-zero"));
        }
        if self.sink == SinkKind::File && self.path.is_none() {
            return Err(VisionFlowError::config_at(at("path"), "file sinks need a path"));
        }
        Ok(())
    }
}

// ==================== Flows ====================

/// One `[[flows]]` entry: input → optional model → mosaic window of an output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEntry {
    pub input: String,

    #[serde(default)]
    pub model: Option<String>,

    pub output: String,

    pub mosaic: Rect,
}

/// Sub-pipeline of a flow
#[derive(Debug, Clone, PartialEq)]
pub struct SubflowSpec {
    /// Position of the originating entry in `flows`
    pub entry: usize,
    pub model: Option<String>,
    pub output: String,
    pub mosaic: Rect,
}

/// All subflows sharing one input
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSpec {
    pub input: String,
    pub subflows: Vec<SubflowSpec>,
}

// ==================== Pipeline Config ====================

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub engine: EngineSettings,

    pub inputs: BTreeMap<String, InputSpec>,

    #[serde(default)]
    pub models: BTreeMap<String, ModelSpec>,

    pub outputs: BTreeMap<String, OutputSpec>,

    pub flows: Vec<FlowEntry>,
}

impl PipelineConfig {
    /// Load a configuration file, choosing the format from its extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            VisionFlowError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        if is_json(path) {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
        .map_err(|e| e.with_context(format!("{:?}", path)))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| VisionFlowError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| VisionFlowError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save the configuration, choosing the format from the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| VisionFlowError::Serialization(e.to_string()))?
        } else {
            toml::to_string_pretty(self)
                .map_err(|e| VisionFlowError::Serialization(e.to_string()))?
        };

        std::fs::write(path, content).map_err(|e| {
            VisionFlowError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Check every cross-reference and geometry constraint
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;

        if self.flows.is_empty() {
            return Err(VisionFlowError::config_at("flows", "at least one flow is required"));
        }
        for (name, input) in &self.inputs {
            input.validate(name)?;
        }
        for (name, model) in &self.models {
            model.validate(name)?;
        }
        for (name, output) in &self.outputs {
            output.validate(name)?;
        }

        for (i, flow) in self.flows.iter().enumerate() {
            let at = |field: &str| format!("flows[{}].{}", i, field);
            if !self.inputs.contains_key(&flow.input) {
                return Err(VisionFlowError::config_at(
                    at("input"),
                    format!("unknown input '{}'", flow.input),
                ));
            }
            if let Some(model) = &flow.model {
                if !self.models.contains_key(model) {
                    return Err(VisionFlowError::config_at(
                        at("model"),
                        format!("unknown model '{}'", model),
                    ));
                }
            }
            let output = self.outputs.get(&flow.output).ok_or_else(|| {
                VisionFlowError::config_at(at("output"), format!("unknown output '{}'", flow.output))
            })?;
            if flow.mosaic.is_empty() || !flow.mosaic.fits_within(output.dimensions()) {
                return Err(VisionFlowError::config_at(
                    at("mosaic"),
                    format!(
                        "window {} must be non-empty and inside the {} output '{}'",
                        flow.mosaic,
                        output.dimensions(),
                        flow.output
                    ),
                ));
            }
            if flow.mosaic.width % 2 != 0 || flow.mosaic.height % 2 != 0 {
                return Err(VisionFlowError::config_at(
                    at("mosaic"),
                    format!("window {} must have even dimensions", flow.mosaic),
                ));
            }
        }
        Ok(())
    }

    /// Group flow entries by input, in order of first appearance
    pub fn flow_specs(&self) -> Vec<FlowSpec> {
        let mut specs: Vec<FlowSpec> = Vec::new();
        for (entry, flow) in self.flows.iter().enumerate() {
            let subflow = SubflowSpec {
                entry,
                model: flow.model.clone(),
                output: flow.output.clone(),
                mosaic: flow.mosaic,
            };
            match specs.iter_mut().find(|s| s.input == flow.input) {
                Some(spec) => spec.subflows.push(subflow),
                None => specs.push(FlowSpec {
                    input: flow.input.clone(),
                    subflows: vec![subflow],
                }),
            }
        }
        specs
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}
