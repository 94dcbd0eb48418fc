//! Test data builders for pipeline configurations

use std::collections::BTreeMap;
use std::path::PathBuf;
use visionflow_rs::config::{
    FlowEntry, InputSpec, ModelSpec, OutputSpec, PipelineConfig, SinkKind, SourceKind,
};
use visionflow_rs::pipeline::modules::{ModelTask, TensorLayout};
use visionflow_rs::pipeline::TensorType;
use visionflow_rs::types::{PixelFormat, Rect, ScheduleMode};

/// Builder for creating test InputSpecs
pub struct InputBuilder {
    spec: InputSpec,
}

impl InputBuilder {
    pub fn test_pattern(width: u32, height: u32) -> Self {
        Self {
            spec: InputSpec {
                source: SourceKind::TestPattern,
                sensor: None,
                width,
                height,
                framerate: 30,
                ldc: false,
                path: None,
                format: PixelFormat::Nv12,
                looping: true,
            },
        }
    }

    pub fn camera(sensor: &str) -> Self {
        let mut builder = Self::test_pattern(0, 0);
        builder.spec.source = SourceKind::Camera;
        builder.spec.sensor = Some(sensor.to_string());
        builder
    }

    pub fn raw_file(path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        let mut builder = Self::test_pattern(width, height);
        builder.spec.source = SourceKind::RawFile;
        builder.spec.path = Some(path.into());
        builder
    }

    pub fn ldc(mut self, ldc: bool) -> Self {
        self.spec.ldc = ldc;
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.spec.looping = looping;
        self
    }

    pub fn framerate(mut self, framerate: u32) -> Self {
        self.spec.framerate = framerate;
        self
    }

    pub fn build(self) -> InputSpec {
        self.spec
    }
}

/// Builder for creating test ModelSpecs
pub struct ModelBuilder {
    spec: ModelSpec,
}

impl ModelBuilder {
    pub fn new(task: ModelTask) -> Self {
        Self {
            spec: ModelSpec {
                path: "models/test".to_string(),
                task,
                resize: [256, 256],
                crop: [224, 224],
                layout: TensorLayout::Nchw,
                data_type: TensorType::U8,
                num_classes: 1000,
                max_detections: 100,
                threshold: 0.5,
                top_n: 5,
                mean: [0.0; 3],
                scale: [1.0; 3],
            },
        }
    }

    pub fn resize(mut self, width: u32, height: u32) -> Self {
        self.spec.resize = [width, height];
        self
    }

    pub fn crop(mut self, width: u32, height: u32) -> Self {
        self.spec.crop = [width, height];
        self
    }

    pub fn build(self) -> ModelSpec {
        self.spec
    }
}

pub fn null_output(width: u32, height: u32) -> OutputSpec {
    OutputSpec {
        sink: SinkKind::Null,
        width,
        height,
        path: None,
    }
}

pub fn file_output(path: impl Into<PathBuf>, width: u32, height: u32) -> OutputSpec {
    OutputSpec {
        sink: SinkKind::File,
        width,
        height,
        path: Some(path.into()),
    }
}

/// Builder for creating test PipelineConfigs
#[derive(Default)]
pub struct ConfigBuilder {
    config: PipelineConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, name: &str, spec: InputSpec) -> Self {
        self.config.inputs.insert(name.to_string(), spec);
        self
    }

    pub fn model(mut self, name: &str, spec: ModelSpec) -> Self {
        self.config.models.insert(name.to_string(), spec);
        self
    }

    pub fn output(mut self, name: &str, spec: OutputSpec) -> Self {
        self.config.outputs.insert(name.to_string(), spec);
        self
    }

    pub fn flow(mut self, input: &str, model: Option<&str>, output: &str, mosaic: Rect) -> Self {
        self.config.flows.push(FlowEntry {
            input: input.to_string(),
            model: model.map(str::to_string),
            output: output.to_string(),
            mosaic,
        });
        self
    }

    pub fn schedule(mut self, schedule: ScheduleMode) -> Self {
        self.config.engine.schedule = schedule;
        self
    }

    pub fn branch_fanout(mut self, fanout: usize) -> Self {
        self.config.engine.branch_fanout = fanout;
        self
    }

    pub fn dequeue_timeout_ms(mut self, ms: u64) -> Self {
        self.config.engine.dequeue_timeout_ms = ms;
        self
    }

    pub fn build(self) -> PipelineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .input("in0", InputBuilder::test_pattern(640, 480).build())
            .output("out0", null_output(640, 480))
            .flow("in0", None, "out0", Rect::new(0, 0, 320, 240))
            .build();

        assert!(config.validate().is_ok());
        assert_eq!(config.flow_specs().len(), 1);
    }
}
