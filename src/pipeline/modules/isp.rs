//! Image signal processor stage.
//!
//! Converts raw sensor frames into NV12 images and emits H3A statistics
//! (per-window colour sums) that drive the auto exposure / white balance
//! feedback loop. The AEWB parameters computed from those statistics come
//! back in through a dedicated sink pad.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::exemplar::{Exemplar, Justification, RawContainer};
use crate::pipeline::module_kind::ModuleKind;
use crate::pipeline::node::{InitContext, ModulePlugin, PostMaterializeContext};
use crate::pipeline::pad::PadSpec;
use crate::types::{Dimensions, PixelFormat};

/// Horizontal and vertical number of H3A statistics windows.
pub const H3A_GRID: (usize, usize) = (16, 12);

/// Bytes of one H3A statistics record: `u32` R/G/B sums per window.
pub const H3A_STATS_SIZE: usize = H3A_GRID.0 * H3A_GRID.1 * 3 * 4;

/// Bytes of one AEWB parameter record, see [`AewbParams`].
pub const AEWB_PARAMS_SIZE: usize = 5 * 4;

/// Minimum depth of the feedback pads so the loop never stalls the frame path.
pub const MIN_FEEDBACK_DEPTH: usize = 2;

/// Static properties of a supported image sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorInfo {
    pub name: String,
    pub dims: Dimensions,
    pub bit_depth: u8,
    /// Identifier of the sensor's tuning (DCC) profile.
    pub dcc_id: u32,
}

impl SensorInfo {
    pub fn raw_exemplar(&self) -> Exemplar {
        Exemplar::Raw {
            dims: self.dims,
            bit_depth: self.bit_depth,
            container: if self.bit_depth > 8 {
                RawContainer::Bits16
            } else {
                RawContainer::Bits8
            },
            justification: Justification::Lsb,
        }
    }
}

/// Decoded H3A statistics: one RGB sum per window, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct H3aStats {
    pub windows: Vec<[u32; 3]>,
}

impl H3aStats {
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < H3A_STATS_SIZE {
            return None;
        }
        let windows = bytes[..H3A_STATS_SIZE]
            .chunks_exact(12)
            .map(|w| {
                let word = |i: usize| u32::from_le_bytes([w[i], w[i + 1], w[i + 2], w[i + 3]]);
                [word(0), word(4), word(8)]
            })
            .collect();
        Some(Self { windows })
    }

    pub fn encode(&self, out: &mut [u8]) {
        for (window, chunk) in self.windows.iter().zip(out.chunks_exact_mut(12)) {
            for (value, bytes) in window.iter().zip(chunk.chunks_exact_mut(4)) {
                bytes.copy_from_slice(&value.to_le_bytes());
            }
        }
    }
}

/// White-balance gains plus exposure settings fed back into the ISP.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AewbParams {
    pub gains: [f32; 3],
    /// Exposure time in microseconds.
    pub exposure_us: f32,
    pub analog_gain: f32,
}

impl Default for AewbParams {
    fn default() -> Self {
        Self {
            gains: [1.0; 3],
            exposure_us: 10_000.0,
            analog_gain: 1.0,
        }
    }
}

impl AewbParams {
    pub fn encode(&self, out: &mut [u8]) {
        let values = [
            self.gains[0],
            self.gains[1],
            self.gains[2],
            self.exposure_us,
            self.analog_gain,
        ];
        for (value, bytes) in values.iter().zip(out.chunks_exact_mut(4)) {
            bytes.copy_from_slice(&value.to_le_bytes());
        }
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < AEWB_PARAMS_SIZE {
            return None;
        }
        let f = |i: usize| f32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Some(Self {
            gains: [f(0), f(4), f(8)],
            exposure_us: f(12),
            analog_gain: f(16),
        })
    }
}

/// Camera front end: raw frame + AEWB params in, images + statistics out.
pub struct IspModule {
    sensor: SensorInfo,
    fanout: usize,
    feedback_depth: usize,
}

impl IspModule {
    pub const SINK_RAW: usize = 0;
    pub const SINK_AEWB: usize = 1;

    pub fn new(sensor: SensorInfo, fanout: usize, feedback_depth: usize) -> Self {
        Self {
            sensor,
            fanout,
            feedback_depth: feedback_depth.max(MIN_FEEDBACK_DEPTH),
        }
    }

    /// Index of the statistics source pad (after the image outputs).
    pub fn stats_source(&self) -> usize {
        self.fanout
    }
}

impl ModulePlugin for IspModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Isp
    }

    fn init(&mut self, ctx: &mut InitContext) -> PipelineResult<()> {
        if self.fanout == 0 {
            return Err(ctx.error("ISP needs at least one image output"));
        }
        if self.sensor.dims.is_empty() {
            return Err(ctx.error(format!("sensor '{}' has no resolution", self.sensor.name)));
        }

        ctx.add_sink(PadSpec::new("raw", self.sensor.raw_exemplar()));
        ctx.add_sink(
            PadSpec::new("aewb", Exemplar::user_data("aewb_params", AEWB_PARAMS_SIZE))
                .with_depth(self.feedback_depth),
        );

        let image = Exemplar::Image {
            format: PixelFormat::Nv12,
            dims: self.sensor.dims,
        };
        for i in 0..self.fanout {
            ctx.add_source(PadSpec::new(format!("image_{}", i), image.clone()));
        }
        ctx.add_source(
            PadSpec::new("h3a", Exemplar::user_data("h3a_stats", H3A_STATS_SIZE))
                .with_depth(self.feedback_depth),
        );
        Ok(())
    }

    fn post_materialize(&mut self, ctx: &PostMaterializeContext) -> PipelineResult<()> {
        let mut dcc = Vec::with_capacity(16);
        dcc.extend_from_slice(&self.sensor.dcc_id.to_le_bytes());
        dcc.extend_from_slice(&self.sensor.dims.width.to_le_bytes());
        dcc.extend_from_slice(&self.sensor.dims.height.to_le_bytes());
        dcc.extend_from_slice(&u32::from(self.sensor.bit_depth).to_le_bytes());
        ctx.upload("dcc", &dcc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imx219() -> SensorInfo {
        SensorInfo {
            name: "imx219".into(),
            dims: Dimensions::new(1920, 1080),
            bit_depth: 10,
            dcc_id: 219,
        }
    }

    #[test]
    fn test_pad_layout() {
        let mut isp = IspModule::new(imx219(), 3, 1);
        let mut ctx = InitContext::new("isp");
        isp.init(&mut ctx).unwrap();
        assert_eq!(ctx.sinks.len(), 2);
        assert_eq!(ctx.sources.len(), 4);
        assert_eq!(ctx.sources[isp.stats_source()].name, "h3a");
        // Feedback depth is clamped to the minimum
        assert_eq!(ctx.sinks[IspModule::SINK_AEWB].depth, Some(MIN_FEEDBACK_DEPTH));
        assert_eq!(
            ctx.sinks[IspModule::SINK_RAW].exemplar.byte_size(),
            Some(1920 * 1080 * 2)
        );
    }

    #[test]
    fn test_zero_fanout_rejected() {
        let mut isp = IspModule::new(imx219(), 0, 2);
        assert!(isp.init(&mut InitContext::new("isp")).is_err());
    }

    #[test]
    fn test_payload_codecs() {
        let params = AewbParams {
            gains: [1.5, 1.0, 2.0],
            exposure_us: 8000.0,
            analog_gain: 2.0,
        };
        let mut buf = vec![0u8; AEWB_PARAMS_SIZE];
        params.encode(&mut buf);
        assert_eq!(AewbParams::decode(&buf), Some(params));

        let stats = H3aStats {
            windows: vec![[1, 2, 3]; H3A_GRID.0 * H3A_GRID.1],
        };
        let mut buf = vec![0u8; H3A_STATS_SIZE];
        stats.encode(&mut buf);
        assert_eq!(H3aStats::decode(&buf), Some(stats));
        assert_eq!(H3aStats::decode(&buf[..10]), None);
    }
}
