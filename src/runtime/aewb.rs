//! Auto exposure / auto white balance.
//!
//! Gray-world white balance plus a proportional exposure loop, driven by the
//! ISP's H3A statistics one frame behind.

use crate::pipeline::modules::isp::H3A_GRID;
use crate::pipeline::modules::{AewbParams, H3aStats, SensorInfo};

/// Mid-gray target for the mean luma, as a fraction of full scale.
pub const TARGET_LUMA: f32 = 0.18;

const GAIN_RANGE: (f32, f32) = (0.25, 4.0);
const EXPOSURE_RANGE_US: (f32, f32) = (100.0, 33_333.0);
const ANALOG_GAIN_RANGE: (f32, f32) = (1.0, 16.0);
/// Largest exposure change applied in one update.
const MAX_STEP: f32 = 2.0;
/// Fraction of the white-balance correction applied per update.
const SMOOTHING: f32 = 0.5;

pub struct AewbController {
    params: AewbParams,
    window_pixels: f32,
    full_scale: f32,
    updates: u64,
}

impl AewbController {
    pub fn new(sensor: &SensorInfo) -> Self {
        let windows = (H3A_GRID.0 * H3A_GRID.1) as f32;
        Self {
            params: AewbParams::default(),
            window_pixels: (sensor.dims.area() as f32 / windows).max(1.0),
            full_scale: ((1u32 << sensor.bit_depth.min(16)) - 1) as f32,
            updates: 0,
        }
    }

    pub fn params(&self) -> AewbParams {
        self.params
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Fold one statistics frame in and return the parameters to apply.
    ///
    /// Empty or single-channel-dark statistics leave the parameters as is.
    pub fn update(&mut self, stats: &H3aStats) -> AewbParams {
        let mut sums = [0f64; 3];
        for window in &stats.windows {
            for (sum, value) in sums.iter_mut().zip(window) {
                *sum += f64::from(*value);
            }
        }
        if stats.windows.is_empty() || sums.iter().any(|&s| s <= 0.0) {
            tracing::trace!("AEWB: no usable statistics");
            return self.params;
        }

        let [r, g, b] = sums;
        let target = [g / r, 1.0, g / b];
        for (gain, target) in self.params.gains.iter_mut().zip(target) {
            let target = (target as f32).clamp(GAIN_RANGE.0, GAIN_RANGE.1);
            *gain += (target - *gain) * SMOOTHING;
        }

        let pixels = stats.windows.len() as f64 * f64::from(self.window_pixels);
        let luma = (0.299 * r + 0.587 * g + 0.114 * b) / pixels / f64::from(self.full_scale);
        let correction = (TARGET_LUMA / luma as f32).clamp(1.0 / MAX_STEP, MAX_STEP);
        self.apply_exposure(correction);

        self.updates += 1;
        tracing::trace!(
            "AEWB: luma {:.3}, gains {:?}, exposure {:.0}us x{:.2}",
            luma,
            self.params.gains,
            self.params.exposure_us,
            self.params.analog_gain
        );
        self.params
    }

    /// Spend exposure time first, analog gain once the time is saturated.
    fn apply_exposure(&mut self, correction: f32) {
        let total = self.params.exposure_us * self.params.analog_gain * correction;
        let exposure = total.clamp(EXPOSURE_RANGE_US.0, EXPOSURE_RANGE_US.1);
        let gain = (total / exposure).clamp(ANALOG_GAIN_RANGE.0, ANALOG_GAIN_RANGE.1);
        self.params.exposure_us = exposure;
        self.params.analog_gain = gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Dimensions;

    fn sensor() -> SensorInfo {
        SensorInfo {
            name: "imx219".into(),
            dims: Dimensions::new(1920, 1080),
            bit_depth: 10,
            dcc_id: 219,
        }
    }

    fn uniform(controller: &AewbController, rgb: [f32; 3]) -> H3aStats {
        let per_window = |level: f32| (level * controller.full_scale * controller.window_pixels) as u32;
        H3aStats {
            windows: vec![
                [per_window(rgb[0]), per_window(rgb[1]), per_window(rgb[2])];
                H3A_GRID.0 * H3A_GRID.1
            ],
        }
    }

    #[test]
    fn test_gray_world_converges() {
        let mut aewb = AewbController::new(&sensor());
        let stats = uniform(&aewb, [0.09, 0.18, 0.36]);
        for _ in 0..20 {
            aewb.update(&stats);
        }
        let gains = aewb.params().gains;
        assert!((gains[0] - 2.0).abs() < 0.01, "{:?}", gains);
        assert!((gains[1] - 1.0).abs() < f32::EPSILON);
        assert!((gains[2] - 0.5).abs() < 0.01, "{:?}", gains);
    }

    #[test]
    fn test_dark_scene_raises_exposure_then_gain() {
        let mut aewb = AewbController::new(&sensor());
        let stats = uniform(&aewb, [0.01, 0.01, 0.01]);
        let before = aewb.params();
        aewb.update(&stats);
        assert!(aewb.params().exposure_us > before.exposure_us);
        for _ in 0..10 {
            aewb.update(&stats);
        }
        let after = aewb.params();
        assert_eq!(after.exposure_us, EXPOSURE_RANGE_US.1);
        assert!(after.analog_gain > 1.0);
    }

    #[test]
    fn test_empty_stats_keep_params() {
        let mut aewb = AewbController::new(&sensor());
        let zeros = H3aStats {
            windows: vec![[0; 3]; 4],
        };
        assert_eq!(aewb.update(&zeros), AewbParams::default());
        assert_eq!(aewb.updates(), 0);
    }
}
