//! Core types used throughout the application
//!
//! Geometry (dimensions, windows), pixel formats and the graph schedule mode
//! are shared by the configuration layer, the flow compiler, the graph engine
//! and the runtime loop.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Width and height of an image plane in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether either side is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A placement rectangle, used for mosaic windows inside an output frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Size of the rectangle without its placement
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the rectangle lies entirely inside a frame of `frame` size
    pub fn fits_within(&self, frame: Dimensions) -> bool {
        let right = self.x.checked_add(self.width);
        let bottom = self.y.checked_add(self.height);
        matches!((right, bottom), (Some(r), Some(b)) if r <= frame.width && b <= frame.height)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Pixel layout of an image buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Semi-planar 4:2:0 (luma plane followed by interleaved chroma)
    #[default]
    Nv12,
    /// Packed 8-bit RGB
    Rgb24,
    /// Single 8-bit luma plane
    Gray8,
}

impl PixelFormat {
    /// Bytes needed for one frame of the given size, `None` on overflow
    pub fn frame_size(&self, dims: Dimensions) -> Option<usize> {
        let area = usize::try_from(dims.area()).ok()?;
        match self {
            PixelFormat::Nv12 => area.checked_mul(3).map(|v| v / 2),
            PixelFormat::Rgb24 => area.checked_mul(3),
            PixelFormat::Gray8 => Some(area),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Rgb24 => "RGB24",
            PixelFormat::Gray8 => "GRAY8",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// How the backend schedules graph execution
///
/// Fixed before materialization and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    /// The backend runs the graph whenever every boundary parameter has a
    /// buffer queued.
    #[default]
    Automatic,
    /// The caller triggers each graph execution explicitly.
    Manual,
}

impl fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleMode::Automatic => write!(f, "automatic"),
            ScheduleMode::Manual => write!(f, "manual"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_fits_within() {
        let frame = Dimensions::new(1920, 1080);
        assert!(Rect::new(0, 0, 1920, 1080).fits_within(frame));
        assert!(Rect::new(960, 540, 960, 540).fits_within(frame));
        assert!(!Rect::new(961, 540, 960, 540).fits_within(frame));
        assert!(!Rect::new(u32::MAX, 0, 2, 2).fits_within(frame));
    }

    #[test]
    fn test_frame_sizes() {
        let dims = Dimensions::new(640, 480);
        assert_eq!(PixelFormat::Nv12.frame_size(dims), Some(640 * 480 * 3 / 2));
        assert_eq!(PixelFormat::Rgb24.frame_size(dims), Some(640 * 480 * 3));
        assert_eq!(PixelFormat::Gray8.frame_size(dims), Some(640 * 480));
    }

    #[test]
    fn test_schedule_mode_serde() {
        let mode: ScheduleMode = serde_json::from_str("\"manual\"").unwrap();
        assert_eq!(mode, ScheduleMode::Manual);
        assert_eq!(ScheduleMode::default(), ScheduleMode::Automatic);
    }
}
