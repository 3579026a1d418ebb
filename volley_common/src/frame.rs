use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Position of a frame in its source stream, starting at 0.
pub type FrameIndex = u64;

/// A decoded frame together with its index in the source stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: FrameIndex,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: FrameIndex, image: RgbImage) -> Self {
        Self { index, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// A frame with state, position and detection overlays burned in.
///
/// Produced by consuming a [`Frame`], so the pre-annotation pixels are never
/// shared with it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedFrame {
    pub index: FrameIndex,
    pub image: RgbImage,
}

/// Stream properties reported by a source when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Frame rate as a `numerator / denominator` pair, as stored in the container.
    pub fps: (i32, i32),
    /// Expected number of frames. May be an estimate for some containers.
    pub total_frames: u64,
}

impl VideoInfo {
    pub fn fps_f64(&self) -> f64 {
        if self.fps.1 == 0 {
            return 0.0;
        }
        self.fps.0 as f64 / self.fps.1 as f64
    }
}
