use serde::{Deserialize, Serialize};

use crate::detection::Detection;
use crate::frame::FrameIndex;
use crate::state::GameState;

/// What was drawn on one output frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMeta {
    pub index: FrameIndex,
    pub state: GameState,
    pub detections: Vec<Detection>,
    /// Detector output elements that were dropped as malformed.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub dropped_detections: usize,
}

fn is_zero(v: &usize) -> bool {
    *v == 0
}
