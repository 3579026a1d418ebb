use thiserror::Error;

use crate::buffer::BufferFull;
use crate::frame::FrameIndex;

/// Fatal failures of an annotation run.
///
/// Malformed detector output is not part of this type: it is filtered and
/// logged at ingestion, see [`crate::detection::normalize`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("video source {input} is unavailable: {reason}")]
    SourceUnavailable { input: String, reason: String },

    #[error("failed to read frame after {after:?}")]
    SourceRead {
        after: Option<FrameIndex>,
        #[source]
        source: anyhow::Error,
    },

    #[error("frame {found} arrived out of order, expected {expected}")]
    OutOfOrderFrame {
        expected: FrameIndex,
        found: FrameIndex,
    },

    #[error("state classification failed for batch starting at frame {first_frame}")]
    Classifier {
        first_frame: FrameIndex,
        #[source]
        source: anyhow::Error,
    },

    #[error("object detection failed on frame {frame_index}")]
    Detector {
        frame_index: FrameIndex,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to write frame {frame_index}")]
    SinkWrite {
        frame_index: FrameIndex,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to finalize output")]
    SinkFinish(#[source] anyhow::Error),

    #[error(transparent)]
    BufferFull(#[from] BufferFull),
}
