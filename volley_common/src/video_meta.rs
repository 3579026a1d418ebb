use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::frame::VideoInfo;
use crate::frame_meta::FrameMeta;

/// Metadata corresponding to an annotated video.
#[derive(Debug, Deserialize, Serialize)]
pub struct VideoMeta {
    /// Path to original input video file.
    pub input_file: PathBuf,
    /// Path to output video file, with annotation overlays.
    pub output_file: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub batch_size: usize,
    /// Per-frame game state + drawn detections, in output order.
    pub frames: Vec<FrameMeta>,
}

impl VideoMeta {
    pub fn new(input_file: PathBuf, output_file: PathBuf, info: &VideoInfo, batch_size: usize) -> Self {
        Self {
            input_file,
            output_file,
            width: info.width,
            height: info.height,
            fps: info.fps_f64(),
            batch_size,
            frames: Vec::new(),
        }
    }

    pub fn push(&mut self, frame: FrameMeta) {
        self.frames.push(frame);
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create metadata file {path:?}"))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)
            .with_context(|| format!("Failed to write metadata to {path:?}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BoundingBox, Category, Detection};
    use crate::state::GameState;

    #[test]
    fn test_json_roundtrip() {
        let info = VideoInfo {
            width: 1280,
            height: 720,
            fps: (30, 1),
            total_frames: 2,
        };
        let mut meta = VideoMeta::new("in.mp4".into(), "out/in_annotated.mp4".into(), &info, 30);
        meta.push(FrameMeta {
            index: 0,
            state: GameState::Play,
            detections: vec![Detection::BoundingBox(BoundingBox {
                xmin: 1.0,
                ymin: 2.0,
                xmax: 3.0,
                ymax: 4.0,
                category: Category::Ball,
                confidence: 0.5,
            })],
            dropped_detections: 0,
        });

        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"state\":\"play\""));
        assert!(json.contains("\"shape\":\"bounding_box\""));
        assert!(!json.contains("dropped_detections"));

        let back: VideoMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back.frames, meta.frames);
        assert_eq!(back.fps, 30.0);
    }

    #[test]
    fn test_write_json() {
        let info = VideoInfo {
            width: 2,
            height: 2,
            fps: (25, 1),
            total_frames: 0,
        };
        let meta = VideoMeta::new("a.mp4".into(), "b.mp4".into(), &info, 4);
        let path = std::env::temp_dir().join("volley_common_video_meta_test.json");
        meta.write_json(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"batch_size\": 4"));

        std::fs::remove_file(&path).ok();
    }
}
