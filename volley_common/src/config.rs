use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BUFFER_CAPACITY: usize = 30;
const OUTPUT_SUFFIX: &str = "_annotated";
const OUTPUT_EXTENSION: &str = "mp4";

/// What to do with frames left in the buffer when the source runs dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialBatchPolicy {
    /// Classify and write the short final batch like any other.
    #[default]
    Flush,
    /// Discard it; the output loses up to `capacity - 1` trailing frames.
    Drop,
}

/// Settings consumed by [`crate::pipeline::Pipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frames per classified batch.
    pub buffer_capacity: NonZeroUsize,
    /// Directory for annotated videos, created if missing.
    pub output_dir: PathBuf,
    pub partial_batch: PartialBatchPolicy,
    /// Keep per-frame states and detections for the metadata export.
    pub record_frame_meta: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: NonZeroUsize::new(DEFAULT_BUFFER_CAPACITY)
                .unwrap_or(NonZeroUsize::MIN),
            output_dir: PathBuf::from("output"),
            partial_batch: PartialBatchPolicy::default(),
            record_frame_meta: true,
        }
    }
}

impl PipelineConfig {
    /// Reads a JSON config file. Missing keys take their default value.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {path:?}"))?;
        serde_json::from_str(&json).with_context(|| format!("Failed to parse config {path:?}"))
    }

    /// `<output_dir>/<input stem>_annotated.mp4`
    pub fn output_video_path(&self, input: &Path) -> PathBuf {
        self.output_dir
            .join(format!("{}{OUTPUT_SUFFIX}.{OUTPUT_EXTENSION}", file_stem(input)))
    }

    /// `<output_dir>/<input stem>_annotated.json`
    pub fn output_meta_path(&self, input: &Path) -> PathBuf {
        self.output_dir
            .join(format!("{}{OUTPUT_SUFFIX}.json", file_stem(input)))
    }

    pub fn ensure_output_dir(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create output directory {:?}", self.output_dir))
    }
}

fn file_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.buffer_capacity.get(), 30);
        assert_eq!(config.partial_batch, PartialBatchPolicy::Flush);
        assert_eq!(config.output_dir, PathBuf::from("output"));
    }

    #[test]
    fn test_output_paths() {
        let config = PipelineConfig {
            output_dir: PathBuf::from("/tmp/out"),
            ..Default::default()
        };
        let input = Path::new("/videos/match.day1.mkv");
        assert_eq!(
            config.output_video_path(input),
            PathBuf::from("/tmp/out/match.day1_annotated.mp4")
        );
        assert_eq!(
            config.output_meta_path(input),
            PathBuf::from("/tmp/out/match.day1_annotated.json")
        );
    }

    #[test]
    fn test_partial_json() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"buffer_capacity": 16, "partial_batch": "drop"}"#).unwrap();
        assert_eq!(config.buffer_capacity.get(), 16);
        assert_eq!(config.partial_batch, PartialBatchPolicy::Drop);
        assert!(config.record_frame_meta);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let parsed = serde_json::from_str::<PipelineConfig>(r#"{"buffer_capacity": 0}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_ensure_output_dir() {
        let dir = std::env::temp_dir().join("volley_common_config_test").join("nested");
        std::fs::remove_dir_all(&dir).ok();
        let config = PipelineConfig {
            output_dir: dir.clone(),
            ..Default::default()
        };
        config.ensure_output_dir().unwrap();
        assert!(dir.is_dir());
        std::fs::remove_dir_all(&dir).ok();
    }
}
