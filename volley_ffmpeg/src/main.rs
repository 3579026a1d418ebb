extern crate ffmpeg_next as ffmpeg;

mod progress;
mod sink;
mod source;

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::Context;
use clap::Parser;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort_common::{ClassifierConfig, DetectorConfig, OnnxObjectDetector, OnnxStateClassifier};
use tracing_subscriber::prelude::*;
use volley_common::annotate::{find_system_font, AnnotationComposer, ImagePainter};
use volley_common::config::{PartialBatchPolicy, PipelineConfig};
use volley_common::frame_times::BatchTimes;
use volley_common::pipeline::{Pipeline, RunSummary};
use volley_common::source::FrameSource;
use volley_common::video_meta::VideoMeta;

use crate::sink::FfmpegSink;
use crate::source::FfmpegSource;

#[derive(Debug, Parser)]
pub struct Args {
    /// Path to input video file (.mp4/.mkv/...).
    input: PathBuf,
    /// JSON file with pipeline settings. Flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Frames per classified batch.
    #[arg(long, short = 'b')]
    buffer_size: Option<NonZeroUsize>,
    /// Directory for the annotated video and its metadata.
    #[arg(long, short)]
    output_dir: Option<PathBuf>,
    /// Discard trailing frames that do not fill a whole batch.
    #[arg(long, action, default_value = "false")]
    drop_partial_batch: bool,
    /// Skip writing the per-frame metadata json.
    #[arg(long, action, default_value = "false")]
    no_metadata: bool,
    /// TTF font for labels. Defaults to a common system font.
    #[arg(long)]
    font: Option<PathBuf>,
    /// Whether to attempt to use `cuda` hw acceleration.
    /// This may silently fail and fallback to cpu acceleration presently.
    #[arg(long, action, default_value = "false")]
    cuda: bool,
    /// Game state clip classifier onnx model.
    #[arg(long, default_value = "_models/volley_state.onnx")]
    state_model: PathBuf,
    /// Frames sampled from each batch for the state classifier.
    #[arg(long, default_value_t = 16)]
    clip_len: usize,
    /// Yolov8 onnx model detecting the ball.
    #[arg(long, default_value = "_models/volley_ball.onnx")]
    ball_model: PathBuf,
    /// Yolov8 onnx model detecting player actions.
    #[arg(long, default_value = "_models/volley_actions.onnx")]
    action_model: PathBuf,
    /// Minimum detection confidence.
    #[arg(long, default_value_t = 0.25)]
    conf_threshold: f32,
    /// IoU above which overlapping detections of a class are merged.
    #[arg(long, default_value_t = 0.45)]
    nms_threshold: f32,
}

impl Args {
    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(size) = self.buffer_size {
            config.buffer_capacity = size;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if self.drop_partial_batch {
            config.partial_batch = PartialBatchPolicy::Drop;
        }
        if self.no_metadata {
            config.record_frame_meta = false;
        }
        Ok(config)
    }

    fn painter(&self) -> anyhow::Result<ImagePainter> {
        let font = match &self.font {
            Some(path) => path.clone(),
            None => find_system_font()
                .context("No system font found for labels, pass one with --font")?,
        };
        ImagePainter::from_font_file(&font)
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize logging.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "warn,volley_ffmpeg=info,volley_common=info,ort_common=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = args.pipeline_config()?;
    log::debug!("{config:?}");

    // Register the execution provider before any session is built.
    let (ep, ep_name) = if args.cuda {
        (CUDAExecutionProvider::default().build(), "cuda")
    } else {
        (CPUExecutionProvider::default().build(), "cpu")
    };
    ort::init().with_execution_providers([ep]).commit()?;
    log::info!("Using ort {ep_name} execution provider");

    ffmpeg::init().context("Failed to initialize ffmpeg")?;

    let classifier = OnnxStateClassifier::new(ClassifierConfig {
        model: args.state_model.clone(),
        clip_len: args.clip_len,
        ..Default::default()
    })?;
    let detector = OnnxObjectDetector::new(DetectorConfig {
        ball_model: args.ball_model.clone(),
        action_model: args.action_model.clone(),
        conf_threshold: args.conf_threshold,
        iou_threshold: args.nms_threshold,
        ..Default::default()
    })?;
    let painter = args.painter()?;

    let _span = tracing::info_span!("annotate", input = %args.input.display()).entered();
    annotate_video(&args.input, config, classifier, detector, painter)
        .with_context(|| format!("Failed to annotate {:?}", args.input))
}

/// Runs the whole pipeline on one input file and writes the outputs.
fn annotate_video(
    input: &Path,
    config: PipelineConfig,
    classifier: OnnxStateClassifier,
    detector: OnnxObjectDetector,
    painter: ImagePainter,
) -> anyhow::Result<()> {
    let mut source = FfmpegSource::open(input)?;
    let info = *source.info();

    config.ensure_output_dir()?;
    let output = config.output_video_path(input);
    let mut sink = FfmpegSink::create(&output, &info)?;

    let (tx, rx) = mpsc::channel();
    let progress = std::thread::spawn(move || progress::report(rx));

    let mut pipeline = Pipeline::new(
        config.clone(),
        classifier,
        detector,
        AnnotationComposer::new(painter),
    )
    .with_progress(tx);
    let result = pipeline.run(&mut source, &mut sink);
    // closes the progress channel
    drop(pipeline);
    if progress.join().is_err() {
        log::warn!("Progress reporter panicked");
    }
    let summary = result?;

    log::info!("Annotated video written to {output:?}");
    if summary.shape_violations > 0 {
        log::warn!(
            "{} malformed detector outputs were skipped",
            summary.shape_violations
        );
    }
    log_times(&summary);

    if config.record_frame_meta {
        let meta_path = config.output_meta_path(input);
        let mut video_meta = VideoMeta::new(
            input.to_path_buf(),
            output,
            &info,
            config.buffer_capacity.get(),
        );
        for frame in summary.frame_meta {
            video_meta.push(frame);
        }
        video_meta.write_json(&meta_path)?;
        log::info!("Frame metadata written to {meta_path:?}");
    }

    Ok(())
}

fn log_times(summary: &RunSummary) {
    if summary.times.is_empty() {
        return;
    }
    let fmt = |t: BatchTimes| {
        format!(
            "classify {:?}, detect {:?}, annotate {:?}, write {:?}, total {:?}",
            t.classify,
            t.detect,
            t.annotate,
            t.write,
            t.total()
        )
    };
    // first batch includes lazy ort init
    log::info!("Batch times avg: {}", fmt(summary.times.avg(true)));
    log::info!("Batch times min: {}", fmt(summary.times.min(true)));
    log::info!("Batch times max: {}", fmt(summary.times.max(true)));
}
