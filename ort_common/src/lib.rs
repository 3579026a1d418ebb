//! ONNX Runtime backed implementations of the volley_common model traits.

pub mod classifier;
pub mod detector;
pub mod preprocess;
pub mod yolo;

use std::path::Path;

use anyhow::Context;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;

pub use classifier::{ClassifierConfig, OnnxStateClassifier};
pub use detector::{DetectorConfig, OnnxObjectDetector};

/// Loads an onnx model with full graph optimization, using whatever execution
/// providers were registered through `ort::init()`.
pub fn load_session(model: &Path) -> anyhow::Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .commit_from_file(model)
        .with_context(|| format!("Failed to load onnx model {model:?}"))?;
    log::debug!("{session:?}");
    log::info!("Prepared ort session with model: {model:?}");
    Ok(session)
}
