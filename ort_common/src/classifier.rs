use std::path::PathBuf;

use anyhow::bail;
use fast_image_resize::Resizer;
use ndarray::{s, Array5, CowArray};
use ort::session::Session;
use ort::value::TensorRef;
use volley_common::state::StateClassifier;
use volley_common::{Frame, GameState};

use crate::preprocess::{self, IMAGENET_MEAN, IMAGENET_STD};

/// Axis order of the clip tensor the model expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipLayout {
    /// `[1, T, 3, H, W]`
    #[default]
    TimeFirst,
    /// `[1, 3, T, H, W]`
    ChannelsFirst,
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub model: PathBuf,
    /// Number of frames fed to the model per batch.
    pub clip_len: usize,
    /// Side of the square model input.
    pub input_size: u32,
    pub layout: ClipLayout,
    /// Model class names, in logit order.
    pub labels: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("_models/volley_state.onnx"),
            clip_len: 16,
            input_size: 224,
            layout: ClipLayout::default(),
            labels: ["service", "no-play", "play"].map(String::from).to_vec(),
        }
    }
}

/// Video clip classifier assigning one [`GameState`] to a whole batch.
pub struct OnnxStateClassifier {
    session: Session,
    config: ClassifierConfig,
    states: Vec<GameState>,
    resizer: Resizer,
}

impl OnnxStateClassifier {
    pub fn new(config: ClassifierConfig) -> anyhow::Result<Self> {
        if config.clip_len == 0 || config.input_size == 0 {
            bail!("Classifier clip length and input size must be positive");
        }
        let session = crate::load_session(&config.model)?;
        let states = config
            .labels
            .iter()
            .map(|label| {
                let state = GameState::from_label(label);
                if state == GameState::Unknown {
                    log::warn!("Classifier label {label:?} has no game state, reported as unknown");
                }
                state
            })
            .collect();
        Ok(Self {
            session,
            config,
            states,
            resizer: Resizer::new(),
        })
    }

    fn clip_tensor(&mut self, batch: &[Frame]) -> anyhow::Result<Array5<f32>> {
        let t = self.config.clip_len;
        let side = self.config.input_size as usize;
        let mut clip = match self.config.layout {
            ClipLayout::TimeFirst => Array5::<f32>::zeros((1, t, 3, side, side)),
            ClipLayout::ChannelsFirst => Array5::<f32>::zeros((1, 3, t, side, side)),
        };
        for (slot, idx) in sample_indices(batch.len(), t).into_iter().enumerate() {
            let resized = preprocess::resize(
                &mut self.resizer,
                &batch[idx].image,
                self.config.input_size,
                self.config.input_size,
            )?;
            let view = match self.config.layout {
                ClipLayout::TimeFirst => clip.slice_mut(s![0, slot, .., .., ..]),
                ClipLayout::ChannelsFirst => clip.slice_mut(s![0, .., slot, .., ..]),
            };
            preprocess::fill_chw(view, &resized, IMAGENET_MEAN, IMAGENET_STD);
        }
        Ok(clip)
    }
}

impl StateClassifier for OnnxStateClassifier {
    fn classify(&mut self, batch: &[Frame]) -> anyhow::Result<GameState> {
        if batch.is_empty() {
            bail!("Cannot classify an empty batch");
        }
        let clip = self.clip_tensor(batch)?;
        let clip_dyn = CowArray::from(clip).into_dyn();
        let input = ort::inputs![TensorRef::from_array_view(&clip_dyn)?];
        let outputs = self.session.run(input)?;
        let (_shape, logits) = outputs[0].try_extract_tensor::<f32>()?;

        let Some((idx, confidence)) = argmax(&softmax(logits)) else {
            bail!("Classifier produced no logits");
        };
        let state = self.states.get(idx).copied().unwrap_or_default();
        log::debug!("Clip class {idx} -> {state} ({confidence:.2})");
        Ok(state)
    }
}

/// Spreads `clip_len` picks evenly over `len` frames. Short batches repeat
/// frames so the clip is always full.
pub fn sample_indices(len: usize, clip_len: usize) -> Vec<usize> {
    if len == 0 {
        return Vec::new();
    }
    (0..clip_len).map(|i| i * len / clip_len).collect()
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|v| v / sum).collect()
}

/// Index and value of the largest element, first one on ties.
pub fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_indices_spread() {
        let picks = sample_indices(30, 16);
        assert_eq!(picks.len(), 16);
        assert_eq!(picks[0], 0);
        assert_eq!(picks[15], 28);
        assert!(picks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_sample_indices_short_batch_repeats() {
        assert_eq!(sample_indices(4, 8), vec![0, 0, 1, 1, 2, 2, 3, 3]);
        assert_eq!(sample_indices(1, 3), vec![0, 0, 0]);
        assert!(sample_indices(0, 16).is_empty());
    }

    #[test]
    fn test_softmax_argmax() {
        let probs = softmax(&[1.0, 3.0, 2.0]);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        let (idx, p) = argmax(&probs).unwrap();
        assert_eq!(idx, 1);
        assert!(p > 0.6);
        assert_eq!(argmax(&[]), None);
        assert_eq!(argmax(&[0.5, 0.5]), Some((0, 0.5)));
    }

    #[test]
    fn test_default_labels_map_to_states() {
        let config = ClassifierConfig::default();
        let states: Vec<_> = config.labels.iter().map(|l| GameState::from_label(l)).collect();
        assert_eq!(states, vec![GameState::Service, GameState::NoPlay, GameState::Play]);
    }
}
