use std::fmt;

use image::Rgb;
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// Game state assigned to a whole batch of frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    Service,
    NoPlay,
    Play,
    #[default]
    Unknown,
}

impl GameState {
    /// Parses a classifier label such as `service`, `no-play` or `PLAY`.
    /// Anything unrecognised maps to [`GameState::Unknown`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace(&['-', ' '][..], "_").as_str() {
            "service" | "serve" => Self::Service,
            "no_play" | "noplay" => Self::NoPlay,
            "play" => Self::Play,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::NoPlay => "no_play",
            Self::Play => "play",
            Self::Unknown => "unknown",
        }
    }

    /// Colour of the state label drawn on every frame of the batch.
    pub fn color(&self) -> Rgb<u8> {
        match self {
            Self::Service => Rgb([0, 255, 0]),
            Self::NoPlay => Rgb([255, 0, 0]),
            Self::Play => Rgb([0, 255, 255]),
            Self::Unknown => Rgb([255, 255, 255]),
        }
    }

    /// Detection shapes are only drawn while the ball is (about to be) in play.
    pub fn shows_detections(&self) -> bool {
        !matches!(self, Self::NoPlay)
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a batch of frames to a single [`GameState`].
pub trait StateClassifier {
    /// `batch` is never empty and never longer than the configured capacity.
    fn classify(&mut self, batch: &[Frame]) -> anyhow::Result<GameState>;
}

impl<T: StateClassifier + ?Sized> StateClassifier for Box<T> {
    fn classify(&mut self, batch: &[Frame]) -> anyhow::Result<GameState> {
        (**self).classify(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_label() {
        assert_eq!(GameState::from_label("service"), GameState::Service);
        assert_eq!(GameState::from_label("no-play"), GameState::NoPlay);
        assert_eq!(GameState::from_label("NO_PLAY"), GameState::NoPlay);
        assert_eq!(GameState::from_label(" Play "), GameState::Play);
        assert_eq!(GameState::from_label("timeout"), GameState::Unknown);
        assert_eq!(GameState::from_label(""), GameState::Unknown);
    }

    #[test]
    fn test_colors() {
        assert_eq!(GameState::Service.color(), Rgb([0, 255, 0]));
        assert_eq!(GameState::NoPlay.color(), Rgb([255, 0, 0]));
        assert_eq!(GameState::Play.color(), Rgb([0, 255, 255]));
        assert_eq!(GameState::Unknown.color(), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_label_text_is_uppercased_name() {
        assert_eq!(GameState::NoPlay.to_string().to_uppercase(), "NO_PLAY");
        assert_eq!(GameState::Service.to_string().to_uppercase(), "SERVICE");
    }

    #[test]
    fn test_only_no_play_hides_detections() {
        assert!(!GameState::NoPlay.shows_detections());
        assert!(GameState::Play.shows_detections());
        assert!(GameState::Service.shows_detections());
        assert!(GameState::Unknown.shows_detections());
    }
}
