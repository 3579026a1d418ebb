//! Batched annotation of volleyball footage.
//!
//! Frames are read from a [`source::FrameSource`], grouped into fixed-size
//! batches by [`buffer::BatchBuffer`], labelled with one [`state::GameState`]
//! per batch, optionally run through an [`detection::ObjectDetector`], drawn
//! over by [`annotate::AnnotationComposer`] and written, in input order, to a
//! [`sink::FrameSink`]. [`pipeline::Pipeline`] drives the whole loop.

pub mod annotate;
pub mod buffer;
pub mod config;
pub mod detection;
pub mod error;
pub mod frame;
pub mod frame_meta;
pub mod frame_times;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod state;
pub mod video_meta;

pub use error::PipelineError;
pub use frame::{AnnotatedFrame, Frame, FrameIndex, VideoInfo};
pub use state::GameState;
