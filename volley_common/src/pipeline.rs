//! The read → buffer → classify → detect/annotate → write loop.

use std::sync::mpsc::Sender;
use std::time::Instant;

use crate::annotate::{AnnotationComposer, Painter};
use crate::buffer::BatchBuffer;
use crate::config::{PartialBatchPolicy, PipelineConfig};
use crate::detection::{FrameDetections, ObjectDetector};
use crate::error::PipelineError;
use crate::frame::{AnnotatedFrame, Frame, FrameIndex};
use crate::frame_meta::FrameMeta;
use crate::frame_times::{AggregatedTimes, BatchTimes};
use crate::sink::FrameSink;
use crate::source::FrameSource;
use crate::state::{GameState, StateClassifier};

/// Controller states, in the order a batch passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Reading,
    BatchReady,
    Classifying,
    ProcessingFrame,
    Flushed,
    Done,
}

/// A [`PipelineState`] together with the data the next transition consumes.
enum Step {
    Reading,
    BatchReady,
    Classifying(Vec<Frame>),
    ProcessingFrame {
        batch: Vec<Frame>,
        state: GameState,
        times: BatchTimes,
    },
    Flushed(BatchOutcome),
    Done,
}

impl Step {
    fn state(&self) -> PipelineState {
        match self {
            Self::Reading => PipelineState::Reading,
            Self::BatchReady => PipelineState::BatchReady,
            Self::Classifying(_) => PipelineState::Classifying,
            Self::ProcessingFrame { .. } => PipelineState::ProcessingFrame,
            Self::Flushed(_) => PipelineState::Flushed,
            Self::Done => PipelineState::Done,
        }
    }
}

/// Reported after every flushed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    /// 1-based batch number.
    pub batch: usize,
    pub first_frame: FrameIndex,
    pub last_frame: FrameIndex,
    pub state: GameState,
    pub frames_read: u64,
    pub frames_written: u64,
    pub total_frames: u64,
    pub times: BatchTimes,
    /// Whether this was a short batch flushed at end of stream.
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    BatchFlushed(BatchProgress),
    /// The final partial batch was discarded under [`PartialBatchPolicy::Drop`].
    TailDropped { frames: usize },
    Finished { frames_written: u64 },
}

/// Result of a single batch passed through [`Pipeline::process_batch`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub state: GameState,
    pub frames: usize,
    pub first_frame: FrameIndex,
    pub last_frame: FrameIndex,
    pub times: BatchTimes,
    pub shape_violations: usize,
    pub frame_meta: Vec<FrameMeta>,
}

impl BatchOutcome {
    fn empty() -> Self {
        Self {
            state: GameState::Unknown,
            frames: 0,
            first_frame: 0,
            last_frame: 0,
            times: BatchTimes::default(),
            shape_violations: 0,
            frame_meta: Vec::new(),
        }
    }
}

/// Totals of a completed run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub frames_read: u64,
    pub frames_written: u64,
    pub batches: usize,
    /// Frames read but never written because of [`PartialBatchPolicy::Drop`].
    pub dropped_tail: usize,
    pub shape_violations: usize,
    pub times: AggregatedTimes,
    /// Empty unless [`PipelineConfig::record_frame_meta`] is set.
    pub frame_meta: Vec<FrameMeta>,
}

/// Drives frames from a [`FrameSource`] to a [`FrameSink`] in fixed-size
/// batches, one [`GameState`] per batch.
pub struct Pipeline<C, D, P> {
    config: PipelineConfig,
    classifier: C,
    detector: D,
    composer: AnnotationComposer<P>,
    progress: Option<Sender<ProgressEvent>>,
}

impl<C, D, P> Pipeline<C, D, P>
where
    C: StateClassifier,
    D: ObjectDetector,
    P: Painter,
{
    pub fn new(
        config: PipelineConfig,
        classifier: C,
        detector: D,
        composer: AnnotationComposer<P>,
    ) -> Self {
        Self {
            config,
            classifier,
            detector,
            composer,
            progress: None,
        }
    }

    /// Also publish progress on `tx`. A dropped receiver is ignored.
    pub fn with_progress(mut self, tx: Sender<ProgressEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Processes `source` to exhaustion, writing every flushed frame to `sink`.
    ///
    /// Stops at the first fatal error. The sink is finalized only on success;
    /// either way the caller still owns both handles and releases them on drop.
    pub fn run<S, K>(&mut self, source: &mut S, sink: &mut K) -> Result<RunSummary, PipelineError>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let mut summary = RunSummary::default();
        let mut last_written = None;
        match self.drive(source, sink, &mut summary, &mut last_written) {
            Ok(()) => {
                log::info!(
                    "Finished: {} frames read, {} written in {} batches",
                    summary.frames_read,
                    summary.frames_written,
                    summary.batches
                );
                self.report(ProgressEvent::Finished {
                    frames_written: summary.frames_written,
                });
                Ok(summary)
            }
            Err(err) => {
                log::error!(
                    "Run on {} aborted, last written frame: {last_written:?}: {err}",
                    source.describe()
                );
                Err(err)
            }
        }
    }

    fn drive<S, K>(
        &mut self,
        source: &mut S,
        sink: &mut K,
        summary: &mut RunSummary,
        last_written: &mut Option<FrameIndex>,
    ) -> Result<(), PipelineError>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let total_frames = source.info().total_frames;
        let mut buffer = BatchBuffer::new(self.config.buffer_capacity);
        let mut expected: FrameIndex = 0;
        let mut at_end = false;
        let mut step = Step::Reading;

        log::info!(
            "Annotating {} ({} frames expected, batches of {})",
            source.describe(),
            total_frames,
            buffer.capacity()
        );

        loop {
            step = match step {
                Step::Reading => match source.next_frame()? {
                    Some(frame) => {
                        if frame.index != expected {
                            return Err(PipelineError::OutOfOrderFrame {
                                expected,
                                found: frame.index,
                            });
                        }
                        expected += 1;
                        summary.frames_read += 1;
                        buffer.append(frame)?;
                        if buffer.is_full() {
                            Step::BatchReady
                        } else {
                            Step::Reading
                        }
                    }
                    None => {
                        at_end = true;
                        if summary.frames_read == 0 {
                            return Err(PipelineError::SourceUnavailable {
                                input: source.describe(),
                                reason: "stream contains no frames".to_string(),
                            });
                        }
                        self.end_of_stream(&mut buffer, summary)
                    }
                },
                Step::BatchReady => {
                    let batch = buffer.drain();
                    if batch.is_empty() {
                        Step::Reading
                    } else {
                        Step::Classifying(batch)
                    }
                }
                Step::Classifying(batch) => {
                    let (state, times) = self.classify_batch(&batch)?;
                    Step::ProcessingFrame {
                        batch,
                        state,
                        times,
                    }
                }
                Step::ProcessingFrame {
                    batch,
                    state,
                    times,
                } => {
                    let outcome =
                        self.process_frames(batch, state, times, total_frames, |annotated| {
                            sink.write(&annotated)
                                .map_err(|source| PipelineError::SinkWrite {
                                    frame_index: annotated.index,
                                    source,
                                })?;
                            *last_written = Some(annotated.index);
                            summary.frames_written += 1;
                            Ok(())
                        })?;
                    Step::Flushed(outcome)
                }
                Step::Flushed(outcome) => {
                    summary.batches += 1;
                    summary.shape_violations += outcome.shape_violations;
                    summary.times.push(outcome.times);
                    let progress = BatchProgress {
                        batch: summary.batches,
                        first_frame: outcome.first_frame,
                        last_frame: outcome.last_frame,
                        state: outcome.state,
                        frames_read: summary.frames_read,
                        frames_written: summary.frames_written,
                        total_frames,
                        times: outcome.times,
                        partial: outcome.frames < buffer.capacity(),
                    };
                    log::info!(
                        "Batch {} [{}] frames {}-{}: {}/{} written, took {:?}",
                        progress.batch,
                        progress.state,
                        progress.first_frame,
                        progress.last_frame,
                        progress.frames_written,
                        total_frames,
                        progress.times.total()
                    );
                    self.report(ProgressEvent::BatchFlushed(progress));
                    if self.config.record_frame_meta {
                        summary.frame_meta.extend(outcome.frame_meta);
                    }
                    if at_end {
                        Step::Done
                    } else {
                        Step::Reading
                    }
                }
                Step::Done => break,
            };
            log::trace!("-> {:?}", step.state());
        }

        sink.finish().map_err(PipelineError::SinkFinish)?;
        Ok(())
    }

    fn end_of_stream(&self, buffer: &mut BatchBuffer, summary: &mut RunSummary) -> Step {
        if buffer.is_empty() {
            return Step::Done;
        }
        match self.config.partial_batch {
            PartialBatchPolicy::Flush => {
                log::debug!("Flushing final partial batch of {} frames", buffer.len());
                Step::BatchReady
            }
            PartialBatchPolicy::Drop => {
                let dropped = buffer.drain().len();
                log::warn!("Dropping {dropped} trailing frames that do not fill a batch");
                summary.dropped_tail = dropped;
                self.report(ProgressEvent::TailDropped { frames: dropped });
                Step::Done
            }
        }
    }

    /// Classifies `batch` once, then detects (unless the state is
    /// [`GameState::NoPlay`]), annotates and hands each frame to `emit`, in
    /// order.
    pub fn process_batch<F>(
        &mut self,
        batch: Vec<Frame>,
        total_frames: u64,
        emit: F,
    ) -> Result<BatchOutcome, PipelineError>
    where
        F: FnMut(AnnotatedFrame) -> Result<(), PipelineError>,
    {
        if batch.is_empty() {
            return Ok(BatchOutcome::empty());
        }
        let (state, times) = self.classify_batch(&batch)?;
        self.process_frames(batch, state, times, total_frames, emit)
    }

    fn classify_batch(&mut self, batch: &[Frame]) -> Result<(GameState, BatchTimes), PipelineError> {
        let first_frame = batch.first().map_or(0, |f| f.index);
        let start = Instant::now();
        let state = self
            .classifier
            .classify(batch)
            .map_err(|source| PipelineError::Classifier {
                first_frame,
                source,
            })?;
        let times = BatchTimes {
            classify: start.elapsed(),
            ..Default::default()
        };
        log::debug!(
            "Frames {first_frame}-{} classified as {state}",
            batch.last().map_or(0, |f| f.index)
        );
        Ok((state, times))
    }

    fn process_frames<F>(
        &mut self,
        batch: Vec<Frame>,
        state: GameState,
        mut times: BatchTimes,
        total_frames: u64,
        mut emit: F,
    ) -> Result<BatchOutcome, PipelineError>
    where
        F: FnMut(AnnotatedFrame) -> Result<(), PipelineError>,
    {
        let (Some(first_frame), Some(last_frame)) =
            (batch.first().map(|f| f.index), batch.last().map(|f| f.index))
        else {
            return Ok(BatchOutcome::empty());
        };
        let frames = batch.len();
        let mut shape_violations = 0;
        let mut frame_meta = Vec::new();
        for frame in batch {
            let index = frame.index;

            let detections = if state.shows_detections() {
                let start = Instant::now();
                let found = FrameDetections::collect(&mut self.detector, &frame).map_err(
                    |source| PipelineError::Detector {
                        frame_index: index,
                        source,
                    },
                )?;
                times.detect += start.elapsed();
                found
            } else {
                FrameDetections::default()
            };
            shape_violations += detections.violations();
            let drawn = detections.in_draw_order();

            let start = Instant::now();
            let annotated = self.composer.annotate(frame, state, total_frames, &drawn);
            times.annotate += start.elapsed();

            let start = Instant::now();
            emit(annotated)?;
            times.write += start.elapsed();

            if self.config.record_frame_meta {
                frame_meta.push(FrameMeta {
                    index,
                    state,
                    detections: drawn,
                    dropped_detections: detections.violations(),
                });
            }
        }

        Ok(BatchOutcome {
            state,
            frames,
            first_frame,
            last_frame,
            times,
            shape_violations,
            frame_meta,
        })
    }

    fn report(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress {
            // nobody listening is fine
            let _ = tx.send(event);
        }
    }
}
