use crate::error::PipelineError;
use crate::frame::{Frame, VideoInfo};

/// Sequential frame reader. Indices start at 0 and grow by one per frame.
pub trait FrameSource {
    /// Stream properties, known once the source is open.
    fn info(&self) -> &VideoInfo;

    /// Human readable name of the input, used in error reports.
    fn describe(&self) -> String;

    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn info(&self) -> &VideoInfo {
        (**self).info()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        (**self).next_frame()
    }
}
