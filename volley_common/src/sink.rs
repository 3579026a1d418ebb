use crate::frame::AnnotatedFrame;

/// Output container for annotated frames. Frames are appended in call order.
///
/// Implementations must release their handle when dropped, whether or not
/// [`FrameSink::finish`] was called.
pub trait FrameSink {
    fn write(&mut self, frame: &AnnotatedFrame) -> anyhow::Result<()>;

    /// Flushes pending data and finalizes the container.
    fn finish(&mut self) -> anyhow::Result<()>;
}

impl<T: FrameSink + ?Sized> FrameSink for Box<T> {
    fn write(&mut self, frame: &AnnotatedFrame) -> anyhow::Result<()> {
        (**self).write(frame)
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        (**self).finish()
    }
}
