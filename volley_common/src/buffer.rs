//! Bounded, insertion-ordered frame accumulator.

use std::num::NonZeroUsize;

use thiserror::Error;

use crate::frame::{Frame, FrameIndex};

/// Returned by [`BatchBuffer::append`] when the buffer already holds
/// `capacity` frames. Callers are expected to check [`BatchBuffer::is_full`]
/// first, so seeing this means the caller has a bug.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("batch buffer is full ({capacity} frames), cannot append frame {rejected}")]
pub struct BufferFull {
    pub capacity: usize,
    pub rejected: FrameIndex,
}

/// Accumulates frames until `capacity` is reached, then hands them out in
/// insertion order with [`BatchBuffer::drain`].
#[derive(Debug)]
pub struct BatchBuffer {
    frames: Vec<Frame>,
    capacity: NonZeroUsize,
}

impl BatchBuffer {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity.get()),
            capacity,
        }
    }

    pub fn append(&mut self, frame: Frame) -> Result<(), BufferFull> {
        if self.is_full() {
            return Err(BufferFull {
                capacity: self.capacity.get(),
                rejected: frame.index,
            });
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() == self.capacity.get()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Index of the oldest buffered frame.
    pub fn first_index(&self) -> Option<FrameIndex> {
        self.frames.first().map(|f| f.index)
    }

    /// Takes every buffered frame, oldest first, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<Frame> {
        let drained = std::mem::replace(
            &mut self.frames,
            Vec::with_capacity(self.capacity.get()),
        );
        debug_assert!(drained.len() <= self.capacity.get());
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn frame(index: FrameIndex) -> Frame {
        Frame::new(index, RgbImage::new(2, 2))
    }

    fn buffer(capacity: usize) -> BatchBuffer {
        BatchBuffer::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn test_fills_up_to_capacity() {
        let mut buf = buffer(3);
        assert!(buf.is_empty());
        assert!(!buf.is_full());

        buf.append(frame(0)).unwrap();
        buf.append(frame(1)).unwrap();
        assert_eq!(buf.len(), 2);
        assert!(!buf.is_full());

        buf.append(frame(2)).unwrap();
        assert!(buf.is_full());
        assert!(!buf.is_empty());
    }

    #[test]
    fn test_append_when_full_is_rejected() {
        let mut buf = buffer(1);
        buf.append(frame(7)).unwrap();

        let err = buf.append(frame(8)).unwrap_err();
        assert_eq!(
            err,
            BufferFull {
                capacity: 1,
                rejected: 8
            }
        );
        // rejected frame must not sneak in
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.first_index(), Some(7));
    }

    #[test]
    fn test_drain_preserves_insertion_order() {
        let mut buf = buffer(4);
        for idx in [10, 11, 12, 13] {
            buf.append(frame(idx)).unwrap();
        }

        let drained: Vec<_> = buf.drain().into_iter().map(|f| f.index).collect();
        assert_eq!(drained, vec![10, 11, 12, 13]);
        assert!(buf.is_empty());
        assert_eq!(buf.first_index(), None);
    }

    #[test]
    fn test_drain_partial_and_empty() {
        let mut buf = buffer(30);
        assert!(buf.drain().is_empty());

        buf.append(frame(0)).unwrap();
        buf.append(frame(1)).unwrap();
        assert_eq!(buf.drain().len(), 2);

        // reusable after a drain
        buf.append(frame(2)).unwrap();
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.capacity(), 30);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let mut buf = buffer(2);
        buf.append(frame(5)).unwrap();
        buf.append(frame(5)).unwrap();
        assert_eq!(buf.drain().len(), 2);
    }
}
