use crate::shared::frame::Frame;
use crate::shared::gray_frame::GrayFrame;

use super::engine_error::EngineError;

/// A frame waiting for interpolation, with its luma pyramid computed at ingestion.
#[derive(Clone, Debug)]
pub struct BufferedFrame {
    pub frame: Frame,
    pub gray: GrayFrame,
}

impl BufferedFrame {
    pub fn index(&self) -> usize {
        self.frame.index()
    }
}

/// Fixed-capacity circular store of skipframes.
///
/// Writes and reads move independent cursors modulo `capacity`; entries are
/// moved out when read, so a slot is free again as soon as the consumer has
/// taken it. The capacity never changes, which bounds memory regardless of
/// stream length.
pub struct RingFrameBuffer {
    slots: Vec<Option<BufferedFrame>>,
    write: usize,
    read: usize,
    len: usize,
}

impl RingFrameBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            write: 0,
            read: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores the pair at the write cursor and advances it.
    ///
    /// Fails instead of overwriting when the write cursor would lap an entry
    /// the consumer has not read yet.
    pub fn put(&mut self, frame: Frame, gray: GrayFrame) -> Result<(), EngineError> {
        if self.slots[self.write].is_some() {
            return Err(EngineError::BufferOverrun {
                capacity: self.capacity(),
                index: frame.index(),
            });
        }
        self.slots[self.write] = Some(BufferedFrame { frame, gray });
        self.write = (self.write + 1) % self.capacity();
        self.len += 1;
        Ok(())
    }

    /// Takes the oldest unread entry and advances the read cursor.
    pub fn get_forward(&mut self) -> Option<BufferedFrame> {
        let entry = self.slots[self.read].take()?;
        self.read = (self.read + 1) % self.capacity();
        self.len -= 1;
        Some(entry)
    }

    /// Takes the most recently written entry, stepping the write cursor back
    /// onto the freed slot.
    pub fn get_back(&mut self) -> Option<BufferedFrame> {
        let newest = (self.write + self.capacity() - 1) % self.capacity();
        let entry = self.slots[newest].take()?;
        self.write = newest;
        self.len -= 1;
        Some(entry)
    }

    /// Index of the entry [`get_forward`](Self::get_forward) would return.
    pub fn front_index(&self) -> Option<usize> {
        self.slots[self.read].as_ref().map(BufferedFrame::index)
    }
}
