use std::path::Path;

use crate::shared::frame::Frame;
use crate::shared::sequence_metadata::SequenceMetadata;

/// Accepts composited frames in the order they are written.
///
/// The interpolation engine guarantees strictly increasing indices, so a
/// sink never has to reorder.
pub trait FrameSink: Send {
    fn open(
        &mut self,
        path: &Path,
        metadata: &SequenceMetadata,
    ) -> Result<(), Box<dyn std::error::Error>>;

    fn write(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>>;

    /// Writes a frame the caller no longer needs. Sinks that hand frames to
    /// another thread override this to move the pixels instead of copying.
    fn write_owned(&mut self, frame: Frame) -> Result<(), Box<dyn std::error::Error>> {
        self.write(&frame)
    }

    /// Flushes anything still pending. Called once, after the last write.
    fn close(&mut self) -> Result<(), Box<dyn std::error::Error>>;
}
