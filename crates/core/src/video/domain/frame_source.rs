use std::path::Path;

use crate::shared::frame::Frame;
use crate::shared::sequence_metadata::SequenceMetadata;

/// Reads frames from a sequence in strictly increasing index order.
///
/// Implementations handle I/O details (file layout, decoding) while the
/// pipeline works with the abstract `Frame` and `SequenceMetadata` types.
pub trait FrameSource: Send {
    /// Opens the sequence at `path` and returns its metadata.
    fn open(&mut self, path: &Path) -> Result<SequenceMetadata, Box<dyn std::error::Error>>;

    /// Returns an iterator over frames; the n-th item has index n.
    fn frames(
        &mut self,
    ) -> Box<dyn Iterator<Item = Result<Frame, Box<dyn std::error::Error>>> + '_>;

    /// Releases any resources held by the source.
    fn close(&mut self);
}
