use std::path::PathBuf;

/// Geometry and length of a frame sequence, known once its source is opened.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceMetadata {
    pub width: u32,
    pub height: u32,
    pub total_frames: usize,
    pub source_path: Option<PathBuf>,
}
