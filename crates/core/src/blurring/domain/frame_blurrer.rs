use crate::shared::frame::Frame;
use crate::shared::polygon::Polygon;

/// Domain interface for burning blurred pixels into polygonal regions of a frame.
///
/// Implementations modify the frame in-place (`&mut Frame`) to avoid allocation.
/// Polygons are applied in order, so overlapping polygons blur over the
/// result of earlier ones.
pub trait FrameBlurrer: Send {
    fn blur(&self, frame: &mut Frame, polygons: &[Polygon])
        -> Result<(), Box<dyn std::error::Error>>;
}
