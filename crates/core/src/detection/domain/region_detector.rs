use crate::shared::frame::Frame;
use crate::shared::polygon::Polygon;

/// Domain interface for the plate detector consulted on keyframes.
///
/// Calls may be slow (a network round-trip) and are made synchronously by
/// the producer. Retrying is up to the implementation.
pub trait RegionDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Polygon>, Box<dyn std::error::Error>>;
}
