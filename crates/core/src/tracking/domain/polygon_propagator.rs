use crate::shared::gray_frame::GrayFrame;
use crate::shared::polygon::Polygon;

/// Outcome of moving a set of polygons from one frame to another.
///
/// `polygons[i]` is the tracked position of input polygon `i` and `kept[i]`
/// says whether that track is trustworthy. Untrusted tracks are still
/// reported so callers can log them, but must not be drawn.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Propagation {
    pub polygons: Vec<Polygon>,
    pub kept: Vec<bool>,
}

impl Propagation {
    pub fn rejected_count(&self) -> usize {
        self.kept.iter().filter(|&&k| !k).count()
    }

    /// The trusted polygons, in input order.
    pub fn into_accepted(self) -> Vec<Polygon> {
        self.polygons
            .into_iter()
            .zip(self.kept)
            .filter_map(|(p, kept)| kept.then_some(p))
            .collect()
    }
}

/// Estimates where polygons outlined in `source` sit in `target`.
pub trait PolygonPropagator: Send {
    fn propagate(&self, source: &GrayFrame, target: &GrayFrame, polygons: &[Polygon])
        -> Propagation;
}
