use crate::shared::gray_frame::GrayFrame;
use crate::shared::polygon::Polygon;
use crate::tracking::domain::polygon_propagator::PolygonPropagator;

/// A frame whose polygons are known, used to seed propagation into a gap.
#[derive(Clone, Copy)]
pub struct Anchor<'a> {
    pub gray: &'a GrayFrame,
    pub polygons: &'a [Polygon],
}

/// Per-skipframe polygon tracks for one gap, in temporal order.
///
/// `forward[i]` holds the polygons chained from the earlier anchor,
/// `backward[i]` those chained from the later anchor. A missing anchor
/// leaves its direction empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GapTracks {
    pub forward: Vec<Vec<Polygon>>,
    pub backward: Vec<Vec<Polygon>>,
    pub rejected: Vec<usize>,
}

impl GapTracks {
    /// Union of both directions for frame `i`: forward polygons first.
    pub fn merged(&self, i: usize) -> Vec<Polygon> {
        let mut polygons = self.forward.get(i).cloned().unwrap_or_default();
        if let Some(backward) = self.backward.get(i) {
            polygons.extend(backward.iter().cloned());
        }
        polygons
    }

    pub fn total_rejected(&self) -> usize {
        self.rejected.iter().sum()
    }
}

/// Propagates anchor polygons through `frames` (temporal order) from both sides.
///
/// Each direction chains frame to frame: a polygon rejected on one frame is
/// not tracked any further in that direction.
pub fn track_gap(
    propagator: &dyn PolygonPropagator,
    frames: &[&GrayFrame],
    previous: Option<Anchor<'_>>,
    next: Option<Anchor<'_>>,
) -> GapTracks {
    let mut tracks = GapTracks {
        forward: vec![Vec::new(); frames.len()],
        backward: vec![Vec::new(); frames.len()],
        rejected: vec![0; frames.len()],
    };

    if let Some(anchor) = previous {
        let mut source = anchor.gray;
        let mut polygons = anchor.polygons.to_vec();
        for (i, &target) in frames.iter().enumerate() {
            if polygons.is_empty() {
                break;
            }
            let propagation = propagator.propagate(source, target, &polygons);
            tracks.rejected[i] += propagation.rejected_count();
            polygons = propagation.into_accepted();
            tracks.forward[i] = polygons.clone();
            source = target;
        }
    }

    if let Some(anchor) = next {
        let mut source = anchor.gray;
        let mut polygons = anchor.polygons.to_vec();
        for (i, &target) in frames.iter().enumerate().rev() {
            if polygons.is_empty() {
                break;
            }
            let propagation = propagator.propagate(source, target, &polygons);
            tracks.rejected[i] += propagation.rejected_count();
            polygons = propagation.into_accepted();
            tracks.backward[i] = polygons.clone();
            source = target;
        }
    }

    tracks
}
