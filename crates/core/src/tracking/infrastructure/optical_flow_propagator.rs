use crate::shared::engine_config::FlowParams;
use crate::shared::gray_frame::GrayFrame;
use crate::shared::polygon::Polygon;
use crate::tracking::domain::motion_consistency;
use crate::tracking::domain::polygon_propagator::{PolygonPropagator, Propagation};

use super::lucas_kanade::LucasKanadeTracker;

/// Moves polygons by tracking every vertex with pyramidal Lucas-Kanade and
/// rejecting tracks whose vertices disagree on the motion.
///
/// A polygon with any lost vertex is reported at its source position and
/// flagged as not kept.
pub struct OpticalFlowPropagator {
    tracker: LucasKanadeTracker,
}

impl OpticalFlowPropagator {
    pub fn new(flow: &FlowParams) -> Self {
        Self {
            tracker: LucasKanadeTracker::new(flow),
        }
    }

    fn track_polygon(
        &self,
        source: &GrayFrame,
        target: &GrayFrame,
        polygon: &Polygon,
    ) -> (Polygon, bool) {
        let tracked: Option<Vec<_>> = polygon
            .points()
            .iter()
            .map(|&p| self.tracker.track(source, target, p))
            .collect();
        let Some(points) = tracked else {
            log::debug!(
                "Frame {} -> {}: lost a vertex, dropping polygon",
                source.index(),
                target.index()
            );
            return (polygon.clone(), false);
        };
        let Ok(moved) = Polygon::new(points) else {
            return (polygon.clone(), false);
        };

        let verdict = motion_consistency::classify(&motion_consistency::displacements(
            polygon, &moved,
        ));
        if !verdict.is_accepted() {
            log::debug!(
                "Frame {} -> {}: rejecting polygon ({verdict:?})",
                source.index(),
                target.index()
            );
        }
        (moved, verdict.is_accepted())
    }
}

impl PolygonPropagator for OpticalFlowPropagator {
    fn propagate(
        &self,
        source: &GrayFrame,
        target: &GrayFrame,
        polygons: &[Polygon],
    ) -> Propagation {
        let mut propagation = Propagation {
            polygons: Vec::with_capacity(polygons.len()),
            kept: Vec::with_capacity(polygons.len()),
        };
        for polygon in polygons {
            let (moved, kept) = self.track_polygon(source, target, polygon);
            propagation.polygons.push(moved);
            propagation.kept.push(kept);
        }
        propagation
    }
}
