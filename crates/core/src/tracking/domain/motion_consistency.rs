use crate::shared::constants::{
    DIRECTION_AGREEMENT, MIN_MEAN_DISPLACEMENT, STATIONARY_DISPLACEMENT,
};
use crate::shared::polygon::Polygon;

/// Verdict on a tracked polygon's vertex displacements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionVerdict {
    /// Every vertex moved less than the stationary threshold.
    Stationary,
    /// Vertices agree on a common direction.
    Coherent,
    /// Net motion too small to trust, but vertices are not stationary.
    NoNetMotion,
    /// At least one vertex moves against the group.
    Divergent,
}

impl MotionVerdict {
    pub fn is_accepted(self) -> bool {
        matches!(self, MotionVerdict::Stationary | MotionVerdict::Coherent)
    }
}

/// Decides whether the per-vertex displacements of one polygon describe a
/// single rigid-ish motion.
///
/// Objects moving straight towards or away from the camera have small,
/// radially opposed displacements and can be rejected here; the thresholds
/// are kept as they are until that trade-off is revisited.
pub fn classify(displacements: &[(f64, f64)]) -> MotionVerdict {
    let magnitude = |(dx, dy): (f64, f64)| dx.hypot(dy);

    let max_magnitude = displacements
        .iter()
        .copied()
        .map(magnitude)
        .fold(0.0, f64::max);
    if max_magnitude < STATIONARY_DISPLACEMENT {
        return MotionVerdict::Stationary;
    }

    let n = displacements.len() as f64;
    let (sx, sy) = displacements
        .iter()
        .fold((0.0, 0.0), |(sx, sy), (dx, dy)| (sx + dx, sy + dy));
    let mean = (sx / n, sy / n);
    let mean_magnitude = magnitude(mean);
    if mean_magnitude < MIN_MEAN_DISPLACEMENT {
        return MotionVerdict::NoNetMotion;
    }

    let direction = (mean.0 / mean_magnitude, mean.1 / mean_magnitude);
    let divergent = displacements.iter().any(|&d| {
        let along = d.0 * direction.0 + d.1 * direction.1;
        along < DIRECTION_AGREEMENT * magnitude(d)
    });
    if divergent {
        MotionVerdict::Divergent
    } else {
        MotionVerdict::Coherent
    }
}

/// Per-vertex displacement from `source` to `tracked` (same vertex count).
pub fn displacements(source: &Polygon, tracked: &Polygon) -> Vec<(f64, f64)> {
    source
        .points()
        .iter()
        .zip(tracked.points())
        .map(|(s, t)| (t.x - s.x, t.y - s.y))
        .collect()
}
