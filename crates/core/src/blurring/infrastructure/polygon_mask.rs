use crate::shared::polygon::Polygon;

use super::gaussian::RoiRect;

/// Subsamples per pixel along each axis.
const SUPERSAMPLE: usize = 4;

/// Pixel-aligned bounding box of `polygon` clipped to a `width`×`height`
/// frame, or `None` when the clipped box is empty.
pub fn clipped_bounds(polygon: &Polygon, width: usize, height: usize) -> Option<RoiRect> {
    let (min_x, min_y, max_x, max_y) = polygon.bounds();
    let clip = |v: f64, limit: usize| v.clamp(0.0, limit as f64) as usize;
    let x0 = clip(min_x.floor(), width);
    let y0 = clip(min_y.floor(), height);
    let x1 = clip(max_x.ceil(), width);
    let y1 = clip(max_y.ceil(), height);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(RoiRect {
        x: x0,
        y: y0,
        w: x1 - x0,
        h: y1 - y0,
    })
}

/// Rasterizes `polygon` into an anti-aliased coverage mask over `rect`.
///
/// Pixel `(x, y)` spans `[x, x + 1) × [y, y + 1)`. Coverage is estimated on a
/// 4×4 grid of subsample centres with the even-odd rule and scaled to 0..=255,
/// so fully covered pixels are exactly 255 and untouched ones exactly 0.
pub fn rasterize(polygon: &Polygon, rect: RoiRect, mask: &mut Vec<u8>) {
    let mut coverage = vec![0u16; rect.w];
    let mut crossings = Vec::new();
    mask.clear();
    mask.reserve(rect.w * rect.h);

    let step = 1.0 / SUPERSAMPLE as f64;
    let points = polygon.points();
    for row in 0..rect.h {
        coverage.iter_mut().for_each(|c| *c = 0);
        for sub_row in 0..SUPERSAMPLE {
            let sy = (rect.y + row) as f64 + (sub_row as f64 + 0.5) * step;

            crossings.clear();
            for (i, a) in points.iter().enumerate() {
                let b = &points[(i + 1) % points.len()];
                // Half-open rule so a vertex on the scanline counts once.
                if (a.y <= sy) != (b.y <= sy) {
                    crossings.push(a.x + (sy - a.y) * (b.x - a.x) / (b.y - a.y));
                }
            }
            crossings.sort_by(f64::total_cmp);

            for span in crossings.chunks_exact(2) {
                // Subsample column j (relative to rect.x) has its centre at
                // rect.x + (j + 0.5) * step; take those with centre in [span[0], span[1]).
                let to_column = |x: f64| ((x - rect.x as f64) / step - 0.5).ceil();
                let total = (rect.w * SUPERSAMPLE) as f64;
                let first = to_column(span[0]).clamp(0.0, total) as usize;
                let last = to_column(span[1]).clamp(0.0, total) as usize;
                for column in first..last {
                    coverage[column / SUPERSAMPLE] += 1;
                }
            }
        }
        let full = (SUPERSAMPLE * SUPERSAMPLE) as u32;
        mask.extend(
            coverage
                .iter()
                .map(|&c| ((c as u32 * 255 + full / 2) / full) as u8),
        );
    }
}
