use crate::shared::engine_config::FlowParams;
use crate::shared::gray_frame::GrayFrame;
use crate::shared::polygon::Point;

struct WindowSample {
    dx: f64,
    dy: f64,
    value: f64,
    ix: f64,
    iy: f64,
}

/// Sparse pyramidal Lucas-Kanade point tracker.
///
/// Each point is solved coarse to fine: the flow found at one pyramid level,
/// doubled, seeds the next finer level. Windows whose structure tensor is too
/// flat to solve keep the seed from the coarser level unchanged.
pub struct LucasKanadeTracker {
    half_window: usize,
    max_iterations: usize,
    epsilon: f64,
    min_eigenvalue: f64,
}

impl LucasKanadeTracker {
    pub fn new(flow: &FlowParams) -> Self {
        Self {
            half_window: flow.half_window(),
            max_iterations: flow.max_iterations.max(1),
            epsilon: flow.epsilon,
            min_eigenvalue: flow.min_eigenvalue,
        }
    }

    /// Position of `point` (frame coordinates) in `target`, or `None` when the
    /// solve diverged or left the padded image.
    pub fn track(&self, source: &GrayFrame, target: &GrayFrame, point: Point) -> Option<Point> {
        if source.is_empty() || target.is_empty() {
            return None;
        }
        let levels = source.level_count().min(target.level_count());
        let pad = source.padding() as f64;
        let origin = (point.x + pad, point.y + pad);

        let side = 2 * self.half_window + 1;
        let mut window = Vec::with_capacity(side * side);
        let mut guess = (0.0, 0.0);
        for level in (0..levels).rev() {
            let scale = (1u32 << level) as f64;
            let center = (origin.0 / scale, origin.1 / scale);
            let (vx, vy) = self.refine(source, target, level, center, guess, &mut window);
            let flow = (guess.0 + vx, guess.1 + vy);
            guess = if level > 0 {
                (2.0 * flow.0, 2.0 * flow.1)
            } else {
                flow
            };
            if !guess.0.is_finite() || !guess.1.is_finite() {
                return None;
            }
        }

        let (tx, ty) = (origin.0 + guess.0, origin.1 + guess.1);
        let (h, w) = target.level(0).dim();
        if tx < 0.0 || ty < 0.0 || tx > (w - 1) as f64 || ty > (h - 1) as f64 {
            return None;
        }
        Some(Point::new(tx - pad, ty - pad))
    }

    /// Iterative refinement at one level; returns the residual flow on top of `guess`.
    fn refine(
        &self,
        source: &GrayFrame,
        target: &GrayFrame,
        level: usize,
        center: (f64, f64),
        guess: (f64, f64),
        window: &mut Vec<WindowSample>,
    ) -> (f64, f64) {
        window.clear();
        let hw = self.half_window as isize;
        let (mut gxx, mut gxy, mut gyy) = (0.0, 0.0, 0.0);
        for dy in -hw..=hw {
            for dx in -hw..=hw {
                let (dx, dy) = (dx as f64, dy as f64);
                let (x, y) = (center.0 + dx, center.1 + dy);
                let ix =
                    0.5 * (source.sample(level, x + 1.0, y) - source.sample(level, x - 1.0, y));
                let iy =
                    0.5 * (source.sample(level, x, y + 1.0) - source.sample(level, x, y - 1.0));
                gxx += ix * ix;
                gxy += ix * iy;
                gyy += iy * iy;
                window.push(WindowSample {
                    dx,
                    dy,
                    value: source.sample(level, x, y),
                    ix,
                    iy,
                });
            }
        }

        let n = window.len() as f64;
        let det = gxx * gyy - gxy * gxy;
        let min_eigenvalue =
            (gxx + gyy - ((gxx - gyy) * (gxx - gyy) + 4.0 * gxy * gxy).sqrt()) / (2.0 * n);
        if min_eigenvalue < self.min_eigenvalue || det <= f64::EPSILON {
            return (0.0, 0.0);
        }

        let mut v = (0.0, 0.0);
        for _ in 0..self.max_iterations {
            let (ox, oy) = (center.0 + guess.0 + v.0, center.1 + guess.1 + v.1);
            let (mut bx, mut by) = (0.0, 0.0);
            for s in window.iter() {
                let diff = s.value - target.sample(level, ox + s.dx, oy + s.dy);
                bx += diff * s.ix;
                by += diff * s.iy;
            }
            let step = ((gyy * bx - gxy * by) / det, (gxx * by - gxy * bx) / det);
            v = (v.0 + step.0, v.1 + step.1);
            if !v.0.is_finite() || !v.1.is_finite() {
                return v;
            }
            if step.0 * step.0 + step.1 * step.1 < self.epsilon * self.epsilon {
                break;
            }
        }
        v
    }
}
