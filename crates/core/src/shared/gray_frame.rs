use ndarray::Array2;

use super::engine_config::FlowParams;
use super::frame::Frame;

/// 5-tap binomial filter used for pyramid reduction.
const REDUCE_TAPS: [f32; 5] = [0.0625, 0.25, 0.375, 0.25, 0.0625];

/// Single-channel luma version of a [`Frame`], used only for motion tracking.
///
/// Level 0 is the luma plane padded on every side by half the flow search
/// window (edge pixels replicated), so a window centred on any in-frame point
/// reads valid data. Coarser pyramid levels are built once here and cached
/// for every propagation that touches this frame. Level `l` maps padded
/// level-0 coordinates `(x, y)` to `(x / 2^l, y / 2^l)`.
#[derive(Clone, Debug)]
pub struct GrayFrame {
    levels: Vec<Array2<f32>>,
    padding: usize,
    width: u32,
    height: u32,
    index: usize,
}

impl GrayFrame {
    pub fn from_frame(frame: &Frame, flow: &FlowParams) -> Self {
        let padding = flow.half_window();
        let luma = luma_plane(frame);
        let levels = if luma.is_empty() {
            vec![luma]
        } else {
            build_pyramid(pad_replicate(&luma, padding), flow.max_levels, flow.window_size)
        };
        Self {
            levels,
            padding,
            width: frame.width(),
            height: frame.height(),
            index: frame.index(),
        }
    }

    pub fn level(&self, level: usize) -> &Array2<f32> {
        &self.levels[level]
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    /// Bilinear sample at level `level`; coordinates outside the plane are
    /// clamped to its border.
    pub fn sample(&self, level: usize, x: f64, y: f64) -> f64 {
        let plane = &self.levels[level];
        let (h, w) = plane.dim();
        let x = x.clamp(0.0, (w - 1) as f64);
        let y = y.clamp(0.0, (h - 1) as f64);
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(w - 1);
        let y1 = (y0 + 1).min(h - 1);
        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let at = |row: usize, col: usize| plane[[row, col]] as f64;
        let top = at(y0, x0) * (1.0 - fx) + at(y0, x1) * fx;
        let bottom = at(y1, x0) * (1.0 - fx) + at(y1, x1) * fx;
        top * (1.0 - fy) + bottom * fy
    }
}

/// BT.601 luma for colour frames; single-channel and gray+alpha frames pass through.
fn luma_plane(frame: &Frame) -> Array2<f32> {
    let pixels = frame.as_ndarray();
    let (h, w, channels) = pixels.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        if channels < 3 {
            pixels[[y, x, 0]] as f32
        } else {
            0.299 * pixels[[y, x, 0]] as f32
                + 0.587 * pixels[[y, x, 1]] as f32
                + 0.114 * pixels[[y, x, 2]] as f32
        }
    })
}

fn pad_replicate(src: &Array2<f32>, pad: usize) -> Array2<f32> {
    let (h, w) = src.dim();
    Array2::from_shape_fn((h + 2 * pad, w + 2 * pad), |(y, x)| {
        let sy = y.saturating_sub(pad).min(h - 1);
        let sx = x.saturating_sub(pad).min(w - 1);
        src[[sy, sx]]
    })
}

fn build_pyramid(base: Array2<f32>, max_levels: usize, window: usize) -> Vec<Array2<f32>> {
    let mut levels = vec![base];
    while levels.len() < max_levels {
        let last = &levels[levels.len() - 1];
        let (h, w) = last.dim();
        if (h + 1) / 2 < window || (w + 1) / 2 < window {
            break;
        }
        let next = reduce(last);
        levels.push(next);
    }
    levels
}

/// Blur with [`REDUCE_TAPS`] and keep every second row and column.
fn reduce(src: &Array2<f32>) -> Array2<f32> {
    let (h, w) = src.dim();
    let (nh, nw) = ((h + 1) / 2, (w + 1) / 2);
    let clamp = |v: isize, len: usize| v.clamp(0, len as isize - 1) as usize;

    let horizontal = Array2::from_shape_fn((h, nw), |(y, x)| {
        let cx = 2 * x as isize;
        REDUCE_TAPS
            .iter()
            .enumerate()
            .map(|(k, &t)| src[[y, clamp(cx + k as isize - 2, w)]] * t)
            .sum::<f32>()
    });
    Array2::from_shape_fn((nh, nw), |(y, x)| {
        let cy = 2 * y as isize;
        REDUCE_TAPS
            .iter()
            .enumerate()
            .map(|(k, &t)| horizontal[[clamp(cy + k as isize - 2, h), x]] * t)
            .sum::<f32>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn flow(window_size: usize, max_levels: usize) -> FlowParams {
        FlowParams {
            window_size,
            max_levels,
            ..FlowParams::default()
        }
    }

    #[test]
    fn test_luma_uses_bt601_weights() {
        let frame = Frame::new(vec![255, 0, 0], 1, 1, 3, 0);
        let gray = GrayFrame::from_frame(&frame, &flow(3, 1));
        assert_relative_eq!(gray.level(0)[[1, 1]], 0.299 * 255.0, epsilon = 1e-3);
    }

    #[test]
    fn test_single_channel_passes_through() {
        let frame = Frame::new(vec![10, 20, 30, 40], 2, 2, 1, 3);
        let gray = GrayFrame::from_frame(&frame, &flow(3, 1));
        assert_eq!(gray.padding(), 1);
        assert_eq!(gray.index(), 3);
        assert_relative_eq!(gray.level(0)[[1, 1]], 10.0);
        assert_relative_eq!(gray.level(0)[[2, 2]], 40.0);
    }

    #[test]
    fn test_padding_replicates_edges() {
        let frame = Frame::new(vec![10, 20, 30, 40], 2, 2, 1, 0);
        let gray = GrayFrame::from_frame(&frame, &flow(5, 1));
        let plane = gray.level(0);
        assert_eq!(plane.dim(), (6, 6));
        // Top-left corner region copies pixel (0,0), bottom-right copies (1,1).
        assert_relative_eq!(plane[[0, 0]], 10.0);
        assert_relative_eq!(plane[[0, 5]], 20.0);
        assert_relative_eq!(plane[[5, 0]], 30.0);
        assert_relative_eq!(plane[[5, 5]], 40.0);
    }

    #[test]
    fn test_pyramid_halves_until_window_no_longer_fits() {
        // 256x200 padded by 15 → 286x230 → 143x115 → 72x58 → 36x29 (too small)
        let frame = Frame::filled(256, 200, 3, 90, 0);
        let gray = GrayFrame::from_frame(&frame, &FlowParams::default());
        assert_eq!(gray.level_count(), 3);
        assert_eq!(gray.level(0).dim(), (230, 286));
        assert_eq!(gray.level(1).dim(), (115, 143));
        assert_eq!(gray.level(2).dim(), (58, 72));
    }

    #[test]
    fn test_pyramid_respects_max_levels() {
        let frame = Frame::filled(512, 512, 1, 0, 0);
        let gray = GrayFrame::from_frame(&frame, &flow(31, 2));
        assert_eq!(gray.level_count(), 2);
    }

    #[test]
    fn test_uniform_frame_stays_uniform_at_every_level() {
        let frame = Frame::filled(128, 128, 1, 128, 0);
        let gray = GrayFrame::from_frame(&frame, &flow(15, 10));
        for level in 0..gray.level_count() {
            assert!(gray
                .level(level)
                .iter()
                .all(|&v| (v - 128.0).abs() < 1e-3));
        }
    }

    #[test]
    fn test_bilinear_sample_interpolates_and_clamps() {
        let frame = Frame::new(vec![0, 100, 0, 100], 2, 2, 1, 0);
        let gray = GrayFrame::from_frame(&frame, &flow(3, 1));
        // padded plane columns: 0 0 100 100
        assert_relative_eq!(gray.sample(0, 1.5, 1.0), 50.0);
        assert_relative_eq!(gray.sample(0, -7.0, 1.0), 0.0);
        assert_relative_eq!(gray.sample(0, 99.0, 99.0), 100.0);
    }

    #[test]
    fn test_reduce_keeps_linear_ramp_away_from_edges() {
        let ramp = Array2::from_shape_fn((1, 8), |(_, x)| x as f32);
        let reduced = reduce(&ramp);
        assert_eq!(reduced.dim(), (1, 4));
        assert_relative_eq!(reduced[[0, 1]], 2.0);
        assert_relative_eq!(reduced[[0, 2]], 4.0);
        // Left edge replicates column 0.
        assert_relative_eq!(reduced[[0, 0]], 0.375);
    }

    #[test]
    fn test_empty_frame_has_one_empty_level() {
        let frame = Frame::new(Vec::new(), 0, 0, 3, 0);
        let gray = GrayFrame::from_frame(&frame, &FlowParams::default());
        assert!(gray.is_empty());
        assert_eq!(gray.level_count(), 1);
    }
}
