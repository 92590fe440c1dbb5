/// Frames between two detected keyframes.
pub const DEFAULT_SAMPLE_INTERVAL: usize = 10;

/// Divisor applied to a polygon's bounding box to size its blur kernel.
pub const DEFAULT_BLUR_STRENGTH: u32 = 3;
pub const MIN_BLUR_STRENGTH: u32 = 1;
pub const MAX_BLUR_STRENGTH: u32 = 10;

/// Side of the square Lucas-Kanade search window, in pixels.
pub const DEFAULT_FLOW_WINDOW: usize = 31;
pub const DEFAULT_PYRAMID_LEVELS: usize = 10;
pub const DEFAULT_FLOW_ITERATIONS: usize = 10;
/// Stop refining a point once its per-iteration correction drops below this (px).
pub const DEFAULT_FLOW_EPSILON: f64 = 0.03;
/// Per-pixel minimum eigenvalue of the structure tensor below which a
/// window is considered untextured.
pub const DEFAULT_MIN_EIGENVALUE: f64 = 1e-2;

/// Displacements below this (px) on every vertex mean "not moving".
pub const STATIONARY_DISPLACEMENT: f64 = 2.0;
/// Net motion below this (px) is not trusted.
pub const MIN_MEAN_DISPLACEMENT: f64 = 0.5;
/// A vertex must move at least this fraction of its own length along the mean direction.
pub const DIRECTION_AGREEMENT: f64 = 0.5;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];
