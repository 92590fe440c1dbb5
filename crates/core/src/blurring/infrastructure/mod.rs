pub mod cpu_polygon_blurrer;
mod gaussian;
pub mod polygon_mask;
