pub mod http_region_detector;
pub mod json_region_detector;
