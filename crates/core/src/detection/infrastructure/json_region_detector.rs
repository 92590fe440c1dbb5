use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::detection::domain::region_detector::RegionDetector;
use crate::shared::frame::Frame;
use crate::shared::polygon::{Polygon, PolygonError};

#[derive(Error, Debug)]
pub enum PolygonFileError {
    #[error("failed to read polygon file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse polygon file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid polygon for frame {frame}: {source}")]
    InvalidPolygon {
        frame: usize,
        #[source]
        source: PolygonError,
    },
}

#[derive(Deserialize)]
struct FrameEntry {
    frame: usize,
    #[serde(default)]
    polygons: Vec<Vec<[f64; 2]>>,
}

/// Replays polygons detected ahead of time, keyed by frame index.
///
/// The file is a JSON array of `{"frame": n, "polygons": [[[x, y], ...], ...]}`
/// entries. Frames without an entry have no plates. Entries for the same
/// frame are merged.
pub struct JsonRegionDetector {
    polygons: HashMap<usize, Vec<Polygon>>,
}

impl JsonRegionDetector {
    pub fn from_file(path: &Path) -> Result<Self, PolygonFileError> {
        let json = fs::read_to_string(path).map_err(|source| PolygonFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let entries: Vec<FrameEntry> =
            serde_json::from_str(&json).map_err(|source| PolygonFileError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_entries(entries)
    }

    fn from_entries(entries: Vec<FrameEntry>) -> Result<Self, PolygonFileError> {
        let mut polygons: HashMap<usize, Vec<Polygon>> = HashMap::new();
        for entry in entries {
            let frame = entry.frame;
            let parsed = entry
                .polygons
                .into_iter()
                .map(Polygon::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|source| PolygonFileError::InvalidPolygon { frame, source })?;
            polygons.entry(frame).or_default().extend(parsed);
        }
        log::debug!("Loaded precomputed polygons for {} frames", polygons.len());
        Ok(Self { polygons })
    }

    pub fn frame_count(&self) -> usize {
        self.polygons.len()
    }
}

impl RegionDetector for JsonRegionDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Polygon>, Box<dyn std::error::Error>> {
        Ok(self.polygons.get(&frame.index()).cloned().unwrap_or_default())
    }
}
