use std::path::{Path, PathBuf};

use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::frame::Frame;
use crate::shared::sequence_metadata::SequenceMetadata;
use crate::video::domain::frame_source::FrameSource;

/// Reads a directory of still images as a frame sequence.
///
/// Files with a known image extension are ordered by file name, so
/// zero-padded names (`frame_000001.png`, ...) play back in order. Every
/// image is decoded to RGB and must match the first image's size.
pub struct ImageSequenceReader {
    paths: Vec<PathBuf>,
    size: Option<(u32, u32)>,
}

impl ImageSequenceReader {
    pub fn new() -> Self {
        Self {
            paths: Vec::new(),
            size: None,
        }
    }
}

impl Default for ImageSequenceReader {
    fn default() -> Self {
        Self::new()
    }
}

pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if is_image && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn decode(
    path: &Path,
    index: usize,
    expected: (u32, u32),
) -> Result<Frame, Box<dyn std::error::Error>> {
    let rgb = image::open(path)?.into_rgb8();
    if rgb.dimensions() != expected {
        return Err(format!(
            "{}: size {}x{} differs from sequence size {}x{}",
            path.display(),
            rgb.width(),
            rgb.height(),
            expected.0,
            expected.1
        )
        .into());
    }
    let (width, height) = rgb.dimensions();
    Ok(Frame::new(rgb.into_raw(), width, height, 3, index))
}

impl FrameSource for ImageSequenceReader {
    fn open(&mut self, path: &Path) -> Result<SequenceMetadata, Box<dyn std::error::Error>> {
        let paths = list_images(path)?;
        let first = paths
            .first()
            .ok_or_else(|| format!("No images found in {}", path.display()))?;
        let (width, height) = image::image_dimensions(first)?;

        log::info!(
            "Opened {} frames ({width}x{height}) from {}",
            paths.len(),
            path.display()
        );
        let metadata = SequenceMetadata {
            width,
            height,
            total_frames: paths.len(),
            source_path: Some(path.to_path_buf()),
        };
        self.paths = paths;
        self.size = Some((width, height));
        Ok(metadata)
    }

    fn frames(
        &mut self,
    ) -> Box<dyn Iterator<Item = Result<Frame, Box<dyn std::error::Error>>> + '_> {
        let Some(size) = self.size else {
            return Box::new(std::iter::once(Err(
                "ImageSequenceReader: not opened".into()
            )));
        };
        Box::new(
            self.paths
                .iter()
                .enumerate()
                .map(move |(index, path)| decode(path, index, size)),
        )
    }

    fn close(&mut self) {
        self.paths.clear();
        self.size = None;
    }
}
