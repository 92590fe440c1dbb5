use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

use crate::shared::frame::Frame;
use crate::shared::sequence_metadata::SequenceMetadata;
use crate::video::domain::frame_sink::FrameSink;

/// Wraps a frame's bytes in an `image` buffer of the matching colour type.
///
/// Returns `None` for channel counts other than 1, 3 or 4.
pub fn to_image(frame: &Frame) -> Option<DynamicImage> {
    let (w, h) = (frame.width(), frame.height());
    let data = frame.data().to_vec();
    match frame.channels() {
        1 => GrayImage::from_raw(w, h, data).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(w, h, data).map(DynamicImage::ImageRgb8),
        4 => RgbaImage::from_raw(w, h, data).map(DynamicImage::ImageRgba8),
        _ => None,
    }
}

/// Writes each frame to `<dir>/frame_<index>.<extension>`, index zero-padded
/// to six digits. The format follows the extension.
pub struct ImageSequenceWriter {
    extension: String,
    dir: Option<PathBuf>,
    written: usize,
}

impl ImageSequenceWriter {
    pub fn new(extension: &str) -> Self {
        Self {
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
            dir: None,
            written: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    fn frame_path(dir: &Path, index: usize, extension: &str) -> PathBuf {
        dir.join(format!("frame_{index:06}.{extension}"))
    }
}

impl Default for ImageSequenceWriter {
    fn default() -> Self {
        Self::new("png")
    }
}

impl FrameSink for ImageSequenceWriter {
    fn open(
        &mut self,
        path: &Path,
        metadata: &SequenceMetadata,
    ) -> Result<(), Box<dyn std::error::Error>> {
        std::fs::create_dir_all(path)?;
        log::debug!(
            "Writing {} frames ({}x{}) to {}",
            metadata.total_frames,
            metadata.width,
            metadata.height,
            path.display()
        );
        self.dir = Some(path.to_path_buf());
        self.written = 0;
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        let dir = self.dir.as_ref().ok_or("ImageSequenceWriter: not opened")?;
        let image = to_image(frame).ok_or_else(|| {
            format!(
                "frame {}: unsupported channel count {}",
                frame.index(),
                frame.channels()
            )
        })?;
        // JPEG has no alpha channel.
        let image = if matches!(self.extension.as_str(), "jpg" | "jpeg") {
            DynamicImage::ImageRgb8(image.into_rgb8())
        } else {
            image
        };
        image.save(Self::frame_path(dir, frame.index(), &self.extension))?;
        self.written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(dir) = self.dir.take() {
            log::debug!("Wrote {} frames to {}", self.written, dir.display());
        }
        Ok(())
    }
}
