use std::cell::RefCell;

use crate::blurring::domain::frame_blurrer::FrameBlurrer;
use crate::shared::constants::{DEFAULT_BLUR_STRENGTH, MAX_BLUR_STRENGTH, MIN_BLUR_STRENGTH};
use crate::shared::frame::Frame;
use crate::shared::polygon::Polygon;

use super::gaussian::{self, RoiRect};
use super::polygon_mask;

/// CPU polygon blurrer using a separable Gaussian blur and an anti-aliased mask.
///
/// Each polygon's clipped bounding box is blurred as a whole, then blended
/// back through the polygon's coverage mask: pixels outside the polygon keep
/// their original value, covered pixels take the blurred value and edge
/// pixels mix the two by coverage. Kernel size per axis is the box dimension
/// divided by the blur strength, so higher strengths blur less.
pub struct CpuPolygonBlurrer {
    strength: u32,
    roi_buf: RefCell<Vec<u8>>,
    mask_buf: RefCell<Vec<u8>>,
    blur_temp: RefCell<Vec<f32>>,
}

impl CpuPolygonBlurrer {
    pub fn new(strength: u32) -> Self {
        Self {
            strength: strength.clamp(MIN_BLUR_STRENGTH, MAX_BLUR_STRENGTH),
            roi_buf: RefCell::new(Vec::new()),
            mask_buf: RefCell::new(Vec::new()),
            blur_temp: RefCell::new(Vec::new()),
        }
    }

    pub fn strength(&self) -> u32 {
        self.strength
    }

    fn kernel_for(&self, dimension: usize) -> Vec<f32> {
        gaussian::gaussian_kernel_1d(gaussian::kernel_size_for(dimension, self.strength))
    }
}

impl Default for CpuPolygonBlurrer {
    fn default() -> Self {
        Self::new(DEFAULT_BLUR_STRENGTH)
    }
}

impl FrameBlurrer for CpuPolygonBlurrer {
    fn blur(
        &self,
        frame: &mut Frame,
        polygons: &[Polygon],
    ) -> Result<(), Box<dyn std::error::Error>> {
        let fw = frame.width() as usize;
        let fh = frame.height() as usize;
        let channels = frame.channels() as usize;
        let data = frame.data_mut();

        for polygon in polygons {
            let Some(rect) = polygon_mask::clipped_bounds(polygon, fw, fh) else {
                continue;
            };
            let mut roi = self.roi_buf.borrow_mut();
            let mut mask = self.mask_buf.borrow_mut();
            let mut temp = self.blur_temp.borrow_mut();

            gaussian::extract_roi(data, fw, channels, rect, &mut roi);
            let kernel_x = self.kernel_for(rect.w);
            let kernel_y = self.kernel_for(rect.h);
            gaussian::separable_blur(
                &mut roi, rect.w, rect.h, channels, &kernel_x, &kernel_y, &mut temp,
            );

            polygon_mask::rasterize(polygon, rect, &mut mask);
            composite_masked(data, &roi, &mask, fw, channels, rect);
        }

        Ok(())
    }
}

/// Blend the blurred ROI into the frame weighted by the coverage mask.
fn composite_masked(
    data: &mut [u8],
    roi: &[u8],
    mask: &[u8],
    frame_width: usize,
    channels: usize,
    rect: RoiRect,
) {
    for row in 0..rect.h {
        for col in 0..rect.w {
            let m = mask[row * rect.w + col] as u32;
            if m == 0 {
                continue;
            }
            let frame_offset = ((rect.y + row) * frame_width + (rect.x + col)) * channels;
            let roi_offset = (row * rect.w + col) * channels;
            for c in 0..channels {
                let original = data[frame_offset + c] as u32;
                let blurred = roi[roi_offset + c] as u32;
                data[frame_offset + c] = ((original * (255 - m) + blurred * m + 127) / 255) as u8;
            }
        }
    }
}
