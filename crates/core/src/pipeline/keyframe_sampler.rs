/// Decides which frames are sent to the detector.
///
/// Frame `i` is a keyframe iff `i % interval == 0`, so the first frame is
/// always detected and the gap between keyframes is `interval - 1` frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyframeSampler {
    interval: usize,
}

impl KeyframeSampler {
    pub fn new(interval: usize) -> Result<Self, &'static str> {
        if interval < 1 {
            return Err("sample interval must be >= 1");
        }
        Ok(Self { interval })
    }

    pub fn interval(&self) -> usize {
        self.interval
    }

    pub fn is_keyframe(&self, index: usize) -> bool {
        index % self.interval == 0
    }

    /// Number of detector calls for a sequence of `total_frames`.
    pub fn keyframe_count(&self, total_frames: usize) -> usize {
        total_frames.div_ceil(self.interval)
    }
}
