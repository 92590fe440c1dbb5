/// Counters gathered by the interpolation worker over a whole stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineReport {
    pub keyframes_processed: usize,
    pub frames_emitted: usize,
    pub polygons_rejected: usize,
    pub stale_signals: usize,
    /// Keyframes replaced in the hand-off slot before the worker took them.
    pub dropped_keyframes: Vec<usize>,
}
