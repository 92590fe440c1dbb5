use std::collections::HashMap;
use std::time::Instant;

use super::engine_report::EngineReport;

/// Cross-cutting logger for interpolation worker events.
///
/// Called from the worker thread only, so implementations never see
/// concurrent calls.
pub trait InterpolationLogger: Send {
    /// A gap of `skipframes` buffered frames ending at `keyframe` is about to be processed.
    fn gap_started(&mut self, keyframe: usize, skipframes: usize);

    /// Record how long a named stage took for one gap.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record polygons dropped by the consistency filter on one frame.
    fn polygons_rejected(&mut self, frame: usize, count: usize);

    /// Emit an end-of-stream summary. Default: no-op.
    fn summary(&self, _report: &EngineReport) {}
}

/// Silent logger that discards all events.
pub struct NullInterpolationLogger;

impl InterpolationLogger for NullInterpolationLogger {
    fn gap_started(&mut self, _keyframe: usize, _skipframes: usize) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn polygons_rejected(&mut self, _frame: usize, _count: usize) {}
}

/// Logger that tracks per-stage timing and rejection counts, and reports
/// them through the `log` facade when the stream ends.
pub struct StatsInterpolationLogger {
    timings: HashMap<String, Vec<f64>>,
    rejected: HashMap<usize, usize>,
    gaps: usize,
    start_time: Instant,
}

impl StatsInterpolationLogger {
    pub fn new() -> Self {
        Self {
            timings: HashMap::new(),
            rejected: HashMap::new(),
            gaps: 0,
            start_time: Instant::now(),
        }
    }

    /// Returns the formatted summary string, or `None` if no gap was processed.
    pub fn summary_string(&self, report: &EngineReport) -> Option<String> {
        if self.gaps == 0 && self.timings.is_empty() {
            return None;
        }

        let elapsed_ms = self.start_time.elapsed().as_secs_f64() * 1000.0;
        let mut lines = vec![format!(
            "Interpolation summary ({} frames, {} keyframes, {:.1}s total):",
            report.frames_emitted,
            report.keyframes_processed,
            elapsed_ms / 1000.0
        )];

        let mut stages: Vec<_> = self.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let durations = &self.timings[stage];
            let total_ms: f64 = durations.iter().sum();
            let avg_ms = total_ms / durations.len().max(1) as f64;
            lines.push(format!(
                "  {stage:12}: avg {avg_ms:6.1}ms  total {total_ms:7.0}ms"
            ));
        }

        lines.push(format!(
            "  Rejected polygons: {} across {} frames",
            report.polygons_rejected,
            self.rejected.len()
        ));
        if report.stale_signals > 0 {
            lines.push(format!("  Stale signals ignored: {}", report.stale_signals));
        }
        if !report.dropped_keyframes.is_empty() {
            lines.push(format!(
                "  Keyframes dropped: {:?}",
                report.dropped_keyframes
            ));
        }
        if report.frames_emitted > 0 && elapsed_ms > 0.0 {
            let fps = report.frames_emitted as f64 / (elapsed_ms / 1000.0);
            lines.push(format!("  Throughput: {fps:.1} fps"));
        }

        Some(lines.join("\n"))
    }

    pub fn timings_for(&self, stage: &str) -> Option<&[f64]> {
        self.timings.get(stage).map(|v| v.as_slice())
    }

    pub fn rejected_on(&self, frame: usize) -> usize {
        self.rejected.get(&frame).copied().unwrap_or(0)
    }

    pub fn gaps(&self) -> usize {
        self.gaps
    }
}

impl Default for StatsInterpolationLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl InterpolationLogger for StatsInterpolationLogger {
    fn gap_started(&mut self, keyframe: usize, skipframes: usize) {
        self.gaps += 1;
        log::debug!("Keyframe {keyframe}: interpolating {skipframes} skipframes");
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn polygons_rejected(&mut self, frame: usize, count: usize) {
        if count > 0 {
            *self.rejected.entry(frame).or_default() += count;
        }
    }

    fn summary(&self, report: &EngineReport) {
        if let Some(text) = self.summary_string(report) {
            log::info!("\n\n{text}");
        }
    }
}
