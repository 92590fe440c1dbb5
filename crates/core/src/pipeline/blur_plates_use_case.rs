use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::blurring::domain::frame_blurrer::FrameBlurrer;
use crate::detection::domain::region_detector::RegionDetector;
use crate::interpolation::engine_report::EngineReport;
use crate::interpolation::interpolation_engine::InterpolationEngine;
use crate::interpolation::interpolation_logger::InterpolationLogger;
use crate::shared::engine_config::EngineConfig;
use crate::tracking::domain::polygon_propagator::PolygonPropagator;
use crate::video::domain::frame_sink::FrameSink;
use crate::video::domain::frame_source::FrameSource;

use super::keyframe_sampler::KeyframeSampler;

/// Progress callback: `(frames_read, total_frames)`. Returning `false` cancels.
pub type ProgressFn = Box<dyn Fn(usize, usize) -> bool + Send>;

/// Runs one sequence through detection, interpolation and compositing.
///
/// This is the producer side: frames are read and classified on the calling
/// thread, keyframes go through the detector synchronously and everything is
/// handed to an [`InterpolationEngine`], whose worker writes the output. This
/// is a single-use struct: `execute` consumes the owned components, so
/// calling it twice will fail.
pub struct BlurPlatesUseCase {
    source: Option<Box<dyn FrameSource>>,
    sink: Option<Box<dyn FrameSink>>,
    detector: Option<Box<dyn RegionDetector>>,
    propagator: Option<Box<dyn PolygonPropagator>>,
    blurrer: Option<Box<dyn FrameBlurrer>>,
    logger: Option<Box<dyn InterpolationLogger>>,
    config: EngineConfig,
    on_progress: Option<ProgressFn>,
    cancelled: Arc<AtomicBool>,
}

impl BlurPlatesUseCase {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
        detector: Box<dyn RegionDetector>,
        propagator: Box<dyn PolygonPropagator>,
        blurrer: Box<dyn FrameBlurrer>,
        logger: Box<dyn InterpolationLogger>,
        config: EngineConfig,
        on_progress: Option<ProgressFn>,
        cancelled: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            source: Some(source),
            sink: Some(sink),
            detector: Some(detector),
            propagator: Some(propagator),
            blurrer: Some(blurrer),
            logger: Some(logger),
            config,
            on_progress,
            cancelled: cancelled.unwrap_or_else(|| Arc::new(AtomicBool::new(false))),
        }
    }

    pub fn execute(
        &mut self,
        input_path: &Path,
        output_path: &Path,
    ) -> Result<EngineReport, Box<dyn std::error::Error>> {
        self.config.validate()?;
        let sampler = KeyframeSampler::new(self.config.sample_interval)?;

        let mut source = self.source.take().ok_or("Pipeline already executed")?;
        let mut sink = self.sink.take().ok_or("Pipeline already executed")?;
        let mut detector = self.detector.take().ok_or("Pipeline already executed")?;
        let propagator = self.propagator.take().ok_or("Pipeline already executed")?;
        let blurrer = self.blurrer.take().ok_or("Pipeline already executed")?;
        let logger = self.logger.take().ok_or("Pipeline already executed")?;

        let metadata = source.open(input_path)?;
        if let Err(e) = sink.open(output_path, &metadata) {
            source.close();
            return Err(e);
        }
        log::info!(
            "Processing {} frames, {} keyframes to detect",
            metadata.total_frames,
            sampler.keyframe_count(metadata.total_frames)
        );

        let engine = InterpolationEngine::start(&self.config, propagator, blurrer, sink, logger);
        let fed = feed_frames(
            &mut *source,
            &mut *detector,
            &engine,
            sampler,
            metadata.total_frames,
            self.on_progress.as_ref(),
            &self.cancelled,
        );
        source.close();

        let last_index = match fed {
            Ok(last_index) => last_index,
            Err(e) => {
                // The engine's own failure, if any, explains a feed error best.
                return match engine.close() {
                    Err(engine_error) => Err(engine_error.into()),
                    Ok(_) => Err(e),
                };
            }
        };
        if let Some(last_index) = last_index {
            engine.flush(last_index)?;
        }
        let report = engine.close()?;
        log::info!(
            "Wrote {} frames ({} keyframes, {} dropped at hand-off)",
            report.frames_emitted,
            report.keyframes_processed,
            report.dropped_keyframes.len()
        );
        Ok(report)
    }
}

/// Reads every frame into the engine; returns the index of the last one.
fn feed_frames(
    source: &mut dyn FrameSource,
    detector: &mut dyn RegionDetector,
    engine: &InterpolationEngine,
    sampler: KeyframeSampler,
    total_frames: usize,
    on_progress: Option<&ProgressFn>,
    cancelled: &AtomicBool,
) -> Result<Option<usize>, Box<dyn std::error::Error>> {
    let mut last_index = None;
    for (read, frame) in source.frames().enumerate() {
        if cancelled.load(Ordering::Relaxed) {
            return Err("Cancelled".into());
        }
        let frame = frame?;
        let index = frame.index();
        if sampler.is_keyframe(index) {
            let polygons = detector.detect(&frame)?;
            log::debug!("Keyframe {index}: {} plates", polygons.len());
            engine.feed_keyframe(frame, polygons)?;
        } else {
            engine.feed_skipframe(frame)?;
        }
        last_index = Some(index);

        if let Some(callback) = on_progress {
            if !callback(read + 1, total_frames) {
                cancelled.store(true, Ordering::Relaxed);
                return Err("Cancelled".into());
            }
        }
    }
    Ok(last_index)
}
