use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::blurring::domain::frame_blurrer::FrameBlurrer;
use crate::shared::engine_config::{EngineConfig, FlowParams, KeyframeHandoff};
use crate::shared::frame::Frame;
use crate::shared::gray_frame::GrayFrame;
use crate::shared::polygon::Polygon;
use crate::tracking::domain::polygon_propagator::PolygonPropagator;
use crate::video::domain::frame_sink::FrameSink;

use super::engine_error::EngineError;
use super::engine_report::EngineReport;
use super::gap_interpolator::{self, Anchor, GapTracks};
use super::interpolation_logger::InterpolationLogger;
use super::latest_slot::LatestSlot;
use super::ring_frame_buffer::{BufferedFrame, RingFrameBuffer};

/// Lifecycle of the interpolation worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    AwaitingKeyframe,
    ProcessingKeyframe,
    Closed,
}

/// A detected keyframe on its way to the worker.
struct KeyframeEvent {
    frame: Frame,
    gray: GrayFrame,
    polygons: Vec<Polygon>,
}

enum EngineSignal {
    Keyframe(KeyframeEvent),
    /// End of stream: everything up to and including `last_index` is buffered.
    Flush { last_index: usize },
}

impl EngineSignal {
    fn index(&self) -> usize {
        match self {
            EngineSignal::Keyframe(event) => event.frame.index(),
            EngineSignal::Flush { last_index } => *last_index,
        }
    }
}

struct WorkerStatus {
    state: EngineState,
    last_processed: Option<usize>,
    failure: Option<EngineError>,
    exited: bool,
    report: EngineReport,
}

/// State shared between the producer-facing handle and the worker thread.
///
/// Lock order: `status` may be held while touching `slot`, never the reverse.
/// `buffer` is only ever locked on its own or from inside the worker's
/// [`LatestSlot::take_with`], never while `status` is held.
struct EngineShared {
    buffer: Mutex<RingFrameBuffer>,
    slot: LatestSlot<EngineSignal>,
    status: Mutex<WorkerStatus>,
    progress: Condvar,
}

impl EngineShared {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(RingFrameBuffer::new(capacity)),
            slot: LatestSlot::new(),
            status: Mutex::new(WorkerStatus {
                state: EngineState::Idle,
                last_processed: None,
                failure: None,
                exited: false,
                report: EngineReport::default(),
            }),
            progress: Condvar::new(),
        }
    }

    fn lock_buffer(&self) -> MutexGuard<'_, RingFrameBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_status(&self) -> MutexGuard<'_, WorkerStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: EngineState) {
        self.lock_status().state = state;
        self.progress.notify_all();
    }

    /// Takes every buffered frame with an index below `end`.
    fn drain_before(&self, end: usize) -> Vec<BufferedFrame> {
        let mut buffer = self.lock_buffer();
        let mut gap = Vec::new();
        while let Some(index) = buffer.front_index() {
            if index >= end {
                break;
            }
            gap.extend(buffer.get_forward());
        }
        gap
    }
}

/// Interpolates blur polygons onto skipframes and writes every frame, in
/// index order, to a [`FrameSink`].
///
/// The producer calls [`feed_skipframe`](Self::feed_skipframe) for frames
/// without detections and [`feed_keyframe`](Self::feed_keyframe) for frames
/// with fresh polygons. A dedicated worker thread picks up each keyframe,
/// drains the skipframes buffered since the previous one, tracks the two
/// anchors' polygons into the gap from both sides and composites the result.
/// At end of stream [`flush`](Self::flush) pushes out trailing skipframes
/// using forward propagation only, and [`close`](Self::close) stops the
/// worker.
///
/// Any fatal error is sticky: once the worker or a feed call has failed,
/// every later call returns the same error.
pub struct InterpolationEngine {
    shared: Arc<EngineShared>,
    flow: FlowParams,
    handoff: KeyframeHandoff,
    worker: Option<JoinHandle<()>>,
}

impl InterpolationEngine {
    /// Spawns the worker. `sink` must already be open; the worker closes it on exit.
    pub fn start(
        config: &EngineConfig,
        propagator: Box<dyn PolygonPropagator>,
        blurrer: Box<dyn FrameBlurrer>,
        sink: Box<dyn FrameSink>,
        logger: Box<dyn InterpolationLogger>,
    ) -> Self {
        let shared = Arc::new(EngineShared::new(config.buffer_capacity()));
        log::info!(
            "Starting interpolation worker (sample interval {}, buffer capacity {})",
            config.sample_interval,
            config.buffer_capacity()
        );
        let worker = Worker {
            shared: Arc::clone(&shared),
            propagator,
            blurrer,
            sink,
            logger,
            previous: None,
            last_processed: None,
            report: EngineReport::default(),
        };
        let handle = std::thread::spawn(move || run_worker(worker));
        Self {
            shared,
            flow: config.flow.clone(),
            handoff: config.handoff,
            worker: Some(handle),
        }
    }

    pub fn state(&self) -> EngineState {
        self.shared.lock_status().state
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock_buffer().capacity()
    }

    /// Buffers a frame that has no detections of its own.
    pub fn feed_skipframe(&self, frame: Frame) -> Result<(), EngineError> {
        self.check_running()?;
        let gray = GrayFrame::from_frame(&frame, &self.flow);
        let result = self.shared.lock_buffer().put(frame, gray);
        if let Err(e) = &result {
            log::error!("{e}");
            self.fail(e.clone());
        }
        result
    }

    /// Hands a detected keyframe to the worker.
    ///
    /// With [`KeyframeHandoff::LatestOnly`] a keyframe still waiting in the
    /// hand-off slot is replaced: its frame is never written and its index is
    /// listed in [`EngineReport::dropped_keyframes`]. With
    /// [`KeyframeHandoff::Wait`] this call blocks until the worker has taken
    /// the pending keyframe and drained its gap, so the buffer never holds
    /// more than two gaps.
    pub fn feed_keyframe(
        &self,
        frame: Frame,
        polygons: Vec<Polygon>,
    ) -> Result<(), EngineError> {
        self.check_running()?;
        let index = frame.index();
        let gray = GrayFrame::from_frame(&frame, &self.flow);
        let signal = EngineSignal::Keyframe(KeyframeEvent {
            frame,
            gray,
            polygons,
        });

        match self.handoff {
            KeyframeHandoff::LatestOnly => {
                let mut status = self.shared.lock_status();
                if let Some(displaced) = self.shared.slot.put(signal) {
                    let dropped = displaced.index();
                    log::warn!(
                        "Keyframe {dropped} replaced by keyframe {index} before processing; \
                         frame {dropped} will be missing from the output"
                    );
                    status.report.dropped_keyframes.push(dropped);
                }
                Ok(())
            }
            KeyframeHandoff::Wait => self
                .shared
                .slot
                .put_waiting(signal)
                .map_err(|_| self.failure_or_stopped()),
        }
    }

    /// Emits every buffered frame up to and including `last_index`, blocking
    /// until the worker has written them.
    ///
    /// Frames after the last keyframe only get polygons propagated forward
    /// from that keyframe.
    pub fn flush(&self, last_index: usize) -> Result<(), EngineError> {
        self.check_running()?;
        self.shared
            .slot
            .put_waiting(EngineSignal::Flush { last_index })
            .map_err(|_| self.failure_or_stopped())?;

        let mut status = self.shared.lock_status();
        loop {
            if let Some(e) = &status.failure {
                return Err(e.clone());
            }
            if status.last_processed.is_some_and(|p| p >= last_index) {
                return Ok(());
            }
            if status.exited {
                return Err(EngineError::Stopped);
            }
            status = self
                .shared
                .progress
                .wait(status)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stops the worker after its in-flight gap and waits for it to exit.
    ///
    /// A keyframe still waiting in the hand-off slot is discarded; call
    /// [`flush`](Self::flush) first to write everything.
    pub fn close(mut self) -> Result<EngineReport, EngineError> {
        let joined = self.shutdown();
        let status = self.shared.lock_status();
        if let Some(e) = &status.failure {
            return Err(e.clone());
        }
        joined?;
        Ok(status.report.clone())
    }

    fn shutdown(&mut self) -> Result<(), EngineError> {
        self.shared.slot.close();
        match self.worker.take() {
            Some(handle) => handle.join().map_err(|_| EngineError::WorkerPanicked),
            None => Ok(()),
        }
    }

    fn check_running(&self) -> Result<(), EngineError> {
        let status = self.shared.lock_status();
        match &status.failure {
            Some(e) => Err(e.clone()),
            None if status.exited => Err(EngineError::Stopped),
            None => Ok(()),
        }
    }

    fn failure_or_stopped(&self) -> EngineError {
        self.shared
            .lock_status()
            .failure
            .clone()
            .unwrap_or(EngineError::Stopped)
    }

    fn fail(&self, error: EngineError) {
        self.shared.lock_status().failure.get_or_insert(error);
        self.shared.slot.close();
        self.shared.progress.notify_all();
    }
}

impl Drop for InterpolationEngine {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

struct AnchorFrame {
    gray: GrayFrame,
    polygons: Vec<Polygon>,
}

impl AnchorFrame {
    fn as_anchor(&self) -> Anchor<'_> {
        Anchor {
            gray: &self.gray,
            polygons: &self.polygons,
        }
    }
}

/// Worker-owned state; lives on the worker thread for the stream's lifetime.
struct Worker {
    shared: Arc<EngineShared>,
    propagator: Box<dyn PolygonPropagator>,
    blurrer: Box<dyn FrameBlurrer>,
    sink: Box<dyn FrameSink>,
    logger: Box<dyn InterpolationLogger>,
    previous: Option<AnchorFrame>,
    last_processed: Option<usize>,
    report: EngineReport,
}

/// Marks the worker as exited even when it unwinds, so a producer blocked in
/// `flush` is always woken.
struct ExitGuard(Arc<EngineShared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let mut status = self.0.lock_status();
        if std::thread::panicking() {
            status.failure.get_or_insert(EngineError::WorkerPanicked);
        }
        status.exited = true;
        status.state = EngineState::Closed;
        drop(status);
        self.0.slot.close();
        self.0.progress.notify_all();
    }
}

fn run_worker(mut worker: Worker) {
    let _guard = ExitGuard(Arc::clone(&worker.shared));
    worker.shared.set_state(EngineState::AwaitingKeyframe);

    let shared = Arc::clone(&worker.shared);
    loop {
        let last_processed = worker.last_processed;
        let is_fresh = |index: usize| last_processed.map_or(true, |p| index > p);
        // A keyframe's gap leaves the buffer before the slot counts as empty,
        // so a producer in `put_waiting` cannot start a third gap meanwhile.
        let taken = shared.slot.take_with(|signal| match signal {
            EngineSignal::Keyframe(event) if is_fresh(event.frame.index()) => {
                shared.drain_before(event.frame.index())
            }
            _ => Vec::new(),
        });
        let Some((signal, gap)) = taken else {
            break;
        };
        let index = signal.index();
        if let Some(previous) = last_processed.filter(|&p| index <= p) {
            worker.ignore(signal, previous);
            continue;
        }

        worker.shared.set_state(EngineState::ProcessingKeyframe);
        let outcome = match signal {
            EngineSignal::Keyframe(event) => worker.process_keyframe(event, gap),
            EngineSignal::Flush { last_index } => worker.process_flush(last_index),
        };

        let mut status = worker.shared.lock_status();
        match outcome {
            Ok(()) => {
                worker.last_processed = Some(index);
                status.last_processed = Some(index);
                status.state = EngineState::AwaitingKeyframe;
            }
            Err(e) => {
                log::error!("Interpolation stopped at frame {index}: {e}");
                status.failure.get_or_insert(e);
                drop(status);
                break;
            }
        }
        drop(status);
        worker.shared.progress.notify_all();
    }

    worker.finish();
}

impl Worker {
    fn ignore(&mut self, signal: EngineSignal, previous: usize) {
        match signal {
            EngineSignal::Keyframe(event) => {
                log::warn!(
                    "Ignoring keyframe {}: not after last processed frame {previous}",
                    event.frame.index()
                );
                self.report.stale_signals += 1;
            }
            EngineSignal::Flush { last_index } => {
                log::debug!("Nothing to flush up to frame {last_index}");
            }
        }
    }

    fn process_keyframe(
        &mut self,
        event: KeyframeEvent,
        gap: Vec<BufferedFrame>,
    ) -> Result<(), EngineError> {
        let index = event.frame.index();
        self.verify_sequence(&gap, index)?;
        self.logger.gap_started(index, gap.len());

        let next = Anchor {
            gray: &event.gray,
            polygons: &event.polygons,
        };
        let tracks = self.track(&gap, Some(next));

        let started = Instant::now();
        self.emit_gap(gap, &tracks)?;
        let KeyframeEvent {
            frame,
            gray,
            polygons,
        } = event;
        self.emit(frame, &polygons)?;
        self.logger.timing("composite", elapsed_ms(started));

        self.previous = Some(AnchorFrame { gray, polygons });
        self.report.keyframes_processed += 1;
        Ok(())
    }

    fn process_flush(&mut self, last_index: usize) -> Result<(), EngineError> {
        let (mut frames, last) = {
            let mut buffer = self.shared.lock_buffer();
            let last = buffer.get_back();
            let rest: Vec<_> = std::iter::from_fn(|| buffer.get_forward()).collect();
            (rest, last)
        };
        let last = last.ok_or(EngineError::BufferUnderrun {
            expected: last_index,
        })?;
        if last.index() != last_index {
            return Err(EngineError::MissingFrame {
                expected: last_index,
                found: last.index(),
            });
        }
        frames.push(last);
        self.verify_sequence(&frames, last_index + 1)?;

        if self.previous.is_none() {
            log::warn!(
                "No keyframe before frame {}; writing {} frames without blur",
                frames[0].index(),
                frames.len()
            );
        }
        log::debug!("Flushing {} trailing frames", frames.len());
        let tracks = self.track(&frames, None);
        let started = Instant::now();
        self.emit_gap(frames, &tracks)?;
        self.logger.timing("composite", elapsed_ms(started));
        Ok(())
    }

    /// Checks that `frames` is exactly the run of indices after the last
    /// processed frame and before `end`, minus keyframes dropped at hand-off.
    fn verify_sequence(&self, frames: &[BufferedFrame], end: usize) -> Result<(), EngineError> {
        let first = match self.last_processed {
            Some(p) => p + 1,
            None => frames.first().map_or(end, BufferedFrame::index),
        };
        let dropped = self.shared.lock_status().report.dropped_keyframes.clone();
        let mut expected = (first..end).filter(|i| !dropped.contains(i));

        for buffered in frames {
            match expected.next() {
                Some(e) if e == buffered.index() => {}
                Some(e) => {
                    return Err(EngineError::MissingFrame {
                        expected: e,
                        found: buffered.index(),
                    })
                }
                None => {
                    return Err(EngineError::MissingFrame {
                        expected: end,
                        found: buffered.index(),
                    })
                }
            }
        }
        match expected.next() {
            Some(e) => Err(EngineError::BufferUnderrun { expected: e }),
            None => Ok(()),
        }
    }

    fn track(&mut self, frames: &[BufferedFrame], next: Option<Anchor<'_>>) -> GapTracks {
        let started = Instant::now();
        let grays: Vec<&GrayFrame> = frames.iter().map(|b| &b.gray).collect();
        let previous = self.previous.as_ref().map(AnchorFrame::as_anchor);
        let tracks = gap_interpolator::track_gap(&*self.propagator, &grays, previous, next);
        self.logger.timing("propagate", elapsed_ms(started));

        for (buffered, &count) in frames.iter().zip(&tracks.rejected) {
            if count > 0 {
                log::debug!("Frame {}: {count} polygons rejected", buffered.index());
                self.logger.polygons_rejected(buffered.index(), count);
            }
        }
        self.report.polygons_rejected += tracks.total_rejected();
        tracks
    }

    fn emit_gap(
        &mut self,
        frames: Vec<BufferedFrame>,
        tracks: &GapTracks,
    ) -> Result<(), EngineError> {
        for (i, buffered) in frames.into_iter().enumerate() {
            self.emit(buffered.frame, &tracks.merged(i))?;
        }
        Ok(())
    }

    fn emit(&mut self, mut frame: Frame, polygons: &[Polygon]) -> Result<(), EngineError> {
        let index = frame.index();
        self.blurrer
            .blur(&mut frame, polygons)
            .map_err(|e| EngineError::Composite {
                index,
                message: e.to_string(),
            })?;
        self.sink
            .write_owned(frame)
            .map_err(|e| EngineError::Sink(e.to_string()))?;
        self.report.frames_emitted += 1;
        Ok(())
    }

    fn finish(mut self) {
        let closed = self.sink.close();
        let report = {
            let mut status = self.shared.lock_status();
            if let Err(e) = closed {
                status.failure.get_or_insert(EngineError::Sink(e.to_string()));
            }
            let dropped = std::mem::take(&mut status.report.dropped_keyframes);
            status.report = EngineReport {
                dropped_keyframes: dropped,
                ..self.report.clone()
            };
            status.report.clone()
        };
        self.logger.summary(&report);
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpolation::interpolation_logger::NullInterpolationLogger;
    use crate::shared::sequence_metadata::SequenceMetadata;
    use crate::tracking::domain::polygon_propagator::Propagation;
    use crate::tracking::infrastructure::optical_flow_propagator::OpticalFlowPropagator;
    use approx::assert_abs_diff_eq;
    use crossbeam_channel::{Receiver, Sender};
    use rstest::rstest;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Written = Arc<Mutex<Vec<usize>>>;
    type Blurred = Arc<Mutex<Vec<(usize, Vec<Polygon>)>>>;

    struct IdentityPropagator;

    impl PolygonPropagator for IdentityPropagator {
        fn propagate(
            &self,
            _source: &GrayFrame,
            _target: &GrayFrame,
            polygons: &[Polygon],
        ) -> Propagation {
            Propagation {
                polygons: polygons.to_vec(),
                kept: vec![true; polygons.len()],
            }
        }
    }

    struct RecordingBlurrer {
        calls: Blurred,
    }

    impl FrameBlurrer for RecordingBlurrer {
        fn blur(
            &self,
            frame: &mut Frame,
            polygons: &[Polygon],
        ) -> Result<(), Box<dyn std::error::Error>> {
            self.calls
                .lock()
                .unwrap()
                .push((frame.index(), polygons.to_vec()));
            Ok(())
        }
    }

    struct RecordingSink {
        written: Written,
        entered: Option<Sender<usize>>,
        release: Option<Receiver<()>>,
        /// Frame whose write blocks; the first one written if unset.
        stall_at: Option<usize>,
        fail_with: Option<&'static str>,
    }

    impl FrameSink for RecordingSink {
        fn open(
            &mut self,
            _path: &Path,
            _metadata: &SequenceMetadata,
        ) -> Result<(), Box<dyn std::error::Error>> {
            Ok(())
        }

        fn write(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
            if let Some(message) = self.fail_with {
                return Err(message.into());
            }
            if self.stall_at.map_or(true, |i| i == frame.index()) {
                if let Some(entered) = self.entered.take() {
                    entered.send(frame.index()).unwrap();
                    if let Some(release) = &self.release {
                        release.recv().unwrap();
                    }
                }
            }
            self.written.lock().unwrap().push(frame.index());
            Ok(())
        }

        fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
            Ok(())
        }
    }

    struct Harness {
        engine: InterpolationEngine,
        written: Written,
        blurred: Blurred,
    }

    fn engine_config(interval: usize) -> EngineConfig {
        EngineConfig {
            sample_interval: interval,
            handoff: KeyframeHandoff::Wait,
            flow: FlowParams {
                window_size: 3,
                max_levels: 1,
                ..FlowParams::default()
            },
            ..EngineConfig::default()
        }
    }

    fn start_with(
        config: &EngineConfig,
        propagator: Box<dyn PolygonPropagator>,
        sink: RecordingSink,
    ) -> Harness {
        let written = Arc::clone(&sink.written);
        let blurred = Blurred::default();
        let engine = InterpolationEngine::start(
            config,
            propagator,
            Box::new(RecordingBlurrer {
                calls: Arc::clone(&blurred),
            }),
            Box::new(sink),
            Box::new(NullInterpolationLogger),
        );
        Harness {
            engine,
            written,
            blurred,
        }
    }

    fn recording_sink() -> RecordingSink {
        RecordingSink {
            written: Written::default(),
            entered: None,
            release: None,
            stall_at: None,
            fail_with: None,
        }
    }

    fn start(config: &EngineConfig) -> Harness {
        start_with(config, Box::new(IdentityPropagator), recording_sink())
    }

    fn frame(index: usize) -> Frame {
        Frame::filled(8, 8, 1, (index % 256) as u8, index)
    }

    fn plate() -> Vec<Polygon> {
        vec![Polygon::rectangle(1.0, 1.0, 4.0, 2.0)]
    }

    #[rstest]
    #[case(1, 5)]
    #[case(3, 10)]
    #[case(4, 9)]
    #[case(5, 23)]
    #[case(10, 7)]
    fn test_frames_are_written_in_index_order(#[case] interval: usize, #[case] total: usize) {
        let h = start(&engine_config(interval));
        for i in 0..total {
            if i % interval == 0 {
                h.engine.feed_keyframe(frame(i), plate()).unwrap();
            } else {
                h.engine.feed_skipframe(frame(i)).unwrap();
            }
        }
        h.engine.flush(total - 1).unwrap();
        let report = h.engine.close().unwrap();

        assert_eq!(*h.written.lock().unwrap(), (0..total).collect::<Vec<_>>());
        assert_eq!(report.frames_emitted, total);
        assert_eq!(report.keyframes_processed, total.div_ceil(interval));
        assert!(report.dropped_keyframes.is_empty());
    }

    #[test]
    fn test_wait_handoff_never_overruns_across_repeated_runs() {
        for run in 0..200 {
            let h = start(&engine_config(5));
            for i in 0..23 {
                let fed = if i % 5 == 0 {
                    h.engine.feed_keyframe(frame(i), plate())
                } else {
                    h.engine.feed_skipframe(frame(i))
                };
                assert_eq!(fed, Ok(()), "run {run}, frame {i}");
            }
            h.engine.flush(22).unwrap();
            let report = h.engine.close().unwrap();
            assert_eq!(report.frames_emitted, 23, "run {run}");
        }
    }

    #[test]
    fn test_wait_handoff_holds_producer_while_worker_stalls_mid_gap() {
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        let sink = RecordingSink {
            entered: Some(entered_tx),
            release: Some(release_rx),
            stall_at: Some(6),
            ..recording_sink()
        };
        let Harness {
            engine, written, ..
        } = start_with(&engine_config(5), Box::new(IdentityPropagator), sink);
        let fed = Arc::new(AtomicUsize::new(0));
        let producer = {
            let fed = Arc::clone(&fed);
            std::thread::spawn(move || {
                for i in 0..26 {
                    if i % 5 == 0 {
                        engine.feed_keyframe(frame(i), plate())?;
                    } else {
                        engine.feed_skipframe(frame(i))?;
                    }
                    fed.store(i, Ordering::SeqCst);
                }
                Ok::<_, EngineError>(engine)
            })
        };

        // Worker is stuck inside the gap before keyframe 10.
        assert_eq!(entered_rx.recv_timeout(Duration::from_secs(5)), Ok(6));
        let mut waited = Duration::ZERO;
        while fed.load(Ordering::SeqCst) < 19 {
            assert!(waited < Duration::from_secs(5), "producer stopped early");
            std::thread::sleep(Duration::from_millis(5));
            waited += Duration::from_millis(5);
        }
        std::thread::sleep(Duration::from_millis(50));
        // Keyframe 15 is pending with its gap buffered; keyframe 20 has to wait.
        assert_eq!(fed.load(Ordering::SeqCst), 19);
        release_tx.send(()).unwrap();

        let engine = producer.join().unwrap().unwrap();
        engine.flush(25).unwrap();
        let report = engine.close().unwrap();
        assert_eq!(*written.lock().unwrap(), (0..26).collect::<Vec<_>>());
        assert_eq!(report.keyframes_processed, 6);
        assert!(report.dropped_keyframes.is_empty());
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(10)]
    fn test_overrunning_buffer_is_fatal(#[case] interval: usize) {
        let h = start(&engine_config(interval));
        for i in 0..2 * interval {
            h.engine.feed_skipframe(frame(i)).unwrap();
        }
        let overrun = EngineError::BufferOverrun {
            capacity: 2 * interval,
            index: 2 * interval,
        };
        assert_eq!(
            h.engine.feed_skipframe(frame(2 * interval)),
            Err(overrun.clone())
        );
        // Sticky: every later call reports the same failure.
        assert_eq!(h.engine.feed_keyframe(frame(99), plate()), Err(overrun.clone()));
        assert_eq!(h.engine.close(), Err(overrun));
    }

    #[test]
    fn test_skipframes_get_polygons_from_both_keyframes() {
        let h = start(&engine_config(4));
        let left = vec![Polygon::rectangle(0.0, 0.0, 2.0, 2.0)];
        let right = vec![Polygon::rectangle(4.0, 4.0, 2.0, 2.0)];
        h.engine.feed_keyframe(frame(0), left.clone()).unwrap();
        for i in 1..4 {
            h.engine.feed_skipframe(frame(i)).unwrap();
        }
        h.engine.feed_keyframe(frame(4), right.clone()).unwrap();
        h.engine.flush(4).unwrap();
        h.engine.close().unwrap();

        let blurred = h.blurred.lock().unwrap();
        assert_eq!(blurred[0], (0, left.clone()));
        for (i, polygons) in blurred[1..4].iter().map(|(i, p)| (*i, p)) {
            assert!((1..4).contains(&i));
            assert_eq!(*polygons, vec![left[0].clone(), right[0].clone()]);
        }
        // The keyframe itself uses only its own detections.
        assert_eq!(blurred[4], (4, right));
    }

    /// Dark RGB frame with a bright 40x20 plate centred at `(cx, 100)`.
    fn moving_plate_frame(index: usize, cx: f64) -> Frame {
        let (width, height) = (240u32, 200u32);
        let edge = |v: f64| 1.0 / (1.0 + (-v).exp());
        let (left, right, top, bottom) = (cx - 20.0, cx + 20.0, 90.0, 110.0);
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let (fx, fy) = (x as f64 + 0.5, y as f64 + 0.5);
                let inside =
                    edge(fx - left) * edge(right - fx) * edge(fy - top) * edge(bottom - fy);
                let v = (40.0 + 160.0 * inside).round() as u8;
                data.extend_from_slice(&[v, v, v]);
            }
        }
        Frame::new(data, width, height, 3, index)
    }

    fn plate_at(cx: f64) -> Polygon {
        Polygon::rectangle(cx - 20.0, 90.0, 40.0, 20.0)
    }

    #[test]
    fn test_moving_plate_is_interpolated_on_every_skipframe() {
        let config = EngineConfig {
            sample_interval: 9,
            handoff: KeyframeHandoff::Wait,
            ..EngineConfig::default()
        };
        let h = start_with(
            &config,
            Box::new(OpticalFlowPropagator::new(&config.flow)),
            recording_sink(),
        );
        let center = |i: usize| 100.0 + 4.0 * i as f64;

        for i in 0..10 {
            let frame = moving_plate_frame(i, center(i));
            if i == 0 || i == 9 {
                h.engine.feed_keyframe(frame, vec![plate_at(center(i))]).unwrap();
            } else {
                h.engine.feed_skipframe(frame).unwrap();
            }
        }
        h.engine.flush(9).unwrap();
        let report = h.engine.close().unwrap();
        assert_eq!(report.frames_emitted, 10);
        assert_eq!(report.polygons_rejected, 0);

        let blurred = h.blurred.lock().unwrap();
        for (i, polygons) in blurred.iter().filter(|(i, _)| (1..9).contains(i)) {
            // One track from each keyframe.
            assert_eq!(polygons.len(), 2, "frame {i}");
            for polygon in polygons {
                let c = polygon.centroid();
                assert_abs_diff_eq!(c.x, center(*i), epsilon = 2.0);
                assert_abs_diff_eq!(c.y, 100.0, epsilon = 2.0);
            }
        }
    }

    #[test]
    fn test_flush_propagates_forward_from_last_keyframe() {
        let h = start(&engine_config(10));
        h.engine.feed_keyframe(frame(0), plate()).unwrap();
        for i in 1..7 {
            h.engine.feed_skipframe(frame(i)).unwrap();
        }
        h.engine.flush(6).unwrap();
        let report = h.engine.close().unwrap();

        assert_eq!(*h.written.lock().unwrap(), (0..7).collect::<Vec<_>>());
        assert_eq!(report.frames_emitted, 7);
        assert_eq!(report.keyframes_processed, 1);
        let blurred = h.blurred.lock().unwrap();
        assert!(blurred[1..].iter().all(|(_, p)| *p == plate()));
    }

    #[test]
    fn test_flush_without_any_keyframe_writes_frames_unblurred() {
        let h = start(&engine_config(10));
        for i in 0..3 {
            h.engine.feed_skipframe(frame(i)).unwrap();
        }
        h.engine.flush(2).unwrap();
        h.engine.close().unwrap();

        assert_eq!(*h.written.lock().unwrap(), vec![0, 1, 2]);
        assert!(h.blurred.lock().unwrap().iter().all(|(_, p)| p.is_empty()));
    }

    #[test]
    fn test_flush_after_final_keyframe_is_a_no_op() {
        let h = start(&engine_config(3));
        h.engine.feed_keyframe(frame(0), plate()).unwrap();
        h.engine.feed_skipframe(frame(1)).unwrap();
        h.engine.feed_skipframe(frame(2)).unwrap();
        h.engine.feed_keyframe(frame(3), plate()).unwrap();
        h.engine.flush(3).unwrap();
        let report = h.engine.close().unwrap();
        assert_eq!(*h.written.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(report.stale_signals, 0);
    }

    #[test]
    fn test_stale_keyframes_are_ignored() {
        let h = start(&engine_config(5));
        h.engine.feed_keyframe(frame(0), plate()).unwrap();
        for i in 1..5 {
            h.engine.feed_skipframe(frame(i)).unwrap();
        }
        h.engine.feed_keyframe(frame(5), plate()).unwrap();
        h.engine.feed_keyframe(frame(5), plate()).unwrap();
        h.engine.feed_keyframe(frame(2), plate()).unwrap();
        h.engine.flush(5).unwrap();
        let report = h.engine.close().unwrap();

        assert_eq!(*h.written.lock().unwrap(), (0..6).collect::<Vec<_>>());
        assert_eq!(report.stale_signals, 2);
    }

    #[test]
    fn test_unconsumed_keyframe_is_replaced_and_reported() {
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        let sink = RecordingSink {
            entered: Some(entered_tx),
            release: Some(release_rx),
            ..recording_sink()
        };
        let config = EngineConfig {
            handoff: KeyframeHandoff::LatestOnly,
            ..engine_config(3)
        };
        let h = start_with(&config, Box::new(IdentityPropagator), sink);

        h.engine.feed_keyframe(frame(0), plate()).unwrap();
        // The worker is now stuck writing frame 0.
        assert_eq!(entered_rx.recv_timeout(Duration::from_secs(5)), Ok(0));
        h.engine.feed_skipframe(frame(1)).unwrap();
        h.engine.feed_skipframe(frame(2)).unwrap();
        h.engine.feed_keyframe(frame(3), plate()).unwrap();
        h.engine.feed_skipframe(frame(4)).unwrap();
        h.engine.feed_keyframe(frame(5), plate()).unwrap();
        release_tx.send(()).unwrap();

        h.engine.flush(5).unwrap();
        let report = h.engine.close().unwrap();
        assert_eq!(*h.written.lock().unwrap(), vec![0, 1, 2, 4, 5]);
        assert_eq!(report.dropped_keyframes, vec![3]);
        assert_eq!(report.keyframes_processed, 2);
    }

    #[test]
    fn test_gap_in_buffered_indices_is_fatal() {
        let h = start(&engine_config(4));
        h.engine.feed_keyframe(frame(0), plate()).unwrap();
        h.engine.feed_skipframe(frame(1)).unwrap();
        h.engine.feed_skipframe(frame(3)).unwrap();
        h.engine.feed_keyframe(frame(4), plate()).unwrap();

        let missing = EngineError::MissingFrame {
            expected: 2,
            found: 3,
        };
        assert_eq!(h.engine.flush(4), Err(missing.clone()));
        assert_eq!(h.engine.close(), Err(missing));
        assert_eq!(*h.written.lock().unwrap(), vec![0]);
    }

    #[test]
    fn test_sink_failure_surfaces_to_producer() {
        let sink = RecordingSink {
            fail_with: Some("disk full"),
            ..recording_sink()
        };
        let h = start_with(&engine_config(2), Box::new(IdentityPropagator), sink);
        h.engine.feed_keyframe(frame(0), plate()).unwrap();

        let failure = EngineError::Sink("disk full".into());
        assert_eq!(h.engine.flush(0), Err(failure.clone()));
        assert_eq!(h.engine.feed_skipframe(frame(1)), Err(failure.clone()));
        assert_eq!(h.engine.close(), Err(failure));
    }

    #[test]
    fn test_worker_waits_for_keyframes_until_closed() {
        let h = start(&engine_config(2));
        let mut waited = Duration::ZERO;
        while h.engine.state() != EngineState::AwaitingKeyframe {
            assert!(waited < Duration::from_secs(5), "worker never started");
            std::thread::sleep(Duration::from_millis(5));
            waited += Duration::from_millis(5);
        }
        assert_eq!(h.engine.capacity(), 4);
        let report = h.engine.close().unwrap();
        assert_eq!(report, EngineReport::default());
        assert!(h.written.lock().unwrap().is_empty());
    }
}
