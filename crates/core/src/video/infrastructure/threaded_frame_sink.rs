use std::path::Path;
use std::thread::JoinHandle;

use crate::shared::frame::Frame;
use crate::shared::sequence_metadata::SequenceMetadata;
use crate::video::domain::frame_sink::FrameSink;

const DEFAULT_CHANNEL_CAPACITY: usize = 8;

type SendError = Box<dyn std::error::Error + Send + Sync>;

/// Moves encoding off the caller's thread.
///
/// Frames go to a dedicated writer thread through a bounded channel; the
/// caller only blocks when the channel is full. `write_owned` moves the frame
/// across, `write` has to send a copy. Frames reach the
/// wrapped sink in the order they were written. A failure in the wrapped
/// sink is reported by the next `write` or by `close`.
pub struct ThreadedFrameSink {
    inner: Option<Box<dyn FrameSink>>,
    channel_capacity: usize,
    tx: Option<crossbeam_channel::Sender<Frame>>,
    handle: Option<JoinHandle<Result<Box<dyn FrameSink>, SendError>>>,
}

impl ThreadedFrameSink {
    pub fn new(inner: Box<dyn FrameSink>) -> Self {
        Self::with_capacity(inner, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(inner: Box<dyn FrameSink>, channel_capacity: usize) -> Self {
        Self {
            inner: Some(inner),
            channel_capacity: channel_capacity.max(1),
            tx: None,
            handle: None,
        }
    }

    /// Waits for the writer thread and returns the wrapped sink, or the error
    /// that stopped it.
    fn join_writer(&mut self) -> Result<Option<Box<dyn FrameSink>>, Box<dyn std::error::Error>> {
        self.tx = None;
        match self.handle.take() {
            None => Ok(None),
            Some(handle) => match handle.join() {
                Ok(Ok(sink)) => Ok(Some(sink)),
                Ok(Err(e)) => Err(e.to_string().into()),
                Err(_) => Err("Writer thread panicked".into()),
            },
        }
    }
}

fn spawn_writer(
    mut sink: Box<dyn FrameSink>,
    write_rx: crossbeam_channel::Receiver<Frame>,
) -> JoinHandle<Result<Box<dyn FrameSink>, SendError>> {
    std::thread::spawn(move || {
        for frame in write_rx {
            sink.write(&frame)
                .map_err(|e| -> SendError { e.to_string().into() })?;
        }
        Ok(sink)
    })
}

impl FrameSink for ThreadedFrameSink {
    fn open(
        &mut self,
        path: &Path,
        metadata: &SequenceMetadata,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut sink = self
            .inner
            .take()
            .ok_or("ThreadedFrameSink: already opened")?;
        if let Err(e) = sink.open(path, metadata) {
            self.inner = Some(sink);
            return Err(e);
        }
        let (tx, rx) = crossbeam_channel::bounded(self.channel_capacity);
        self.tx = Some(tx);
        self.handle = Some(spawn_writer(sink, rx));
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        self.write_owned(frame.clone())
    }

    fn write_owned(&mut self, frame: Frame) -> Result<(), Box<dyn std::error::Error>> {
        let tx = self.tx.as_ref().ok_or("ThreadedFrameSink: not opened")?;
        if tx.send(frame).is_ok() {
            return Ok(());
        }
        // The writer only hangs up after an error.
        match self.join_writer() {
            Err(e) => Err(e),
            Ok(_) => Err("Writer thread stopped".into()),
        }
    }

    fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        match self.join_writer()? {
            Some(mut sink) => sink.close(),
            None => Ok(()),
        }
    }
}

impl Drop for ThreadedFrameSink {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Record {
        opened: bool,
        written: Vec<usize>,
        pixel_addresses: Vec<usize>,
        closed: bool,
    }

    struct RecordingSink {
        record: Arc<Mutex<Record>>,
        fail_at: Option<usize>,
        fail_open: bool,
    }

    impl FrameSink for RecordingSink {
        fn open(
            &mut self,
            _path: &Path,
            _metadata: &SequenceMetadata,
        ) -> Result<(), Box<dyn std::error::Error>> {
            if self.fail_open {
                return Err("cannot open".into());
            }
            self.record.lock().unwrap().opened = true;
            Ok(())
        }

        fn write(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
            if self.fail_at == Some(frame.index()) {
                return Err(format!("disk full at {}", frame.index()).into());
            }
            let mut record = self.record.lock().unwrap();
            record.written.push(frame.index());
            record.pixel_addresses.push(frame.data().as_ptr() as usize);
            Ok(())
        }

        fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
            self.record.lock().unwrap().closed = true;
            Ok(())
        }
    }

    fn sink(fail_at: Option<usize>, fail_open: bool) -> (ThreadedFrameSink, Arc<Mutex<Record>>) {
        let record = Arc::new(Mutex::new(Record::default()));
        let inner = RecordingSink {
            record: Arc::clone(&record),
            fail_at,
            fail_open,
        };
        (ThreadedFrameSink::with_capacity(Box::new(inner), 2), record)
    }

    fn metadata() -> SequenceMetadata {
        SequenceMetadata {
            width: 4,
            height: 4,
            total_frames: 50,
            source_path: None,
        }
    }

    fn frame(index: usize) -> Frame {
        Frame::filled(4, 4, 3, 0, index)
    }

    #[test]
    fn test_frames_reach_inner_sink_in_order() {
        let (mut sink, record) = sink(None, false);
        sink.open(Path::new("/unused"), &metadata()).unwrap();
        for i in 0..50 {
            sink.write(&frame(i)).unwrap();
        }
        sink.close().unwrap();

        let record = record.lock().unwrap();
        assert!(record.opened);
        assert!(record.closed);
        assert_eq!(record.written, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_owned_frames_are_moved_to_writer_thread() {
        let (mut sink, record) = sink(None, false);
        sink.open(Path::new("/unused"), &metadata()).unwrap();
        let owned = frame(0);
        let owned_pixels = owned.data().as_ptr() as usize;
        sink.write_owned(owned).unwrap();
        let borrowed = frame(1);
        let borrowed_pixels = borrowed.data().as_ptr() as usize;
        sink.write(&borrowed).unwrap();
        sink.close().unwrap();

        let record = record.lock().unwrap();
        assert_eq!(record.written, vec![0, 1]);
        assert_eq!(record.pixel_addresses[0], owned_pixels);
        assert_ne!(record.pixel_addresses[1], borrowed_pixels);
    }

    #[test]
    fn test_inner_failure_is_reported() {
        let (mut sink, record) = sink(Some(3), false);
        sink.open(Path::new("/unused"), &metadata()).unwrap();

        let mut first_error = None;
        for i in 0..50 {
            if let Err(e) = sink.write(&frame(i)) {
                first_error = Some(e.to_string());
                break;
            }
        }
        let error = match first_error {
            Some(e) => e,
            None => sink.close().unwrap_err().to_string(),
        };
        assert!(error.contains("disk full at 3"), "got {error}");
        assert_eq!(record.lock().unwrap().written, vec![0, 1, 2]);
    }

    #[test]
    fn test_open_failure_leaves_sink_unopened() {
        let (mut sink, _) = sink(None, true);
        assert!(sink.open(Path::new("/unused"), &metadata()).is_err());
        assert!(sink.write(&frame(0)).is_err());
    }

    #[test]
    fn test_write_before_open_is_error() {
        let (mut sink, _) = sink(None, false);
        assert!(sink.write(&frame(0)).is_err());
    }

    #[test]
    fn test_drop_closes_inner_sink() {
        let (mut sink, record) = sink(None, false);
        sink.open(Path::new("/unused"), &metadata()).unwrap();
        sink.write(&frame(0)).unwrap();
        drop(sink);
        let record = record.lock().unwrap();
        assert!(record.closed);
        assert_eq!(record.written, vec![0]);
    }
}
