use thiserror::Error;

/// Failures that stop the interpolation engine.
///
/// Everything here breaks the output ordering guarantee, so none of it is
/// retried. Per-polygon tracking problems are not errors; they only drop the
/// polygon for that frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(
        "ring buffer overrun at frame {index} (capacity {capacity}); \
         sample interval is too large for the buffer or keyframes stopped arriving"
    )]
    BufferOverrun { capacity: usize, index: usize },
    #[error("ring buffer underrun: frame {expected} was never buffered")]
    BufferUnderrun { expected: usize },
    #[error("buffered frames out of order: expected frame {expected}, found {found}")]
    MissingFrame { expected: usize, found: usize },
    #[error("failed to composite frame {index}: {message}")]
    Composite { index: usize, message: String },
    #[error("output sink failed: {0}")]
    Sink(String),
    #[error("interpolation engine is stopped")]
    Stopped,
    #[error("interpolation worker panicked")]
    WorkerPanicked,
}
