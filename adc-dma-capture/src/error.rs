//! Capture and streaming errors

use core::fmt;

/// Error while setting up or running a capture session.
///
/// [`InvalidChannel`](CaptureError::InvalidChannel) and
/// [`ResourceExhausted`](CaptureError::ResourceExhausted) are raised before
/// any hardware is touched. [`TransferStall`](CaptureError::TransferStall) is
/// only returned by the timeout variants of the completion wait, after the
/// engine was aborted and the source stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CaptureError {
    /// The requested ADC input does not exist on this sample source.
    InvalidChannel(u8),
    /// Every DMA channel is already claimed.
    ResourceExhausted,
    /// The engine did not reach its transfer count before the deadline.
    TransferStall {
        /// Units the engine still had to move when it was aborted.
        remaining: u32,
    },
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::InvalidChannel(ch) => write!(f, "invalid ADC channel {}", ch),
            CaptureError::ResourceExhausted => f.write_str("no free DMA channel"),
            CaptureError::TransferStall { remaining } => {
                write!(f, "transfer stalled with {} units remaining", remaining)
            }
        }
    }
}

/// A capture session that did not complete, with its buffer handed back.
///
/// After a [`TransferStall`](CaptureError::TransferStall) the engine has been
/// aborted, so the buffer is safe to reuse; it holds whatever was moved
/// before the deadline.
pub struct CaptureFailure<B> {
    /// Why the session ended.
    pub error: CaptureError,
    /// The buffer the session was given.
    pub buffer: B,
}

impl<B> fmt::Debug for CaptureFailure<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureFailure")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "defmt")]
impl<B> defmt::Format for CaptureFailure<B> {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "CaptureFailure {{ error: {} }}", self.error)
    }
}

impl<B> From<CaptureFailure<B>> for CaptureError {
    fn from(failure: CaptureFailure<B>) -> Self {
        failure.error
    }
}

/// Error while emitting a captured buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamError<E> {
    /// The chunk size is zero or larger than the buffer.
    InvalidChunkSize {
        /// Requested chunk size.
        chunk_size: usize,
        /// Length of the buffer being emitted.
        len: usize,
    },
    /// A measured emission needs at least one pass.
    InvalidPassCount,
    /// The sink rejected a write or flush.
    Sink(E),
    /// Formatting the elapsed-time trailer failed.
    Format,
}

impl<E: fmt::Debug> fmt::Display for StreamError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::InvalidChunkSize { chunk_size, len } => write!(
                f,
                "chunk size {} is not in 1..={} for this buffer",
                chunk_size, len
            ),
            StreamError::InvalidPassCount => f.write_str("pass count must be at least 1"),
            StreamError::Sink(e) => write!(f, "sink error: {:?}", e),
            StreamError::Format => f.write_str("failed to format elapsed time"),
        }
    }
}

impl<E> From<embedded_io::WriteFmtError<E>> for StreamError<E> {
    fn from(err: embedded_io::WriteFmtError<E>) -> Self {
        match err {
            embedded_io::WriteFmtError::Other(e) => StreamError::Sink(e),
            _ => StreamError::Format,
        }
    }
}
