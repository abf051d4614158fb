//! Fixed-capacity destination for captured samples

use core::fmt;
use core::ops::Deref;

use embedded_dma::WriteTarget;

/// Byte buffer the transfer engine writes a capture into.
///
/// The capacity `N` is the capture depth; a session always moves exactly `N`
/// samples. A session takes the buffer by value, as a `&'static mut
/// CaptureBuffer<N>`, and only hands it back once the engine is done or
/// aborted.
///
/// Usually placed in a `static` with `cortex_m::singleton!`. A buffer on the
/// stack cannot be handed to the DMA, since nothing would stop it from being
/// reused while a leaked session keeps writing into it:
///
/// ```compile_fail
/// use adc_dma_capture::CaptureBuffer;
/// use embedded_dma::WriteBuffer;
///
/// fn dma_target<B: WriteBuffer<Word = u8>>(_: B) {}
///
/// let mut local = CaptureBuffer::<16>::new();
/// dma_target(&mut local);
/// ```
#[repr(transparent)]
pub struct CaptureBuffer<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> CaptureBuffer<N> {
    /// Capture depth of this buffer type.
    pub const CAPACITY: usize = N;

    /// A zero-filled buffer.
    pub const fn new() -> Self {
        CaptureBuffer { bytes: [0; N] }
    }

    /// Number of samples a capture into this buffer produces.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// The captured samples.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Overwrite every byte with `value`.
    ///
    /// Useful to spot bytes a transfer did not reach.
    pub fn fill(&mut self, value: u8) {
        self.bytes.fill(value);
    }
}

impl<const N: usize> Default for CaptureBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Deref for CaptureBuffer<N> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<const N: usize> fmt::Debug for CaptureBuffer<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureBuffer").field("capacity", &N).finish()
    }
}

/// Safety: `CaptureBuffer` is a transparent `[u8; N]`, valid for any bit
/// pattern. With this, `&'static mut CaptureBuffer<N>` is an
/// `embedded_dma::WriteBuffer`.
unsafe impl<const N: usize> WriteTarget for CaptureBuffer<N> {
    type Word = u8;
}
