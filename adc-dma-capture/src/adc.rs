//! Sample source: an ADC in free-running mode feeding a sample FIFO
//!
//! A [`SampleSource`] converts continuously once started, pushing each result
//! into its FIFO and asserting a data request (DREQ) while the FIFO holds at
//! least one sample. The transfer engine drains the FIFO register, paced by
//! that request.
//!
//! Implementations must keep every mutation behind `&mut self`: the source is
//! an exclusive handle to the peripheral, never a global.

use crate::config::{CaptureConfig, ADC_CHANNELS};
use crate::error::CaptureError;

/// Where a transfer engine reads samples from.
///
/// Mirrors what a DMA channel needs to know about a peripheral read target:
/// a fixed register address that must not be incremented and the DREQ number
/// that paces the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SourceTarget {
    /// Address of the FIFO head register.
    pub address: u32,
    /// DREQ number asserted while the FIFO is non-empty.
    pub treq: u8,
}

/// An ADC that can be driven in free-running mode.
pub trait SampleSource {
    /// Returns `true` if `channel` names an input this source can sample.
    ///
    /// The default accepts the four GPIO inputs and the temperature sensor.
    fn supports_channel(&self, channel: u8) -> bool {
        channel < ADC_CHANNELS
    }

    /// Select the input, sample rate and FIFO policy.
    ///
    /// The FIFO is set up to take every completed conversion, to assert DREQ
    /// when at least one sample is queued, and to shift samples to 8 bits if
    /// requested. Must be called while stopped.
    ///
    /// Fails with [`CaptureError::InvalidChannel`] before any register is
    /// written if the channel is not supported.
    fn configure(&mut self, config: &CaptureConfig) -> Result<(), CaptureError>;

    /// The FIFO register and DREQ the transfer engine should be bound to.
    fn read_target(&self) -> SourceTarget;

    /// Begin free-running conversion.
    fn start(&mut self);

    /// Stop starting new conversions.
    ///
    /// A conversion that is already in progress still completes, and samples
    /// already in the FIFO stay there.
    fn stop(&mut self);

    /// Wait for an in-flight conversion to finish, then discard everything
    /// left in the FIFO. Returns the number of samples discarded.
    fn drain_stale_samples(&mut self) -> usize;

    /// Check if the FIFO overflowed since the last call, clearing the flag.
    fn take_overrun(&mut self) -> bool;
}
