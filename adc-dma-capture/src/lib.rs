//! Free-running ADC capture through a DREQ-paced DMA channel
//!
//! The ADC is put in free-running mode and pushes every completed conversion
//! into its sample FIFO. A DMA channel reads the FIFO register (fixed address)
//! and writes an incrementing destination in a [`CaptureBuffer`], moving one
//! byte every time the ADC asserts its data request. The processor only has
//! to arm the channel, start the ADC and wait.
//!
//! Ordering matters, and [`CaptureController`] enforces it in the type system:
//!
//! 1. configure the [`SampleSource`] and claim + configure a [`TransferEngine`]
//! 2. arm the engine (it waits for DREQ, nothing moves yet)
//! 3. start the source
//! 4. block until the engine has moved the full transfer count
//! 5. stop the source and drain whatever conversion was still in flight
//!
//! Only then is the buffer handed back for reading, e.g. by an
//! [`OutputStreamer`]. The session owns the buffer (a `&'static mut
//! CaptureBuffer<N>`) in the meantime, so it cannot be touched while the
//! engine may still write into it, not even by leaking the session.
//!
//! ## Usage
//!
//! ```ignore
//! use adc_dma_capture::{CaptureBuffer, CaptureConfig, CaptureController, ClockDivider};
//!
//! let buffer = cortex_m::singleton!(: CaptureBuffer<4000> = CaptureBuffer::new()).unwrap();
//!
//! let config = CaptureConfig::new(0)
//!     .clock_divider(ClockDivider::FULL_SPEED)
//!     .shift_8bit(true);
//! let mut controller = CaptureController::new(sampler, dma);
//! let (report, buffer) = controller.capture(&config, buffer)?;
//! ```
//!
//! Backends:
//! * `rp2040` - the RP2040 ADC and DMA blocks, driven through `rp2040-hal`
//! * `sim` - a cycle-stepped software model, used by the tests

#![warn(missing_docs)]
#![cfg_attr(not(any(test, feature = "sim")), no_std)]

#[macro_use]
mod macros;

pub mod adc;
pub mod buffer;
pub mod capture;
pub mod config;
pub mod dma;
pub mod error;
pub mod stream;
pub mod timer;

#[cfg(feature = "rp2040")]
pub mod rp2040;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use crate::adc::{SampleSource, SourceTarget};
pub use crate::buffer::CaptureBuffer;
pub use crate::capture::{CaptureController, CaptureReport, CaptureState};
pub use crate::config::{CaptureConfig, ClockDivider, StreamConfig};
pub use crate::dma::{ChannelAllocator, TransferDescriptor, TransferEngine};
pub use crate::error::{CaptureError, CaptureFailure, StreamError};
pub use crate::stream::OutputStreamer;
pub use crate::timer::{Duration, Instant, Monotonic, TimingSample};
