//! RP2040 backend
//!
//! [`AdcSampler`] drives the ADC block in free-running mode through the HAL's
//! FIFO driver, [`Dma`] hands out the twelve channels of the DMA block. Both
//! are built from the HAL's initialised drivers, so the usual reset and clock
//! bring-up stays with `rp2040-hal`:
//!
//! ```ignore
//! use rp2040_hal::{self as hal, adc::AdcPin, dma::DMAExt, pac};
//! use adc_dma_capture::rp2040::{AdcSampler, Dma};
//!
//! let gpio26 = AdcPin::new(pins.gpio26.into_floating_input().into_dyn_pin()).unwrap();
//! let adc = hal::Adc::new(pac.ADC, &mut pac.RESETS);
//! let sampler = AdcSampler::new(adc).with_input(gpio26);
//! let dma = pac.DMA.split(&mut pac.RESETS);
//! let mut controller = CaptureController::new(sampler, Dma::new(dma));
//! ```
//!
//! The HAL [`Timer`](rp2040_hal::Timer) implements [`Monotonic`].

mod adc;
mod dma;

pub use self::adc::{AdcInput, AdcSampler};
pub use self::dma::{Dma, DmaChannel};

use rp2040_hal::Timer;

use crate::timer::{Instant, Monotonic};

impl Monotonic for Timer {
    fn now(&self) -> Instant {
        self.get_counter()
    }
}
