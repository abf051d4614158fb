use core::mem;

use rp2040_hal::adc::{AdcFifo, AdcPin, TempSense};
use rp2040_hal::dma::ReadTarget;
use rp2040_hal::gpio::{DynPinId, FunctionSioInput, Pin, PullNone};
use rp2040_hal::pac;
use rp2040_hal::Adc;

use crate::adc::{SampleSource, SourceTarget};
use crate::config::{CaptureConfig, TEMPERATURE_SENSOR_CHANNEL};
use crate::dma::TREQ_UNPACED;
use crate::error::CaptureError;

/// One of GPIO26..29 in ADC mode.
///
/// ```ignore
/// let input: AdcInput = AdcPin::new(pins.gpio26.into_floating_input().into_dyn_pin()).unwrap();
/// ```
pub type AdcInput = AdcPin<Pin<DynPinId, FunctionSioInput, PullNone>>;

/// The RP2040 ADC in free-running mode, through the HAL's [`AdcFifo`].
///
/// Conversions land in the 4-entry sample FIFO, which asserts `DREQ_ADC`
/// whenever it holds at least one sample. GPIO inputs have to be handed over
/// with [`AdcSampler::with_input`] before they can be captured; the
/// temperature sensor is always available and only powered while selected.
pub struct AdcSampler {
    adc: Adc,
    inputs: [Option<AdcInput>; 4],
    temperature: Option<TempSense>,
    target: SourceTarget,
    overrun: bool,
}

impl AdcSampler {
    /// Take over an enabled ADC, with no GPIO input attached yet.
    pub fn new(mut adc: Adc) -> Self {
        let fifo = adc.build_fifo().start_paused();
        let target = target_of(&fifo.dma_read_target());
        fifo.stop();
        AdcSampler {
            adc,
            inputs: [None, None, None, None],
            temperature: None,
            target,
            overrun: false,
        }
    }

    /// Make a GPIO input available for capture on its ADC channel.
    pub fn with_input(mut self, pin: AdcInput) -> Self {
        let channel = usize::from(pin.channel());
        self.inputs[channel] = Some(pin);
        self
    }

    /// Release the ADC and the inputs, powering down the temperature sensor.
    pub fn free(mut self) -> (Adc, [Option<AdcInput>; 4]) {
        if let Some(sensor) = self.temperature.take() {
            self.adc.disable_temp_sensor(sensor);
        }
        self.adc.build_fifo().start_paused().stop();
        (self.adc, self.inputs)
    }
}

fn target_of<T: ReadTarget>(target: &T) -> SourceTarget {
    let (address, _) = target.rx_address_count();
    SourceTarget {
        address,
        treq: T::rx_treq().unwrap_or(TREQ_UNPACED),
    }
}

/// Empty the FIFO and clear its error flags. Returns the samples discarded.
fn reset_fifo<W>(mut fifo: AdcFifo<'_, W>) -> usize {
    let stale = usize::from(fifo.len());
    fifo.clear();
    fifo.is_over();
    fifo.is_under();
    stale
}

/// `AdcFifoBuilder::shift_8bit` has no way back to 12-bit samples.
fn disable_shift() {
    // Safety: only FCS.SHIFT is written, on an ADC owned by the sampler.
    let adc = unsafe { &*pac::ADC::ptr() };
    adc.fcs().modify(|_, w| w.shift().clear_bit());
}

impl SampleSource for AdcSampler {
    fn supports_channel(&self, channel: u8) -> bool {
        channel == TEMPERATURE_SENSOR_CHANNEL
            || matches!(self.inputs.get(usize::from(channel)), Some(Some(_)))
    }

    fn configure(&mut self, config: &CaptureConfig) -> Result<(), CaptureError> {
        let channel = config.channel();
        let AdcSampler {
            adc,
            inputs,
            temperature,
            ..
        } = self;

        let builder = if channel == TEMPERATURE_SENSOR_CHANNEL {
            if temperature.is_none() {
                *temperature = adc.take_temp_sensor();
            }
            let Some(sensor) = temperature.as_mut() else {
                return Err(CaptureError::InvalidChannel(channel));
            };
            adc.build_fifo().set_channel(sensor)
        } else {
            let Some(pin) = inputs.get_mut(usize::from(channel)).and_then(Option::as_mut) else {
                return Err(CaptureError::InvalidChannel(channel));
            };
            if let Some(sensor) = temperature.take() {
                adc.disable_temp_sensor(sensor);
            }
            adc.build_fifo().set_channel(pin)
        };

        // DREQ as soon as one sample is queued, so the FIFO never fills while
        // the DMA keeps up.
        let divider = config.divider();
        let builder = builder
            .clock_divider(divider.int, divider.frac)
            .enable_dma();
        let stale = if config.is_shifted() {
            reset_fifo(builder.shift_8bit().start_paused())
        } else {
            disable_shift();
            reset_fifo(builder.start_paused())
        };
        if stale > 0 {
            debug!("dropped {} samples left from a previous session", stale);
        }
        self.overrun = false;
        Ok(())
    }

    fn read_target(&self) -> SourceTarget {
        self.target
    }

    fn start(&mut self) {
        self.adc.build_fifo().start_paused().resume();
    }

    fn stop(&mut self) {
        self.adc.stop();
    }

    fn drain_stale_samples(&mut self) -> usize {
        // READY stays low until a conversion that was running when
        // START_MANY got cleared has landed in the FIFO.
        self.adc.wait_ready();
        let mut fifo = self.adc.build_fifo().start_paused();
        let stale = usize::from(fifo.len());
        self.overrun |= fifo.is_over();
        fifo.stop();
        stale
    }

    /// Latched when the FIFO is drained.
    fn take_overrun(&mut self) -> bool {
        mem::take(&mut self.overrun)
    }
}
