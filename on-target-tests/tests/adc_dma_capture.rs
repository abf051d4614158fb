//! Free-running ADC captures through a DMA channel, on real hardware.
//!
//! GPIO26 should be left floating or tied to a stable voltage; the tests only
//! look at timing and lengths, not at the values, except for the
//! temperature sensor.

#![no_std]
#![no_main]
#![cfg(test)]

use defmt_rtt as _; // defmt transport
use defmt_test as _;
use panic_probe as _; // panic handler
use rp2040_hal as hal;

use adc_dma_capture::rp2040::{AdcSampler, Dma};
use adc_dma_capture::CaptureController;

/// The linker will place this boot block at the start of our program image. We
/// need this to help the ROM bootloader get our code up and running.
#[link_section = ".boot2"]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

/// External high-speed crystal on the Raspberry Pi Pico board is 12 MHz. Adjust
/// if your board has a different frequency
const XTAL_FREQ_HZ: u32 = 12_000_000u32;

struct State {
    controller: CaptureController<AdcSampler, &'static Dma>,
    dma: &'static Dma,
    timer: hal::Timer,
}

mod init;

#[defmt_test::tests]
mod tests {
    use crate::State;
    use crate::XTAL_FREQ_HZ;
    use defmt::{assert, assert_eq};
    use defmt_rtt as _;
    use panic_probe as _;
    use rp2040_hal as hal;

    use hal::{adc::AdcPin, clocks::init_clocks_and_plls, dma::DMAExt, pac, watchdog::Watchdog};

    use adc_dma_capture::config::TEMPERATURE_SENSOR_CHANNEL;
    use adc_dma_capture::rp2040::{AdcSampler, Dma};
    use adc_dma_capture::{
        CaptureBuffer, CaptureConfig, CaptureController, CaptureError, ClockDivider, Duration,
        Monotonic, TimingSample,
    };

    #[init]
    fn setup() -> State {
        unsafe {
            crate::init::reset_cleanup();
        }
        let mut pac = pac::Peripherals::take().unwrap();
        let mut watchdog = Watchdog::new(pac.WATCHDOG);

        let clocks = init_clocks_and_plls(
            XTAL_FREQ_HZ,
            pac.XOSC,
            pac.CLOCKS,
            pac.PLL_SYS,
            pac.PLL_USB,
            &mut pac.RESETS,
            &mut watchdog,
        )
        .ok()
        .unwrap();

        let timer = hal::Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);
        let sio = hal::Sio::new(pac.SIO);
        let pins = hal::gpio::Pins::new(
            pac.IO_BANK0,
            pac.PADS_BANK0,
            sio.gpio_bank0,
            &mut pac.RESETS,
        );
        let gpio26 = AdcPin::new(pins.gpio26.into_floating_input().into_dyn_pin()).unwrap();

        let adc = hal::Adc::new(pac.ADC, &mut pac.RESETS);
        let sampler = AdcSampler::new(adc).with_input(gpio26);
        let channels = pac.DMA.split(&mut pac.RESETS);
        let dma: &'static Dma = cortex_m::singleton!(: Dma = Dma::new(channels)).unwrap();

        State {
            controller: CaptureController::new(sampler, dma),
            dma,
            timer,
        }
    }

    #[test]
    fn full_speed_capture(state: &mut State) {
        let buffer = cortex_m::singleton!(: CaptureBuffer<4000> = CaptureBuffer::new()).unwrap();
        let config = CaptureConfig::new(0);

        let start = state.timer.now();
        let (report, _) = state.controller.capture(&config, buffer).unwrap();
        let end = state.timer.now();

        assert_eq!(report.samples, 4000);
        assert_eq!(report.dma_channel, 0);
        assert!(!report.overrun);
        // 4000 conversions of 2us each
        let elapsed = TimingSample { start, end }.elapsed();
        assert!(elapsed >= Duration::micros(7_900));
        assert_eq!(state.dma.pool().claimed_count(), 0);
    }

    #[test]
    fn slow_capture_waits_for_every_sample(state: &mut State) {
        let buffer = cortex_m::singleton!(: CaptureBuffer<1000> = CaptureBuffer::new()).unwrap();
        let config =
            CaptureConfig::new(0).clock_divider(ClockDivider::from_sample_rate(100_000));

        let start = state.timer.now();
        let (report, _) = state.controller.capture(&config, buffer).unwrap();
        let end = state.timer.now();

        assert_eq!(report.samples, 1000);
        let elapsed = TimingSample { start, end }.elapsed();
        assert!(elapsed >= Duration::micros(9_900));
    }

    #[test]
    fn temperature_sensor_reads_room_temperature(state: &mut State) {
        let buffer = cortex_m::singleton!(: CaptureBuffer<64> = CaptureBuffer::new()).unwrap();
        let config = CaptureConfig::new(TEMPERATURE_SENSOR_CHANNEL);

        let (report, buffer) = state.controller.capture(&config, buffer).unwrap();

        assert_eq!(report.channel, TEMPERATURE_SENSOR_CHANNEL);
        // About 0.7V at 27°C, i.e. 54 out of 255 on a 3.3V reference
        for &sample in buffer.iter() {
            assert!((30..=90).contains(&sample));
        }
    }

    #[test]
    fn temperature_sensor_is_powered_down_by_a_gpio_capture(state: &mut State) {
        let buffer = cortex_m::singleton!(: CaptureBuffer<16> = CaptureBuffer::new()).unwrap();
        // Safety: read only
        let adc = unsafe { &*pac::ADC::ptr() };

        let config = CaptureConfig::new(TEMPERATURE_SENSOR_CHANNEL);
        let (_, buffer) = state.controller.capture(&config, buffer).unwrap();
        assert!(adc.cs().read().ts_en().bit_is_set());

        state
            .controller
            .capture(&CaptureConfig::new(0), buffer)
            .unwrap();
        assert!(adc.cs().read().ts_en().bit_is_clear());
    }

    #[test]
    fn input_without_a_pin_is_rejected(state: &mut State) {
        let buffer = cortex_m::singleton!(: CaptureBuffer<16> = CaptureBuffer::new()).unwrap();

        let failure = state
            .controller
            .capture(&CaptureConfig::new(1), buffer)
            .unwrap_err();

        assert_eq!(failure.error, CaptureError::InvalidChannel(1));
        assert_eq!(state.dma.pool().claimed_count(), 0);
    }

    #[test]
    fn timeout_does_not_fire_on_a_running_adc(state: &mut State) {
        let buffer = cortex_m::singleton!(: CaptureBuffer<4000> = CaptureBuffer::new()).unwrap();
        let config = CaptureConfig::new(0);

        let (report, _) = state
            .controller
            .capture_with_timeout(&config, buffer, &state.timer, Duration::millis(100))
            .unwrap();
        assert_eq!(report.samples, 4000);
    }

    #[test]
    fn invalid_channel_is_rejected(state: &mut State) {
        let buffer = cortex_m::singleton!(: CaptureBuffer<16> = CaptureBuffer::new()).unwrap();

        let failure = state
            .controller
            .capture(&CaptureConfig::new(5), buffer)
            .unwrap_err();

        assert_eq!(failure.error, CaptureError::InvalidChannel(5));
        assert_eq!(failure.buffer.len(), 16);
        assert_eq!(state.dma.pool().claimed_count(), 0);
    }

    #[test]
    fn all_channels_claimed(state: &mut State) {
        let buffer = cortex_m::singleton!(: CaptureBuffer<16> = CaptureBuffer::new()).unwrap();
        let pool = state.dma.pool();
        let claims: [_; 12] = core::array::from_fn(|_| pool.claim_unused().unwrap());

        let failure = state
            .controller
            .capture(&CaptureConfig::new(0), buffer)
            .unwrap_err();
        assert_eq!(failure.error, CaptureError::ResourceExhausted);

        drop(claims);
        let buffer = failure.buffer;
        assert!(state.controller.capture(&CaptureConfig::new(0), buffer).is_ok());
    }

    #[test]
    fn back_to_back_captures(state: &mut State) {
        let buffer = cortex_m::singleton!(: CaptureBuffer<512> = CaptureBuffer::new()).unwrap();
        let config = CaptureConfig::new(0);

        let (first, buffer) = state.controller.capture(&config, buffer).unwrap();
        let (second, _) = state.controller.capture(&config, buffer).unwrap();

        assert_eq!(first.samples, second.samples);
        assert_eq!(first.dma_channel, second.dma_channel);
    }
}
