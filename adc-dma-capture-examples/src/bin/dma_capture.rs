//! # ADC DMA Capture
//!
//! Captures 4000 samples of GPIO26 at 500 ksps through a DMA channel paced by
//! the ADC FIFO, then streams the raw 8-bit samples over UART0 three times,
//! each pass followed by its elapsed time.
//!
//! Progress is logged over RTT with defmt. After the capture the board keeps
//! logging a heartbeat every two seconds.
//!
//! It may need to be adapted to your particular board layout and/or pin assignment.

#![no_std]
#![no_main]

use defmt_rtt as _;
use panic_probe as _;

// Alias for our HAL crate
use rp2040_hal as hal;

use cortex_m::singleton;
use fugit::RateExtU32;
use hal::dma::DMAExt;
use hal::pac;
use hal::uart::{DataBits, StopBits, UartConfig};
use hal::Clock;

use adc_dma_capture::rp2040::{AdcSampler, Dma};
use adc_dma_capture::{
    CaptureBuffer, CaptureConfig, CaptureController, ClockDivider, OutputStreamer, StreamConfig,
};

/// The linker will place this boot block at the start of our program image. We
/// need this to help the ROM bootloader get our code up and running.
#[link_section = ".boot2"]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

/// External high-speed crystal on the Raspberry Pi Pico board is 12 MHz. Adjust
/// if your board has a different frequency
const XTAL_FREQ_HZ: u32 = 12_000_000u32;

const UART_BAUD_RATE: u32 = 115_200;

/// ADC input to sample; channel 0 is GPIO26.
const CAPTURE_CHANNEL: u8 = 0;

/// Samples per capture.
const CAPTURE_DEPTH: usize = 4000;

/// Free-running at 500 ksps.
const CLOCK_DIVIDER: ClockDivider = ClockDivider::FULL_SPEED;

/// Bytes per UART write.
const CHUNK_SIZE: usize = 4000;

/// How many times the capture is streamed.
const PASSES: u32 = 3;

/// Time for a host to open the serial port.
const ATTACH_DELAY_MS: u32 = 4000;

const ARM_DELAY_MS: u32 = 1000;

const HEARTBEAT_MS: u32 = 2000;

#[rp2040_hal::entry]
fn main() -> ! {
    let mut pac = pac::Peripherals::take().unwrap();
    let core = pac::CorePeripherals::take().unwrap();

    let mut watchdog = hal::Watchdog::new(pac.WATCHDOG);
    let clocks = hal::clocks::init_clocks_and_plls(
        XTAL_FREQ_HZ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .unwrap();

    let mut delay = cortex_m::delay::Delay::new(core.SYST, clocks.system_clock.freq().to_Hz());
    let timer = hal::Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);

    let sio = hal::Sio::new(pac.SIO);
    let pins = hal::gpio::Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );

    // UART TX on GPIO0, RX on GPIO1
    let uart_pins = (
        pins.gpio0.into_function::<hal::gpio::FunctionUart>(),
        pins.gpio1.into_function::<hal::gpio::FunctionUart>(),
    );
    let uart = hal::uart::UartPeripheral::new(pac.UART0, uart_pins, &mut pac.RESETS)
        .enable(
            UartConfig::new(UART_BAUD_RATE.Hz(), DataBits::Eight, None, StopBits::One),
            clocks.peripheral_clock.freq(),
        )
        .unwrap();

    // Hi-Z, no pulls, digital input buffer disabled
    let capture_pin =
        hal::adc::AdcPin::new(pins.gpio26.into_floating_input().into_dyn_pin()).unwrap();

    let adc = hal::Adc::new(pac.ADC, &mut pac.RESETS);
    let sampler = AdcSampler::new(adc).with_input(capture_pin);
    let dma = pac.DMA.split(&mut pac.RESETS);
    let mut controller = CaptureController::new(sampler, Dma::new(dma));

    let buffer = singleton!(: CaptureBuffer<CAPTURE_DEPTH> = CaptureBuffer::new()).unwrap();
    let config = CaptureConfig::new(CAPTURE_CHANNEL)
        .clock_divider(CLOCK_DIVIDER)
        .shift_8bit(true);

    delay.delay_ms(ATTACH_DELAY_MS);
    defmt::info!("Arming DMA");
    delay.delay_ms(ARM_DELAY_MS);

    let (report, buffer) = controller.capture(&config, buffer).unwrap();
    defmt::info!("Capture finished: {}", report);

    let stream_config = StreamConfig::new(CHUNK_SIZE)
        .passes(PASSES)
        .report_elapsed(true);
    let mut streamer = OutputStreamer::new(uart, stream_config);
    let result = streamer.measured_emit(buffer.as_slice(), &timer, |pass, timing| {
        defmt::info!("pass {} took {}", pass, timing.elapsed());
    });
    if result.is_err() {
        defmt::error!("streaming over UART failed");
    }

    loop {
        defmt::info!("heartbeat");
        delay.delay_ms(HEARTBEAT_MS);
    }
}

// End of file
