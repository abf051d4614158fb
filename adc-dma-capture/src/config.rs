//! Capture and streaming configuration
//!
//! Everything here is plain data, fixed before a session starts. Builders are
//! `const fn` so configurations can live in `const` items in firmware.

/// ADC input wired to the on-die temperature sensor.
pub const TEMPERATURE_SENSOR_CHANNEL: u8 = 4;

/// Number of ADC inputs (GPIO26..=GPIO29 plus the temperature sensor).
pub const ADC_CHANNELS: u8 = 5;

/// Frequency of the ADC clock (`clk_adc`), fixed at 48MHz by the USB PLL.
pub const ADC_CLOCK_HZ: u32 = 48_000_000;

/// Cycles of `clk_adc` a single conversion takes.
pub const CONVERSION_CYCLES: u32 = 96;

/// Sample rate with the divider at zero.
pub const MAX_SAMPLE_RATE: u32 = ADC_CLOCK_HZ / CONVERSION_CYCLES;

/// ADC clock divider, controlling the free-running sample rate.
///
/// Free-running conversion with a divider is equivalent to pressing
/// `START_ONCE` once every `1 + int + frac / 256` cycles of the 48MHz ADC clock:
///
/// ```text
///  rate = 48MHz / (1 + int + (frac / 256))
/// ```
///
/// Each conversion takes 96 cycles, so any `int` up to 95 gives the same
/// 500ksps as a divider of 0.
///
/// | Target rate | `int`   | `frac` |
/// |-------------|---------|--------|
/// | 1000sps     | `47999` |    `0` |
/// | 1337sps     | `35900` |   `70` |
/// | 96ksps      |   `499` |    `0` |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockDivider {
    /// Integral part.
    pub int: u16,
    /// Fractional part, in 1/256ths.
    pub frac: u8,
}

impl ClockDivider {
    /// Divider of 0: convert back to back at 500ksps.
    pub const FULL_SPEED: ClockDivider = ClockDivider::new(0, 0);

    /// Create a divider from its raw register parts.
    pub const fn new(int: u16, frac: u8) -> Self {
        ClockDivider { int, frac }
    }

    /// Closest divider for the requested rate, in samples per second.
    ///
    /// Rates at or above 500ksps give [`ClockDivider::FULL_SPEED`], rates below
    /// the slowest attainable one (~732sps) saturate at `int = 0xFFFF, frac = 0xFF`.
    pub const fn from_sample_rate(rate: u32) -> Self {
        if rate >= MAX_SAMPLE_RATE {
            return ClockDivider::FULL_SPEED;
        }
        if rate == 0 {
            return ClockDivider::new(u16::MAX, u8::MAX);
        }
        // Period in 1/256ths of a cycle, rounded to nearest, minus the implicit 1.
        let period = (ADC_CLOCK_HZ as u64 * 256 + rate as u64 / 2) / rate as u64 - 256;
        let int = period / 256;
        if int > u16::MAX as u64 {
            return ClockDivider::new(u16::MAX, u8::MAX);
        }
        ClockDivider::new(int as u16, (period % 256) as u8)
    }

    /// Cycles between two conversion starts, in 1/256ths of an ADC clock cycle.
    pub const fn period_fraction(&self) -> u32 {
        let period = 256 + ((self.int as u32) << 8) + self.frac as u32;
        if period < CONVERSION_CYCLES * 256 {
            CONVERSION_CYCLES * 256
        } else {
            period
        }
    }

    /// Effective sample rate, in samples per second (rounded down).
    pub const fn sample_rate(&self) -> u32 {
        ((ADC_CLOCK_HZ as u64 * 256) / self.period_fraction() as u64) as u32
    }
}

impl Default for ClockDivider {
    fn default() -> Self {
        ClockDivider::FULL_SPEED
    }
}

/// Configuration of a single capture session.
///
/// ```
/// use adc_dma_capture::{CaptureConfig, ClockDivider};
///
/// const CAPTURE: CaptureConfig = CaptureConfig::new(0)
///     .clock_divider(ClockDivider::FULL_SPEED)
///     .shift_8bit(true);
/// assert_eq!(CAPTURE.channel(), 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CaptureConfig {
    channel: u8,
    clock_divider: ClockDivider,
    shift_8bit: bool,
}

impl CaptureConfig {
    /// Capture from `channel` at full speed, narrowing samples to 8 bits.
    ///
    /// The channel number is checked against the sample source when the
    /// session is configured, see [`CaptureError::InvalidChannel`](crate::CaptureError::InvalidChannel).
    pub const fn new(channel: u8) -> Self {
        CaptureConfig {
            channel,
            clock_divider: ClockDivider::FULL_SPEED,
            shift_8bit: true,
        }
    }

    /// Set the sample rate divider.
    pub const fn clock_divider(mut self, clock_divider: ClockDivider) -> Self {
        self.clock_divider = clock_divider;
        self
    }

    /// Shift each sample right by 4 when it is pushed to the FIFO.
    ///
    /// The transfer unit is always one byte. With shifting disabled each byte
    /// holds the low 8 bits of the 12-bit conversion.
    pub const fn shift_8bit(mut self, shift: bool) -> Self {
        self.shift_8bit = shift;
        self
    }

    /// ADC input to sample.
    pub const fn channel(&self) -> u8 {
        self.channel
    }

    /// Configured divider.
    pub const fn divider(&self) -> ClockDivider {
        self.clock_divider
    }

    /// Whether samples are narrowed to 8 bits.
    pub const fn is_shifted(&self) -> bool {
        self.shift_8bit
    }
}

/// Configuration for [`OutputStreamer`](crate::OutputStreamer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamConfig {
    chunk_size: usize,
    passes: u32,
    report_elapsed: bool,
}

impl StreamConfig {
    /// Emit in chunks of `chunk_size` bytes, once, without trailer.
    pub const fn new(chunk_size: usize) -> Self {
        StreamConfig {
            chunk_size,
            passes: 1,
            report_elapsed: false,
        }
    }

    /// Number of passes for [`OutputStreamer::measured_emit`](crate::OutputStreamer::measured_emit).
    pub const fn passes(mut self, passes: u32) -> Self {
        self.passes = passes;
        self
    }

    /// Write `"\nElapsed time: <n> us\n"` to the sink after every measured pass.
    ///
    /// This breaks the raw `N`-bytes-per-pass framing, so it is off by default.
    pub const fn report_elapsed(mut self, report: bool) -> Self {
        self.report_elapsed = report;
        self
    }

    /// Bytes per write.
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of measured passes.
    pub const fn pass_count(&self) -> u32 {
        self.passes
    }

    /// Whether measured passes append a timing trailer.
    pub const fn reports_elapsed(&self) -> bool {
        self.report_elapsed
    }
}
