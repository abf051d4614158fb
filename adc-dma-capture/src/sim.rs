//! Software model of the RP2040 ADC and DMA blocks
//!
//! [`SimHardware`] steps both blocks one `clk_adc` cycle at a time. The model
//! covers what a capture depends on:
//!
//! * ADC: 96-cycle conversions, the clock divider (including its fraction),
//!   8-bit shift, a 4-entry FIFO with overrun flag, DREQ at threshold 1, and a
//!   conversion in flight finishing after `START_MANY` is cleared.
//! * DMA: 12 channels with a claim mask, unit size, read/write increment,
//!   DREQ pacing, transfer count, busy flag and abort.
//!
//! Hardware only advances while software polls it, i.e. every call to
//! [`TransferEngine::is_busy`] runs one cycle, as does waiting for the ADC to
//! become ready while draining. Everything the backends do is recorded as an
//! [`Event`] so tests can check ordering.
//!
//! Also provides a [`SimClock`] and a [`RecordingSink`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::mem;

use embedded_io::{ErrorKind, ErrorType, Write};

use crate::adc::{SampleSource, SourceTarget};
use crate::config::{CaptureConfig, ClockDivider, CONVERSION_CYCLES};
use crate::dma::{
    ChannelAllocator, ChannelPool, Claim, DataSize, TransferDescriptor, TransferEngine,
    CHANNEL_COUNT,
};
use crate::error::CaptureError;
use crate::timer::{Instant, Monotonic};

/// Address of `ADC.FIFO` on the RP2040.
pub const ADC_FIFO_ADDRESS: u32 = 0x4004_c00c;

/// DREQ number of the ADC FIFO.
pub const DREQ_ADC: u8 = 36;

/// Entries in the ADC FIFO.
pub const FIFO_DEPTH: usize = 4;

/// Input waveform: raw 12-bit value of the `n`th conversion.
pub type Signal = fn(u32) -> u16;

/// Ready-made input waveforms.
pub mod signals {
    /// Rises by one LSB per conversion and wraps at 4096.
    pub fn ramp(n: u32) -> u16 {
        (n % 4096) as u16
    }

    /// Constant half-scale input.
    pub fn midscale(_: u32) -> u16 {
        2048
    }
}

/// Something the simulated peripherals did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A DMA channel was claimed through [`SimDma`].
    ChannelAcquired(u8),
    /// The ADC was configured for a channel.
    SourceConfigured(u8),
    /// A DMA channel was loaded with a transfer of the given count.
    EngineConfigured(u8, u32),
    /// A DMA channel was armed.
    EngineStarted(u8),
    /// Free-running conversion started.
    SourceStarted,
    /// A DMA channel reached its transfer count.
    TransferComplete(u8),
    /// A DMA channel was aborted.
    EngineAborted(u8),
    /// Free-running conversion stopped.
    SourceStopped,
    /// The FIFO was drained of this many samples.
    SourceDrained(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdcPhase {
    Idle,
    // 1/256ths of a cycle since the current conversion started
    Active(u32),
}

struct AdcModel {
    signal: Signal,
    stalled: bool,
    configured: bool,
    channel: u8,
    divider: ClockDivider,
    shift: bool,
    dreq_enabled: bool,
    running: bool,
    phase: AdcPhase,
    fifo: VecDeque<u16>,
    over: bool,
    under: bool,
    conversions: u32,
}

const CONVERSION_END: u32 = CONVERSION_CYCLES * 256;

impl AdcModel {
    fn converting(&self) -> bool {
        matches!(self.phase, AdcPhase::Active(phase) if phase < CONVERSION_END)
    }

    // A stalled ADC never finishes its conversion, so there is nothing to
    // wait for.
    fn ready(&self) -> bool {
        self.stalled || !self.converting()
    }

    fn step(&mut self) {
        if self.stalled {
            return;
        }
        let phase = match self.phase {
            AdcPhase::Idle if self.running => 0,
            AdcPhase::Idle => return,
            AdcPhase::Active(phase) if !self.running && phase >= CONVERSION_END => {
                self.phase = AdcPhase::Idle;
                return;
            }
            AdcPhase::Active(phase) => phase,
        };

        let next = phase + 256;
        if phase < CONVERSION_END && next >= CONVERSION_END {
            self.convert();
        }

        let period = self.divider.period_fraction();
        self.phase = if next < period {
            AdcPhase::Active(next)
        } else if self.running {
            AdcPhase::Active(next - period)
        } else {
            AdcPhase::Idle
        };
    }

    fn convert(&mut self) {
        let raw = (self.signal)(self.conversions) & 0xfff;
        self.conversions += 1;
        let value = if self.shift { raw >> 4 } else { raw };
        if self.fifo.len() < FIFO_DEPTH {
            self.fifo.push_back(value);
        } else {
            self.over = true;
        }
    }

    fn dreq(&self) -> bool {
        self.dreq_enabled && !self.fifo.is_empty()
    }

    fn read_fifo(&mut self) -> u16 {
        self.fifo.pop_front().unwrap_or_else(|| {
            self.under = true;
            0
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct ChannelModel {
    data_size: DataSize,
    read_address: u32,
    incr_read: bool,
    write_address: *mut u8,
    incr_write: bool,
    count: u32,
    treq: u8,
    busy: bool,
}

impl ChannelModel {
    const IDLE: ChannelModel = ChannelModel {
        data_size: DataSize::Byte,
        read_address: 0,
        incr_read: false,
        write_address: core::ptr::null_mut(),
        incr_write: false,
        count: 0,
        treq: crate::dma::TREQ_UNPACED,
        busy: false,
    };
}

/// Simulated ADC and DMA blocks sharing one clock.
pub struct SimHardware {
    adc: RefCell<AdcModel>,
    channels: RefCell<[ChannelModel; CHANNEL_COUNT as usize]>,
    pool: ChannelPool,
    events: RefCell<Vec<Event>>,
    cycles: Cell<u64>,
}

impl SimHardware {
    /// Idle hardware with `signal` on every ADC input.
    pub fn new(signal: Signal) -> Self {
        SimHardware {
            adc: RefCell::new(AdcModel {
                signal,
                stalled: false,
                configured: false,
                channel: 0,
                divider: ClockDivider::FULL_SPEED,
                shift: false,
                dreq_enabled: false,
                running: false,
                phase: AdcPhase::Idle,
                fifo: VecDeque::with_capacity(FIFO_DEPTH),
                over: false,
                under: false,
                conversions: 0,
            }),
            channels: RefCell::new([ChannelModel::IDLE; CHANNEL_COUNT as usize]),
            pool: ChannelPool::new(CHANNEL_COUNT),
            events: RefCell::new(Vec::new()),
            cycles: Cell::new(0),
        }
    }

    /// Handle implementing [`SampleSource`].
    pub fn adc(&self) -> SimAdc<'_> {
        SimAdc { hw: self }
    }

    /// Handle implementing [`ChannelAllocator`].
    pub fn dma(&self) -> SimDma<'_> {
        SimDma { hw: self }
    }

    /// Claim bookkeeping of the DMA channels.
    pub fn pool(&self) -> &ChannelPool {
        &self.pool
    }

    /// Make the analog input dead: conversions never complete.
    pub fn set_stalled(&self, stalled: bool) {
        self.adc.borrow_mut().stalled = stalled;
    }

    /// Advance both blocks by one `clk_adc` cycle.
    pub fn step(&self) {
        let mut adc = self.adc.borrow_mut();
        adc.step();

        let mut channels = self.channels.borrow_mut();
        for (id, ch) in channels.iter_mut().enumerate() {
            if !ch.busy {
                continue;
            }
            let paced_by_adc = ch.treq == DREQ_ADC;
            if paced_by_adc && !adc.dreq() {
                continue;
            }

            let value = if ch.read_address == ADC_FIFO_ADDRESS {
                adc.read_fifo()
            } else {
                0
            };
            // Safety: whoever configured the channel keeps the destination
            // alive and untouched until it is done or aborted.
            unsafe {
                match ch.data_size {
                    DataSize::Byte => ch.write_address.write_volatile(value as u8),
                    DataSize::HalfWord => ch.write_address.cast::<u16>().write_unaligned(value),
                    DataSize::Word => ch
                        .write_address
                        .cast::<u32>()
                        .write_unaligned(u32::from(value)),
                }
                if ch.incr_write {
                    ch.write_address = ch.write_address.add(ch.data_size.bytes());
                }
            }
            if ch.incr_read {
                ch.read_address += ch.data_size.bytes() as u32;
            }

            ch.count -= 1;
            if ch.count == 0 {
                ch.busy = false;
                self.events
                    .borrow_mut()
                    .push(Event::TransferComplete(id as u8));
            }
        }

        self.cycles.set(self.cycles.get() + 1);
    }

    /// Advance by `cycles` cycles.
    pub fn run(&self, cycles: u64) {
        for _ in 0..cycles {
            self.step();
        }
    }

    /// Cycles simulated so far.
    pub fn cycles(&self) -> u64 {
        self.cycles.get()
    }

    /// Everything that happened so far, in order.
    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// Conversions completed so far.
    pub fn conversions(&self) -> u32 {
        self.adc.borrow().conversions
    }

    /// Samples waiting in the FIFO.
    pub fn fifo_level(&self) -> usize {
        self.adc.borrow().fifo.len()
    }

    /// Whether free-running conversion is enabled.
    pub fn is_converting(&self) -> bool {
        self.adc.borrow().running
    }

    /// Whether the ADC has been configured at least once.
    pub fn is_source_configured(&self) -> bool {
        self.adc.borrow().configured
    }

    /// ADC input selected by the last configuration.
    pub fn selected_channel(&self) -> u8 {
        self.adc.borrow().channel
    }

    /// Whether the FIFO was read while empty.
    pub fn underflowed(&self) -> bool {
        self.adc.borrow().under
    }

    fn record(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }
}

/// [`SampleSource`] handle to the simulated ADC.
pub struct SimAdc<'h> {
    hw: &'h SimHardware,
}

impl SampleSource for SimAdc<'_> {
    fn configure(&mut self, config: &CaptureConfig) -> Result<(), CaptureError> {
        if !self.supports_channel(config.channel()) {
            return Err(CaptureError::InvalidChannel(config.channel()));
        }
        let mut adc = self.hw.adc.borrow_mut();
        debug_assert!(!adc.running, "ADC reconfigured while converting");
        adc.configured = true;
        adc.channel = config.channel();
        adc.divider = config.divider();
        adc.shift = config.is_shifted();
        adc.dreq_enabled = true;
        drop(adc);
        self.hw.record(Event::SourceConfigured(config.channel()));
        Ok(())
    }

    fn read_target(&self) -> SourceTarget {
        SourceTarget {
            address: ADC_FIFO_ADDRESS,
            treq: DREQ_ADC,
        }
    }

    fn start(&mut self) {
        self.hw.adc.borrow_mut().running = true;
        self.hw.record(Event::SourceStarted);
    }

    fn stop(&mut self) {
        self.hw.adc.borrow_mut().running = false;
        self.hw.record(Event::SourceStopped);
    }

    fn drain_stale_samples(&mut self) -> usize {
        while !self.hw.adc.borrow().ready() {
            self.hw.step();
        }
        let mut adc = self.hw.adc.borrow_mut();
        let drained = adc.fifo.len();
        adc.fifo.clear();
        drop(adc);
        self.hw.record(Event::SourceDrained(drained));
        drained
    }

    fn take_overrun(&mut self) -> bool {
        mem::take(&mut self.hw.adc.borrow_mut().over)
    }
}

/// [`ChannelAllocator`] handle to the simulated DMA block.
pub struct SimDma<'h> {
    hw: &'h SimHardware,
}

impl<'h> ChannelAllocator for SimDma<'h> {
    type Engine<'a> = SimChannel<'a> where Self: 'a;

    fn acquire_channel(&self) -> Result<SimChannel<'_>, CaptureError> {
        let claim = self.hw.pool.claim_unused()?;
        self.hw.record(Event::ChannelAcquired(claim.id()));
        Ok(SimChannel { hw: self.hw, claim })
    }
}

/// A claimed channel of the simulated DMA block.
pub struct SimChannel<'h> {
    hw: &'h SimHardware,
    claim: Claim<'h>,
}

impl SimChannel<'_> {
    fn with_model<R>(&self, f: impl FnOnce(&mut ChannelModel) -> R) -> R {
        f(&mut self.hw.channels.borrow_mut()[self.claim.id() as usize])
    }
}

impl TransferEngine for SimChannel<'_> {
    fn id(&self) -> u8 {
        self.claim.id()
    }

    unsafe fn configure(&mut self, descriptor: &TransferDescriptor) {
        self.with_model(|ch| {
            *ch = ChannelModel {
                data_size: descriptor.data_size(),
                read_address: descriptor.read_address(),
                incr_read: descriptor.incr_read(),
                write_address: descriptor.write_address(),
                incr_write: descriptor.incr_write(),
                count: descriptor.transfer_count(),
                treq: descriptor.treq(),
                busy: false,
            }
        });
        self.hw.record(Event::EngineConfigured(
            self.id(),
            descriptor.transfer_count(),
        ));
    }

    fn start(&mut self) {
        self.with_model(|ch| ch.busy = ch.count > 0);
        self.hw.record(Event::EngineStarted(self.id()));
    }

    fn is_busy(&self) -> bool {
        self.hw.step();
        self.with_model(|ch| ch.busy)
    }

    fn remaining(&self) -> u32 {
        self.with_model(|ch| ch.count)
    }

    fn abort(&mut self) {
        self.with_model(|ch| ch.busy = false);
        self.hw.record(Event::EngineAborted(self.id()));
    }
}

/// Microsecond clock that moves forward by a fixed step on every read.
pub struct SimClock {
    ticks: Cell<u64>,
    step: u64,
}

impl SimClock {
    /// Clock starting at 0, advancing 1us per read.
    pub fn new() -> Self {
        Self::with_step(1)
    }

    /// Clock starting at 0, advancing `step` microseconds per read.
    pub fn with_step(step: u64) -> Self {
        SimClock {
            ticks: Cell::new(0),
            step,
        }
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Monotonic for SimClock {
    fn now(&self) -> Instant {
        let now = self.ticks.get();
        self.ticks.set(now + self.step);
        Instant::from_ticks(now)
    }
}

/// Sink that keeps everything written to it, and how it was written.
#[derive(Debug, Default)]
pub struct RecordingSink {
    data: Vec<u8>,
    writes: Vec<usize>,
    flushes: usize,
    limit: Option<usize>,
}

impl RecordingSink {
    /// Sink accepting any amount of data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that fails with [`ErrorKind::BrokenPipe`] once `limit` bytes were written.
    pub fn failing_after(limit: usize) -> Self {
        RecordingSink {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Bytes written so far.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Length of every accepted write call.
    pub fn writes(&self) -> &[usize] {
        &self.writes
    }

    /// Number of flushes.
    pub fn flushes(&self) -> usize {
        self.flushes
    }
}

impl ErrorType for RecordingSink {
    type Error = ErrorKind;
}

impl Write for RecordingSink {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let accepted = match self.limit {
            Some(limit) if self.data.len() >= limit => return Err(ErrorKind::BrokenPipe),
            Some(limit) => buf.len().min(limit - self.data.len()),
            None => buf.len(),
        };
        self.data.extend_from_slice(&buf[..accepted]);
        self.writes.push(accepted);
        Ok(accepted)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.flushes += 1;
        Ok(())
    }
}
