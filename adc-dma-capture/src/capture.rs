//! Capture lifecycle
//!
//! ```text
//! Idle → Configured → Armed → Capturing → Complete → Draining → Idle
//! ```
//!
//! Every state is its own type, and each transition consumes the previous one,
//! so the two ordering rules cannot be broken:
//!
//! * the source is only started once the engine is armed ([`Armed::start`]),
//!   so no sample is produced without a reader waiting for it;
//! * the source is only stopped once the engine reported completion
//!   ([`Complete::finish`]), so the capture is never truncated.
//!
//! The session takes the buffer by value in
//! [`CaptureController::configure`] and hands it back from
//! [`Complete::finish`], or inside a [`CaptureFailure`]. The buffer must be
//! `'static`, so even a session that is leaked with `mem::forget` leaves
//! nothing behind that could read or free the memory the engine writes to.
//!
//! Dropping a session early (for example on `?`) aborts an armed engine first,
//! then stops the source and drains its FIFO, then drops the buffer.

use core::sync::atomic::{compiler_fence, Ordering};

use embedded_dma::WriteBuffer;

use crate::adc::SampleSource;
use crate::config::CaptureConfig;
use crate::dma::{ChannelAllocator, TransferDescriptor, TransferEngine};
use crate::error::{CaptureError, CaptureFailure};
use crate::timer::{Duration, Monotonic};

/// Lifecycle state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CaptureState {
    /// No session.
    Idle,
    /// Source configured, channel claimed and loaded, nothing running.
    Configured,
    /// Engine waiting for the first DREQ; source not started.
    Armed,
    /// Source converting, engine moving samples.
    Capturing,
    /// Engine reached its transfer count; source still converting.
    Complete,
    /// Source stopped, stale FIFO entries being discarded.
    Draining,
}

/// Summary of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CaptureReport {
    /// ADC input that was sampled.
    pub channel: u8,
    /// DMA channel that moved the samples.
    pub dma_channel: u8,
    /// Samples written into the buffer; always the buffer capacity.
    pub samples: usize,
    /// FIFO entries discarded after the source was stopped.
    pub stale_samples: usize,
    /// Whether the FIFO overflowed during the session.
    pub overrun: bool,
}

/// Runs capture sessions on one sample source, with channels from one allocator.
pub struct CaptureController<S, A> {
    source: S,
    allocator: A,
}

impl<S, A> CaptureController<S, A>
where
    S: SampleSource,
    A: ChannelAllocator,
{
    /// Take ownership of a sample source and a DMA channel allocator.
    pub fn new(source: S, allocator: A) -> Self {
        CaptureController { source, allocator }
    }

    /// Release the source and the allocator.
    pub fn free(self) -> (S, A) {
        (self.source, self.allocator)
    }

    /// The sample source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The channel allocator.
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// `Idle → Configured`: validate, claim a channel, set up source and engine.
    ///
    /// Nothing is started. On error no register has been written, no channel
    /// stays claimed and the buffer is handed back.
    pub fn configure<'c, B>(
        &'c mut self,
        config: &CaptureConfig,
        mut buffer: B,
    ) -> Result<Configured<'c, S, A::Engine<'c>, B>, CaptureFailure<B>>
    where
        B: WriteBuffer<Word = u8> + 'static,
    {
        let CaptureController { source, allocator } = self;
        let allocator: &'c A = allocator;

        let mut engine = match prepare(source, allocator, config) {
            Ok(engine) => engine,
            Err(error) => return Err(CaptureFailure { error, buffer }),
        };

        // Safety: the session owns `buffer` from here on and only gives it
        // back once the engine is done or aborted. `B: 'static` keeps the
        // memory alive even if the session is leaked.
        let descriptor = unsafe {
            let descriptor =
                TransferDescriptor::peripheral_to_buffer(source.read_target(), &mut buffer);
            engine.configure(&descriptor);
            descriptor
        };
        debug!(
            "configured ADC channel {} with DMA channel {}, {} samples",
            config.channel(),
            engine.id(),
            descriptor.transfer_count()
        );

        Ok(Configured {
            session: Session {
                source,
                engine,
                channel: config.channel(),
                transfer_count: descriptor.transfer_count(),
                state: CaptureState::Configured,
            },
            buffer,
        })
    }

    /// Run a whole session, blocking until the buffer is full.
    ///
    /// Returns the report together with the buffer. Blocks forever if the
    /// source never produces samples; see
    /// [`CaptureController::capture_with_timeout`].
    pub fn capture<B>(
        &mut self,
        config: &CaptureConfig,
        buffer: B,
    ) -> Result<(CaptureReport, B), CaptureFailure<B>>
    where
        B: WriteBuffer<Word = u8> + 'static,
    {
        let capturing = self.configure(config, buffer)?.arm().start();
        Ok(capturing.wait().finish())
    }

    /// Run a whole session, giving up after `timeout`.
    ///
    /// On timeout the engine is aborted, the source stopped and drained, and
    /// [`CaptureError::TransferStall`] returned along with the buffer.
    pub fn capture_with_timeout<B, T>(
        &mut self,
        config: &CaptureConfig,
        buffer: B,
        timer: &T,
        timeout: Duration,
    ) -> Result<(CaptureReport, B), CaptureFailure<B>>
    where
        B: WriteBuffer<Word = u8> + 'static,
        T: Monotonic,
    {
        let capturing = self.configure(config, buffer)?.arm().start();
        Ok(capturing.wait_timeout(timer, timeout)?.finish())
    }
}

/// Checks and claims that must succeed before anything is written.
fn prepare<'c, S, A>(
    source: &mut S,
    allocator: &'c A,
    config: &CaptureConfig,
) -> Result<A::Engine<'c>, CaptureError>
where
    S: SampleSource,
    A: ChannelAllocator,
{
    if !source.supports_channel(config.channel()) {
        warn!("ADC channel {} is not available", config.channel());
        return Err(CaptureError::InvalidChannel(config.channel()));
    }

    let engine = allocator.acquire_channel().map_err(|e| {
        warn!("no DMA channel available");
        e
    })?;
    source.configure(config)?;
    Ok(engine)
}

/// Source and engine of a running session.
///
/// Dropping it tears down whatever the current state left running.
struct Session<'c, S: SampleSource, E: TransferEngine> {
    source: &'c mut S,
    engine: E,
    channel: u8,
    transfer_count: u32,
    state: CaptureState,
}

impl<S: SampleSource, E: TransferEngine> Session<'_, S, E> {
    fn transition(&mut self, state: CaptureState) {
        trace!("capture state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn stop_and_drain(&mut self) -> usize {
        self.source.stop();
        self.transition(CaptureState::Draining);
        let stale = self.source.drain_stale_samples();
        self.transition(CaptureState::Idle);
        stale
    }

    fn tear_down(&mut self) {
        match self.state {
            CaptureState::Armed | CaptureState::Capturing => {
                warn!(
                    "capture abandoned with {} samples outstanding, aborting DMA channel {}",
                    self.engine.remaining(),
                    self.engine.id()
                );
                self.engine.abort();
                compiler_fence(Ordering::SeqCst);
                self.stop_and_drain();
            }
            CaptureState::Complete | CaptureState::Draining => {
                self.stop_and_drain();
            }
            CaptureState::Idle | CaptureState::Configured => {}
        }
    }
}

impl<S: SampleSource, E: TransferEngine> Drop for Session<'_, S, E> {
    fn drop(&mut self) {
        self.tear_down();
    }
}

// In every stage `session` is declared before `buffer`, so dropping a stage
// stops the engine before the buffer goes.

/// Source and engine configured; nothing running.
pub struct Configured<'c, S: SampleSource, E: TransferEngine, B> {
    session: Session<'c, S, E>,
    buffer: B,
}

impl<'c, S: SampleSource, E: TransferEngine, B> Configured<'c, S, E, B> {
    /// `Configured → Armed`: start the engine. It waits for DREQ; since the
    /// source is not running yet, no data moves.
    pub fn arm(mut self) -> Armed<'c, S, E, B> {
        self.session.engine.start();
        self.session.transition(CaptureState::Armed);
        info!("armed DMA channel {}", self.session.engine.id());
        Armed {
            session: self.session,
            buffer: self.buffer,
        }
    }

    /// Current state.
    pub fn state(&self) -> CaptureState {
        self.session.state
    }
}

/// Engine armed and waiting for the source.
pub struct Armed<'c, S: SampleSource, E: TransferEngine, B> {
    session: Session<'c, S, E>,
    buffer: B,
}

impl<'c, S: SampleSource, E: TransferEngine, B> Armed<'c, S, E, B> {
    /// `Armed → Capturing`: start free-running conversion.
    pub fn start(mut self) -> Capturing<'c, S, E, B> {
        self.session.source.start();
        self.session.transition(CaptureState::Capturing);
        info!("started capture on ADC channel {}", self.session.channel);
        Capturing {
            session: self.session,
            buffer: self.buffer,
        }
    }

    /// Current state.
    pub fn state(&self) -> CaptureState {
        self.session.state
    }
}

/// Source running, engine moving samples into the buffer.
pub struct Capturing<'c, S: SampleSource, E: TransferEngine, B> {
    session: Session<'c, S, E>,
    buffer: B,
}

impl<'c, S: SampleSource, E: TransferEngine, B> Capturing<'c, S, E, B> {
    /// Check if the engine has moved the full transfer count.
    pub fn is_done(&self) -> bool {
        !self.session.engine.is_busy()
    }

    /// Samples still to be transferred.
    pub fn remaining(&self) -> u32 {
        self.session.engine.remaining()
    }

    /// `Capturing → Complete`: block until the engine is done.
    ///
    /// No timeout: a source that never produces data blocks here forever.
    pub fn wait(mut self) -> Complete<'c, S, E, B> {
        self.session.engine.wait_for_completion();
        self.complete()
    }

    /// `Capturing → Complete`, giving up once `timeout` has elapsed.
    ///
    /// On expiry the session is torn down (engine aborted, source stopped and
    /// drained) and [`CaptureError::TransferStall`] is returned with the
    /// buffer.
    pub fn wait_timeout<T: Monotonic>(
        self,
        timer: &T,
        timeout: Duration,
    ) -> Result<Complete<'c, S, E, B>, CaptureFailure<B>> {
        let deadline = timer.now() + timeout;
        while self.session.engine.is_busy() {
            if timer.now() >= deadline {
                let Capturing {
                    mut session,
                    buffer,
                } = self;
                let remaining = session.engine.remaining();
                warn!(
                    "capture stalled with {} of {} samples remaining",
                    remaining, session.transfer_count
                );
                session.tear_down();
                return Err(CaptureFailure {
                    error: CaptureError::TransferStall { remaining },
                    buffer,
                });
            }
            core::hint::spin_loop();
        }

        // Make sure that buffer reads happen after the final DMA write.
        compiler_fence(Ordering::SeqCst);
        Ok(self.complete())
    }

    /// Current state.
    pub fn state(&self) -> CaptureState {
        self.session.state
    }

    fn complete(mut self) -> Complete<'c, S, E, B> {
        debug_assert_eq!(self.session.engine.remaining(), 0);
        self.session.transition(CaptureState::Complete);
        info!("capture finished, {} samples", self.session.transfer_count);
        Complete {
            session: self.session,
            buffer: self.buffer,
        }
    }
}

/// Buffer full; the source is still converting into its FIFO.
pub struct Complete<'c, S: SampleSource, E: TransferEngine, B> {
    session: Session<'c, S, E>,
    buffer: B,
}

impl<S: SampleSource, E: TransferEngine, B> Complete<'_, S, E, B> {
    /// `Complete → Draining → Idle`: stop the source, discard stale FIFO
    /// entries, release the channel and hand the buffer back.
    pub fn finish(self) -> (CaptureReport, B) {
        let Complete {
            mut session,
            buffer,
        } = self;
        let stale_samples = session.stop_and_drain();
        let overrun = session.source.take_overrun();
        if overrun {
            warn!("ADC FIFO overflowed during capture");
        }
        debug!("discarded {} stale samples", stale_samples);

        let report = CaptureReport {
            channel: session.channel,
            dma_channel: session.engine.id(),
            samples: session.transfer_count as usize,
            stale_samples,
            overrun,
        };
        (report, buffer)
    }

    /// Current state.
    pub fn state(&self) -> CaptureState {
        self.session.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::CaptureBuffer;
    use crate::config::{ClockDivider, StreamConfig, TEMPERATURE_SENSOR_CHANNEL};
    use crate::sim::{signals, Event, RecordingSink, SimClock, SimHardware};
    use crate::stream::OutputStreamer;

    fn static_buffer<const N: usize>() -> &'static mut CaptureBuffer<N> {
        Box::leak(Box::new(CaptureBuffer::new()))
    }

    #[test]
    fn capture_fills_the_buffer_in_order() {
        let hw = SimHardware::new(signals::ramp);
        let mut controller = CaptureController::new(hw.adc(), hw.dma());

        let (report, buffer) = controller
            .capture(&CaptureConfig::new(0), static_buffer::<64>())
            .unwrap();

        assert_eq!(
            report,
            CaptureReport {
                channel: 0,
                dma_channel: 0,
                samples: 64,
                stale_samples: 1,
                overrun: false,
            }
        );
        for (i, &byte) in buffer.iter().enumerate() {
            assert_eq!(byte, (i >> 4) as u8, "sample {}", i);
        }
    }

    #[test]
    fn engine_is_armed_before_source_starts_and_done_before_it_stops() {
        let hw = SimHardware::new(signals::ramp);
        let mut controller = CaptureController::new(hw.adc(), hw.dma());

        controller
            .capture(&CaptureConfig::new(2), static_buffer::<16>())
            .unwrap();

        assert_eq!(
            hw.events(),
            [
                Event::ChannelAcquired(0),
                Event::SourceConfigured(2),
                Event::EngineConfigured(0, 16),
                Event::EngineStarted(0),
                Event::SourceStarted,
                Event::TransferComplete(0),
                Event::SourceStopped,
                Event::SourceDrained(1),
            ]
        );
        assert_eq!(hw.pool().claimed_count(), 0);
        assert!(!hw.is_converting());
    }

    #[test]
    fn full_width_samples_keep_the_low_byte() {
        let hw = SimHardware::new(signals::ramp);
        let mut controller = CaptureController::new(hw.adc(), hw.dma());

        let config = CaptureConfig::new(0).shift_8bit(false);
        let (_, buffer) = controller.capture(&config, static_buffer::<300>()).unwrap();

        for (i, &byte) in buffer.iter().enumerate() {
            assert_eq!(byte, i as u8);
        }
    }

    #[test]
    fn slow_source_is_waited_for() {
        let hw = SimHardware::new(signals::ramp);
        let mut controller = CaptureController::new(hw.adc(), hw.dma());
        let buffer = static_buffer::<16>();
        buffer.fill(0xff);

        let config = CaptureConfig::new(0)
            .clock_divider(ClockDivider::new(959, 0))
            .shift_8bit(false);
        let capturing = controller.configure(&config, buffer).unwrap().arm().start();
        assert_eq!(capturing.state(), CaptureState::Capturing);
        assert!(!capturing.is_done());
        assert_eq!(capturing.remaining(), 16);

        let complete = capturing.wait();
        assert_eq!(complete.state(), CaptureState::Complete);
        let (report, buffer) = complete.finish();

        assert_eq!(report.samples, 16);
        // 96 cycles to the first sample, then one every 960
        assert!(hw.cycles() >= 96 + 15 * 960);
        assert_eq!(buffer.as_slice(), &core::array::from_fn::<u8, 16, _>(|i| i as u8));
    }

    #[test]
    fn repeated_captures_have_the_same_length() {
        let hw = SimHardware::new(signals::midscale);
        let mut controller = CaptureController::new(hw.adc(), hw.dma());
        let config = CaptureConfig::new(1);

        let (a, first) = controller.capture(&config, static_buffer::<128>()).unwrap();
        let (b, second) = controller.capture(&config, static_buffer::<128>()).unwrap();

        assert_eq!(a.samples, b.samples);
        assert_eq!(a.dma_channel, b.dma_channel);
        assert_eq!(first.as_slice(), second.as_slice());
        assert!(first.iter().all(|&b| b == 0x80));
    }

    #[test]
    fn the_same_buffer_can_be_captured_into_again() {
        let hw = SimHardware::new(signals::ramp);
        let mut controller = CaptureController::new(hw.adc(), hw.dma());
        let config = CaptureConfig::new(0).shift_8bit(false);

        let (_, buffer) = controller.capture(&config, static_buffer::<8>()).unwrap();
        let base = buffer.as_slice().as_ptr();
        assert_eq!(buffer.as_slice(), &[0, 1, 2, 3, 4, 5, 6, 7]);

        let (_, buffer) = controller.capture(&config, buffer).unwrap();
        assert_eq!(buffer.as_slice().as_ptr(), base);
        assert!(buffer.iter().all(|&b| b >= 8));
    }

    #[test]
    fn invalid_channel_touches_nothing() {
        let hw = SimHardware::new(signals::ramp);
        let mut controller = CaptureController::new(hw.adc(), hw.dma());
        let buffer = static_buffer::<16>();
        buffer.fill(0x5a);

        let failure = controller
            .capture(&CaptureConfig::new(5), buffer)
            .unwrap_err();

        assert_eq!(failure.error, CaptureError::InvalidChannel(5));
        assert!(failure.buffer.iter().all(|&b| b == 0x5a));
        assert!(hw.events().is_empty());
        assert_eq!(hw.pool().claimed_count(), 0);
    }

    #[test]
    fn exhausted_channels_leave_the_source_alone() {
        let hw = SimHardware::new(signals::ramp);
        let claims: Vec<_> = (0..12).map(|_| hw.pool().claim_unused().unwrap()).collect();
        let mut controller = CaptureController::new(hw.adc(), hw.dma());

        let failure = controller
            .capture(&CaptureConfig::new(0), static_buffer::<16>())
            .unwrap_err();

        assert_eq!(failure.error, CaptureError::ResourceExhausted);
        assert!(!hw.is_source_configured());
        assert!(hw.events().is_empty());

        drop(claims);
        assert!(controller
            .capture(&CaptureConfig::new(0), failure.buffer)
            .is_ok());
    }

    #[test]
    fn stalled_source_times_out_and_tears_down() {
        let hw = SimHardware::new(signals::ramp);
        hw.set_stalled(true);
        let mut controller = CaptureController::new(hw.adc(), hw.dma());
        let clock = SimClock::new();

        let failure = controller
            .capture_with_timeout(
                &CaptureConfig::new(0),
                static_buffer::<32>(),
                &clock,
                Duration::micros(100),
            )
            .unwrap_err();

        assert_eq!(failure.error, CaptureError::TransferStall { remaining: 32 });
        assert_eq!(failure.buffer.capacity(), 32);
        let events = hw.events();
        assert_eq!(
            events[events.len() - 3..],
            [
                Event::EngineAborted(0),
                Event::SourceStopped,
                Event::SourceDrained(0),
            ]
        );
        assert_eq!(hw.pool().claimed_count(), 0);
        assert!(!hw.is_converting());
    }

    #[test]
    fn timeout_is_not_hit_by_a_live_source() {
        let hw = SimHardware::new(signals::ramp);
        let mut controller = CaptureController::new(hw.adc(), hw.dma());
        let clock = SimClock::new();

        let (report, _) = controller
            .capture_with_timeout(
                &CaptureConfig::new(0),
                static_buffer::<32>(),
                &clock,
                Duration::millis(100),
            )
            .unwrap();
        assert_eq!(report.samples, 32);
    }

    #[test]
    fn dropping_an_armed_session_aborts_the_engine() {
        let hw = SimHardware::new(signals::ramp);
        let mut controller = CaptureController::new(hw.adc(), hw.dma());

        let armed = controller
            .configure(&CaptureConfig::new(0), static_buffer::<16>())
            .unwrap()
            .arm();
        assert_eq!(armed.state(), CaptureState::Armed);
        drop(armed);

        let events = hw.events();
        assert!(!events.contains(&Event::SourceStarted));
        assert_eq!(
            events[events.len() - 3..],
            [
                Event::EngineAborted(0),
                Event::SourceStopped,
                Event::SourceDrained(0),
            ]
        );
        assert_eq!(hw.pool().claimed_count(), 0);
    }

    #[test]
    fn dropping_a_configured_session_releases_the_channel() {
        let hw = SimHardware::new(signals::ramp);
        let mut controller = CaptureController::new(hw.adc(), hw.dma());

        let configured = controller
            .configure(&CaptureConfig::new(0), static_buffer::<16>())
            .unwrap();
        assert_eq!(configured.state(), CaptureState::Configured);
        assert_eq!(hw.pool().claimed_count(), 1);
        drop(configured);

        assert_eq!(hw.pool().claimed_count(), 0);
        assert_eq!(hw.events().last(), Some(&Event::EngineConfigured(0, 16)));
    }

    #[test]
    fn leaked_session_takes_its_buffer_and_channel_with_it() {
        let hw = SimHardware::new(signals::midscale);
        let mut controller = CaptureController::new(hw.adc(), hw.dma());

        let capturing = controller
            .configure(&CaptureConfig::new(0), static_buffer::<4>())
            .unwrap()
            .arm()
            .start();
        core::mem::forget(capturing);
        hw.run(96 * 20);

        // No teardown ran: the channel stays claimed and the engine went on
        // writing into the buffer, which nobody can reach any more.
        assert_eq!(hw.pool().claimed_count(), 1);
        assert!(hw.is_converting());
        assert!(!hw.events().contains(&Event::EngineAborted(0)));
        assert!(hw.events().contains(&Event::TransferComplete(0)));
    }

    #[test]
    fn late_finish_reports_overrun() {
        let hw = SimHardware::new(signals::ramp);
        let mut controller = CaptureController::new(hw.adc(), hw.dma());

        let complete = controller
            .configure(&CaptureConfig::new(0), static_buffer::<8>())
            .unwrap()
            .arm()
            .start()
            .wait();
        // Nobody reads the FIFO any more.
        hw.run(96 * 10);
        let (report, _) = complete.finish();

        assert!(report.overrun);
        assert_eq!(report.stale_samples, 4);
        assert_eq!(hw.fifo_level(), 0);
    }

    #[test]
    fn temperature_sensor_is_a_valid_channel() {
        let hw = SimHardware::new(signals::midscale);
        let mut controller = CaptureController::new(hw.adc(), hw.dma());

        let config = CaptureConfig::new(TEMPERATURE_SENSOR_CHANNEL);
        let (report, _) = controller.capture(&config, static_buffer::<4>()).unwrap();
        assert_eq!(report.channel, TEMPERATURE_SENSOR_CHANNEL);
        assert_eq!(hw.selected_channel(), TEMPERATURE_SENSOR_CHANNEL);
    }

    #[test]
    fn capture_then_stream_three_passes() {
        let hw = SimHardware::new(signals::ramp);
        let mut controller = CaptureController::new(hw.adc(), hw.dma());

        let config = CaptureConfig::new(0).clock_divider(ClockDivider::new(0, 0));
        let (report, buffer) = controller
            .capture(&config, static_buffer::<4000>())
            .unwrap();
        assert_eq!(report.samples, 4000);

        let clock = SimClock::new();
        let mut streamer =
            OutputStreamer::new(RecordingSink::new(), StreamConfig::new(4000).passes(3));
        let mut timings = Vec::new();
        streamer
            .measured_emit(buffer.as_slice(), &clock, |_, timing| timings.push(timing))
            .unwrap();

        let sink = streamer.free();
        assert_eq!(sink.data().len(), 12_000);
        for pass in sink.data().chunks(4000) {
            assert_eq!(pass, buffer.as_slice());
        }
        assert_eq!(timings.len(), 3);
        assert!(timings.iter().all(|t| t.elapsed().ticks() > 0));
    }
}
