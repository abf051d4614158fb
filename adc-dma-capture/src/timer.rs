//! Monotonic time source used for throughput measurements and timeouts

/// Instant type used by the timer peripheral: a 64 bit microsecond counter.
pub type Instant = fugit::TimerInstantU64<1_000_000>;

/// Duration matching [`Instant`].
pub type Duration = fugit::MicrosDurationU64;

/// A free-running, never decreasing clock.
pub trait Monotonic {
    /// Current time.
    fn now(&self) -> Instant;
}

impl<T: Monotonic + ?Sized> Monotonic for &T {
    fn now(&self) -> Instant {
        T::now(self)
    }
}

/// Start and end of one measured emission pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingSample {
    /// Time before the first chunk was written.
    pub start: Instant,
    /// Time after the last chunk was flushed.
    pub end: Instant,
}

impl TimingSample {
    /// Time spent in the pass.
    pub fn elapsed(&self) -> Duration {
        self.end
            .checked_duration_since(self.start)
            .unwrap_or(Duration::from_ticks(0))
    }
}
