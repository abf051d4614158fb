//! Transfer engine: one DMA channel draining a peripheral FIFO into memory
//!
//! A [`ChannelAllocator`] hands out exclusive [`TransferEngine`] handles, one
//! per hardware channel. A handle is configured from a [`TransferDescriptor`],
//! armed with [`TransferEngine::start`] and then moves one unit every time the
//! pacing DREQ is asserted, until the transfer count is reached.
//!
//! Channels are released when their handle is dropped.

use core::cell::Cell;
use core::sync::atomic::{compiler_fence, Ordering};

use embedded_dma::WriteBuffer;

use crate::adc::SourceTarget;
use crate::error::CaptureError;

/// Number of channels of the RP2040 DMA block.
pub const CHANNEL_COUNT: u8 = 12;

/// DREQ value meaning "unpaced, run as fast as possible".
pub const TREQ_UNPACED: u8 = 0x3f;

/// Size of one transfer unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataSize {
    /// 8 bit
    Byte = 0,
    /// 16 bit
    HalfWord = 1,
    /// 32 bit
    Word = 2,
}

impl DataSize {
    /// Size in bytes.
    pub const fn bytes(self) -> usize {
        1 << self as usize
    }
}

/// Everything a channel needs to run one capture.
///
/// Built by [`TransferDescriptor::peripheral_to_buffer`], which ties the
/// transfer count to the buffer capacity: the engine can never write past the
/// end of the buffer. The descriptor holds a raw pointer into the buffer and
/// does not keep it alive, so building one is `unsafe`; a
/// [`CaptureController`](crate::CaptureController) session does it for you
/// while owning the buffer.
///
/// ```compile_fail,E0133
/// use adc_dma_capture::{CaptureBuffer, SourceTarget, TransferDescriptor};
///
/// let buffer: &'static mut CaptureBuffer<16> = Box::leak(Box::new(CaptureBuffer::new()));
/// let mut buffer = buffer;
/// let target = SourceTarget { address: 0x4004_c00c, treq: 36 };
/// let descriptor = TransferDescriptor::peripheral_to_buffer(target, &mut buffer);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferDescriptor {
    data_size: DataSize,
    read_address: u32,
    incr_read: bool,
    write_address: *mut u8,
    incr_write: bool,
    transfer_count: u32,
    treq: u8,
}

impl TransferDescriptor {
    /// Byte-wide transfer from a fixed FIFO register into an incrementing
    /// buffer, paced by the source's DREQ, for the full length of `to`.
    ///
    /// # Safety
    ///
    /// The memory behind `to` must stay valid, and must not be read or
    /// written by anything but the engine, from the moment the descriptor is
    /// loaded with [`TransferEngine::configure`] until that engine is done or
    /// aborted.
    pub unsafe fn peripheral_to_buffer<B>(from: SourceTarget, to: &mut B) -> Self
    where
        B: WriteBuffer<Word = u8>,
    {
        let (ptr, len) = to.write_buffer();
        TransferDescriptor {
            data_size: DataSize::Byte,
            read_address: from.address,
            incr_read: false,
            write_address: ptr,
            incr_write: true,
            transfer_count: len as u32,
            treq: from.treq,
        }
    }

    /// Unit size (always [`DataSize::Byte`] for captures).
    pub fn data_size(&self) -> DataSize {
        self.data_size
    }

    /// Source register address.
    pub fn read_address(&self) -> u32 {
        self.read_address
    }

    /// Whether the source address advances after each unit.
    pub fn incr_read(&self) -> bool {
        self.incr_read
    }

    /// First destination byte.
    pub fn write_address(&self) -> *mut u8 {
        self.write_address
    }

    /// Whether the destination address advances after each unit.
    pub fn incr_write(&self) -> bool {
        self.incr_write
    }

    /// Units to move; equals the buffer capacity.
    pub fn transfer_count(&self) -> u32 {
        self.transfer_count
    }

    /// Pacing DREQ.
    pub fn treq(&self) -> u8 {
        self.treq
    }
}

/// An exclusively owned DMA channel.
pub trait TransferEngine {
    /// Hardware index of the channel.
    fn id(&self) -> u8;

    /// Load the descriptor into the channel without starting it.
    ///
    /// # Safety
    ///
    /// Once started, the channel writes wherever `descriptor` points. The
    /// caller upholds the contract of
    /// [`TransferDescriptor::peripheral_to_buffer`] for as long as this
    /// engine may run.
    unsafe fn configure(&mut self, descriptor: &TransferDescriptor);

    /// Arm the channel. Units move as soon as the pacing DREQ is asserted;
    /// this returns immediately.
    fn start(&mut self);

    /// Returns `true` while units remain to be transferred.
    fn is_busy(&self) -> bool;

    /// Units not yet transferred.
    fn remaining(&self) -> u32;

    /// Stop the channel, discarding whatever is left of the transfer.
    fn abort(&mut self);

    /// Block until the full transfer count has been moved.
    ///
    /// There is no timeout: a source that never produces data blocks here
    /// forever. See [`Capturing::wait_timeout`](crate::capture::Capturing::wait_timeout).
    fn wait_for_completion(&mut self) {
        while self.is_busy() {
            core::hint::spin_loop();
        }

        // Make sure that buffer reads happen after the final DMA write.
        compiler_fence(Ordering::SeqCst);
    }
}

/// Hands out DMA channels.
pub trait ChannelAllocator {
    /// Handle to one claimed channel.
    type Engine<'a>: TransferEngine
    where
        Self: 'a;

    /// Claim an unused channel, or fail with
    /// [`CaptureError::ResourceExhausted`] if all are taken.
    fn acquire_channel(&self) -> Result<Self::Engine<'_>, CaptureError>;
}

impl<A: ChannelAllocator> ChannelAllocator for &A {
    type Engine<'a> = A::Engine<'a> where Self: 'a;

    fn acquire_channel(&self) -> Result<Self::Engine<'_>, CaptureError> {
        A::acquire_channel(self)
    }
}

/// Claim bookkeeping for a set of DMA channels.
///
/// Keeps one bit per channel. Not `Sync`: a pool belongs to one thread of
/// control, which is all a capture needs.
pub struct ChannelPool {
    claimed: Cell<u16>,
    count: u8,
}

impl ChannelPool {
    /// Pool of `count` channels (at most 16), all unclaimed.
    pub const fn new(count: u8) -> Self {
        assert!(count <= 16, "a channel pool holds at most 16 channels");
        ChannelPool {
            claimed: Cell::new(0),
            count,
        }
    }

    /// Claim the lowest-numbered free channel.
    pub fn claim_unused(&self) -> Result<Claim<'_>, CaptureError> {
        let claimed = self.claimed.get();
        let id = (0..self.count)
            .find(|id| claimed & (1 << *id) == 0)
            .ok_or(CaptureError::ResourceExhausted)?;
        self.claimed.set(claimed | (1 << id));
        trace!("claimed DMA channel {}", id);
        Ok(Claim { pool: self, id })
    }

    /// Returns `true` if channel `id` is currently claimed.
    pub fn is_claimed(&self, id: u8) -> bool {
        self.claimed.get() & (1 << id) != 0
    }

    /// Number of channels currently claimed.
    pub fn claimed_count(&self) -> u32 {
        self.claimed.get().count_ones()
    }
}

/// Exclusive claim on one channel of a [`ChannelPool`]; released on drop.
pub struct Claim<'p> {
    pool: &'p ChannelPool,
    id: u8,
}

impl Claim<'_> {
    /// Claimed channel index.
    pub fn id(&self) -> u8 {
        self.id
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let claimed = self.pool.claimed.get();
        self.pool.claimed.set(claimed & !(1 << self.id));
        trace!("released DMA channel {}", self.id);
    }
}
