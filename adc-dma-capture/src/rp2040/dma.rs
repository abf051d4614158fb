use core::sync::atomic::{compiler_fence, Ordering};

use rp2040_hal::dma::{Channels, SingleChannel};
use rp2040_hal::pac;

use crate::dma::{
    ChannelAllocator, ChannelPool, Claim, TransferDescriptor, TransferEngine, CHANNEL_COUNT,
};
use crate::error::CaptureError;

/// The twelve channels of the RP2040 DMA block, claimed at runtime.
///
/// The HAL's typed [`Channel`](rp2040_hal::dma::Channel)s stay owned here;
/// a claim from the pool lends out the registers of one of them.
pub struct Dma {
    channels: Channels,
    pool: ChannelPool,
}

impl Dma {
    /// Take ownership of every channel, as returned by `DMAExt::split`.
    pub fn new(channels: Channels) -> Self {
        Dma {
            channels,
            pool: ChannelPool::new(CHANNEL_COUNT),
        }
    }

    /// Release the channels.
    pub fn free(self) -> Channels {
        self.channels
    }

    /// Claim bookkeeping.
    pub fn pool(&self) -> &ChannelPool {
        &self.pool
    }

    fn regs(&self, id: u8) -> Option<&pac::dma::CH> {
        let c = &self.channels;
        let regs = [
            c.ch0.ch(),
            c.ch1.ch(),
            c.ch2.ch(),
            c.ch3.ch(),
            c.ch4.ch(),
            c.ch5.ch(),
            c.ch6.ch(),
            c.ch7.ch(),
            c.ch8.ch(),
            c.ch9.ch(),
            c.ch10.ch(),
            c.ch11.ch(),
        ];
        regs.get(usize::from(id)).copied()
    }
}

impl ChannelAllocator for Dma {
    type Engine<'a> = DmaChannel<'a>;

    fn acquire_channel(&self) -> Result<DmaChannel<'_>, CaptureError> {
        let claim = self.pool.claim_unused()?;
        let regs = self
            .regs(claim.id())
            .ok_or(CaptureError::ResourceExhausted)?;
        Ok(DmaChannel { claim, regs })
    }
}

/// One claimed DMA channel.
///
/// The channel is disabled when the handle is dropped.
pub struct DmaChannel<'a> {
    claim: Claim<'a>,
    regs: &'a pac::dma::CH,
}

impl DmaChannel<'_> {
    fn dma() -> &'static pac::dma::RegisterBlock {
        // Safety: only the trigger and abort registers are used, and they are
        // write-one-to-act per channel.
        unsafe { &*pac::DMA::ptr() }
    }

    fn mask(&self) -> u32 {
        1 << self.claim.id()
    }
}

impl TransferEngine for DmaChannel<'_> {
    fn id(&self) -> u8 {
        self.claim.id()
    }

    unsafe fn configure(&mut self, descriptor: &TransferDescriptor) {
        // Chaining to itself disables chaining.
        let id = self.claim.id();
        self.regs.ch_al1_ctrl().write(|w| unsafe {
            w.data_size().bits(descriptor.data_size() as u8);
            w.incr_read().bit(descriptor.incr_read());
            w.incr_write().bit(descriptor.incr_write());
            w.treq_sel().bits(descriptor.treq());
            w.chain_to().bits(id);
            w.en().bit(true);
            w
        });
        self.regs
            .ch_read_addr()
            .write(|w| unsafe { w.bits(descriptor.read_address()) });
        self.regs
            .ch_trans_count()
            .write(|w| unsafe { w.bits(descriptor.transfer_count()) });
        self.regs
            .ch_write_addr()
            .write(|w| unsafe { w.bits(descriptor.write_address() as u32) });
    }

    fn start(&mut self) {
        // Make sure that memory contents reflect what the user intended.
        cortex_m::asm::dsb();
        compiler_fence(Ordering::SeqCst);

        // Safety: The write does not interfere with any other writes, it only
        // affects this channel.
        Self::dma()
            .multi_chan_trigger()
            .write(|w| unsafe { w.bits(self.mask()) });
    }

    fn is_busy(&self) -> bool {
        self.regs.ch_ctrl_trig().read().busy().bit_is_set()
    }

    fn remaining(&self) -> u32 {
        self.regs.ch_trans_count().read().bits()
    }

    fn abort(&mut self) {
        let chan_abort = Self::dma().chan_abort();
        chan_abort.write(|w| unsafe { w.bits(self.mask()) });
        while chan_abort.read().bits() != 0 {}
        while self.is_busy() {}
    }

    fn wait_for_completion(&mut self) {
        while self.is_busy() {}

        cortex_m::asm::dsb();
        compiler_fence(Ordering::SeqCst);
    }
}

impl Drop for DmaChannel<'_> {
    fn drop(&mut self) {
        self.regs.ch_al1_ctrl().modify(|_, w| w.en().clear_bit());
    }
}
