use rp2040_hal::{pac, sio};

/// When test cases are run from a debugger, there may not be a complete
/// system reset between test cases. Put core1 and the spinlocks back into
/// their reset state.
///
/// Must only be called at the very start of the `#[init]` function.
pub unsafe fn reset_cleanup() {
    unsafe {
        (*pac::PSM::PTR)
            .frce_off()
            .modify(|_, w| w.proc1().set_bit());
        while !(*pac::PSM::PTR).frce_off().read().proc1().bit_is_set() {
            cortex_m::asm::nop();
        }
        (*pac::PSM::PTR)
            .frce_off()
            .modify(|_, w| w.proc1().clear_bit());
        sio::spinlock_reset();
    }
}
