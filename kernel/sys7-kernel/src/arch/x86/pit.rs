//! 8254 PIT channel 0 as the system tick source.

use sys7_core::kinfo;

use super::port::Port;

/// PIT oscillator frequency.
const PIT_BASE_HZ: u32 = 1_193_182;

/// System tick rate: one tick per millisecond.
pub const TIMER_HZ: u32 = 1000;

const CHANNEL0_DATA: u16 = 0x40;
const PIT_CMD: u16 = 0x43;

/// Channel 0, lobyte/hibyte access, mode 2 (rate generator), binary.
const CMD_RATE_GENERATOR: u8 = 0x36;

/// Programs channel 0 to fire at [`TIMER_HZ`].
///
/// # Safety
///
/// Must run with interrupts disabled before IRQ 0 is unmasked.
pub unsafe fn init() {
    let divisor = (PIT_BASE_HZ / TIMER_HZ).min(0xFFFF);

    let cmd = Port::<u8>::new(PIT_CMD);
    let data = Port::<u8>::new(CHANNEL0_DATA);

    // SAFETY: Standard PIT programming sequence.
    unsafe {
        cmd.write(CMD_RATE_GENERATOR);
        data.write((divisor & 0xFF) as u8);
        data.write((divisor >> 8) as u8);
    }

    kinfo!("pit: programmed for {TIMER_HZ} Hz (divisor {divisor})");
}
