//! Hardware-interrupt stubs and the common dispatcher.
//!
//! Each stub builds the canonical interrupt frame on the interrupted
//! thread's stack — `pusha`, then the four data segments, giving the
//! layout of [`InterruptFrame`] — and calls [`irq_dispatch`] with the
//! frame pointer. The shared epilogue [`isr_exit`] unwinds exactly that
//! layout: segment pops, `popa`, `iretd`.
//!
//! The IRQ-safe context switch re-enters through [`isr_exit`] with the
//! stack pointed at another thread's saved frame, which is why the frame
//! layout is a contract and not an implementation detail.

use sys7_core::cpu::InterruptFrame;
use sys7_core::irq;
use sys7_sched::{resched, scheduler, timer};

use super::pic;

/// Software-reschedule vector.
pub const RESCHED_VECTOR: u8 = 0x81;

const KERNEL_DS: u16 = 0x18;

/// Common ISR epilogue: restores the interrupt frame at `esp`.
#[unsafe(naked)]
pub unsafe extern "C" fn isr_exit() {
    core::arch::naked_asm!("pop gs", "pop fs", "pop es", "pop ds", "popa", "iretd");
}

macro_rules! irq_stub {
    ($name:ident, $vector:literal) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() {
            core::arch::naked_asm!(
                "pusha",
                "push ds",
                "push es",
                "push fs",
                "push gs",
                "mov ax, {kds}",
                "mov ds, ax",
                "mov es, ax",
                "mov fs, ax",
                "mov gs, ax",
                "mov eax, esp",
                "push {vector}",
                "push eax",
                "call {dispatch}",
                "add esp, 8",
                "jmp {exit}",
                kds = const KERNEL_DS,
                vector = const $vector,
                dispatch = sym irq_dispatch,
                exit = sym isr_exit,
            );
        }
    };
}

irq_stub!(irq_stub_0, 32);
irq_stub!(irq_stub_1, 33);
irq_stub!(irq_stub_2, 34);
irq_stub!(irq_stub_3, 35);
irq_stub!(irq_stub_4, 36);
irq_stub!(irq_stub_5, 37);
irq_stub!(irq_stub_6, 38);
irq_stub!(irq_stub_7, 39);
irq_stub!(irq_stub_8, 40);
irq_stub!(irq_stub_9, 41);
irq_stub!(irq_stub_10, 42);
irq_stub!(irq_stub_11, 43);
irq_stub!(irq_stub_12, 44);
irq_stub!(irq_stub_13, 45);
irq_stub!(irq_stub_14, 46);
irq_stub!(irq_stub_15, 47);
irq_stub!(resched_stub, 0x81);

/// Stub addresses for remapped IRQ vectors 32..=47.
pub static IRQ_STUBS: [unsafe extern "C" fn(); 16] = [
    irq_stub_0,
    irq_stub_1,
    irq_stub_2,
    irq_stub_3,
    irq_stub_4,
    irq_stub_5,
    irq_stub_6,
    irq_stub_7,
    irq_stub_8,
    irq_stub_9,
    irq_stub_10,
    irq_stub_11,
    irq_stub_12,
    irq_stub_13,
    irq_stub_14,
    irq_stub_15,
];

/// Address of the software-reschedule stub.
#[must_use]
pub fn resched_stub_addr() -> usize {
    resched_stub as usize
}

/// Common dispatch for hardware interrupts and the software reschedule.
///
/// Runs with interrupts disabled (interrupt gates clear IF). The timer
/// path only ticks and requests a deferred reschedule; the actual switch
/// happens through vector 0x81 or the idle loop, where the IRQ-safe
/// switch path in the scheduler takes over.
extern "C" fn irq_dispatch(frame: *mut InterruptFrame, vector: u32) {
    irq::enter(frame as usize);

    match vector as u8 {
        32 => {
            // Timer: acknowledge first so the next tick can latch, then
            // advance the clock. Never schedules from here.
            pic::send_eoi(0);
            timer::on_tick();
        }
        RESCHED_VECTOR => {
            // Software reschedule: the one place an interrupt-context
            // switch is allowed. May not return (IRQ-safe switch).
            resched::clear();
            scheduler::schedule();
        }
        v @ 33..=47 => {
            // No driver for this line yet; acknowledge and drop.
            pic::send_eoi(v - 32);
        }
        _ => {}
    }

    irq::leave();
}
