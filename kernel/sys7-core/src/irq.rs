//! Interrupt-context tracking.
//!
//! The ISR entry path calls [`enter`] with the live frame pointer and
//! [`leave`] on the way out. The scheduler consults [`in_interrupt`] to
//! decide between the cooperative (`RET`) and IRQ-safe (`IRET`) switch
//! paths, and [`current_frame`] to find the frame an interrupted thread
//! must be resumed through.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

static IN_INTERRUPT: AtomicBool = AtomicBool::new(false);
static CURRENT_FRAME: AtomicUsize = AtomicUsize::new(0);

/// Marks entry into interrupt context.
///
/// `frame` is the address of the [`InterruptFrame`](crate::cpu::InterruptFrame)
/// the ISR prologue just built on the interrupted thread's stack.
pub fn enter(frame: usize) {
    CURRENT_FRAME.store(frame, Ordering::Relaxed);
    IN_INTERRUPT.store(true, Ordering::Release);
}

/// Marks exit from interrupt context.
pub fn leave() {
    IN_INTERRUPT.store(false, Ordering::Release);
    CURRENT_FRAME.store(0, Ordering::Relaxed);
}

/// Returns `true` while executing inside an interrupt handler.
#[must_use]
pub fn in_interrupt() -> bool {
    IN_INTERRUPT.load(Ordering::Acquire)
}

/// Returns the live interrupt frame address, or 0 outside interrupt context.
#[must_use]
pub fn current_frame() -> usize {
    if in_interrupt() {
        CURRENT_FRAME.load(Ordering::Relaxed)
    } else {
        0
    }
}
