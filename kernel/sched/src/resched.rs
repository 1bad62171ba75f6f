//! Deferred rescheduling.
//!
//! Interrupt handlers must not call the scheduler directly: a context
//! switch started before the IRQ-safe path is set up corrupts the stack.
//! The timer handler instead calls [`request`], and the pending flag is
//! serviced from safe context — the idle loop after `hlt`, or the
//! software reschedule interrupt (vector 0x81) whose handler clears the
//! flag and schedules.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static PENDING: AtomicBool = AtomicBool::new(false);
static REQUESTS: AtomicU64 = AtomicU64::new(0);
static SERVICED: AtomicU64 = AtomicU64::new(0);

/// Requests a deferred reschedule. Safe from interrupt context.
pub fn request() {
    PENDING.store(true, Ordering::Release);
    REQUESTS.fetch_add(1, Ordering::Relaxed);
}

/// Returns `true` while a reschedule is pending.
#[must_use]
pub fn pending() -> bool {
    PENDING.load(Ordering::Acquire)
}

/// Clears the pending flag and counts the service.
pub fn clear() {
    PENDING.store(false, Ordering::Release);
    SERVICED.fetch_add(1, Ordering::Relaxed);
}

/// Returns `(requests, serviced)` counters.
#[must_use]
pub fn counters() -> (u64, u64) {
    (
        REQUESTS.load(Ordering::Relaxed),
        SERVICED.load(Ordering::Relaxed),
    )
}
