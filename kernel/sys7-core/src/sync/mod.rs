//! Synchronization primitives.
//!
//! The kernel runs on a single CPU; these locks exist to serialize access
//! between cooperative threads and (where documented) interrupt handlers.
//! An SMP port must revisit every user of [`SpinLock`] and add interrupt
//! masking where the lock is shared with IRQ context.

mod irq_spinlock;
mod lazy;
mod spinlock;

pub use irq_spinlock::{IrqSpinLock, IrqSpinLockGuard};
pub use lazy::LazyLock;
pub use spinlock::{SpinLock, SpinLockGuard};
