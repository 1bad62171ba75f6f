//! Stack canary checking and usage reporting.
//!
//! Overflow detection is opportunistic: the canary at the base of each
//! stack is checked when a diagnostic asks for it, not on every switch.

use sys7_core::{kerr, kprintln, kwarn};

use crate::STACK_CANARY;
use crate::thread::Thread;

/// Usage threshold (percent) above which a warning is logged.
pub const STACK_WARN_PERCENT: usize = 75;

/// Returns `true` if the guard word at the stack base is intact.
#[must_use]
pub fn verify_canary(thread: &Thread) -> bool {
    // SAFETY: The stack base is owned by the thread and at least one word
    // long.
    let canary = unsafe { core::ptr::read_unaligned(thread.stack_base() as *const u32) };
    canary == STACK_CANARY
}

/// Stack usage of `thread` in percent, computed from `esp`.
///
/// Returns `None` when `esp` lies outside the thread's stack, which means
/// the saved state is corrupt or the stack has already been blown.
#[must_use]
pub fn stack_usage(thread: &Thread, esp: usize) -> Option<usize> {
    let base = thread.stack_base();
    let top = thread.stack_top();
    if esp < base || esp > top {
        return None;
    }
    Some((top - esp) * 100 / thread.stack_size())
}

/// Reports canary and usage for one thread, warning at
/// [`STACK_WARN_PERCENT`] and erroring on out-of-bounds stack pointers.
///
/// `live_esp` overrides the saved context for the running thread.
pub fn check_thread(thread: &Thread, live_esp: Option<usize>) {
    let esp = live_esp.unwrap_or(thread.context.esp as usize);

    if !verify_canary(thread) {
        kerr!(
            "stack: canary smashed on tid {} (base {:#x})",
            thread.tid,
            thread.stack_base()
        );
    }

    match stack_usage(thread, esp) {
        Some(pct) if pct >= STACK_WARN_PERCENT => {
            kwarn!("stack: tid {} at {pct}% of {} bytes", thread.tid, thread.stack_size());
        }
        Some(_) => {}
        None => {
            kerr!(
                "stack: tid {} esp {esp:#x} outside {:#x}..{:#x}",
                thread.tid,
                thread.stack_base(),
                thread.stack_top()
            );
        }
    }
}

/// Prints a stack report for every live thread.
pub fn dump_stacks() {
    kprintln!("stack report:");
    crate::scheduler::for_each_thread(|t| {
        let esp = t.context.esp as usize;
        let usage = stack_usage(t, esp);
        kprintln!(
            "  tid {:<4} stack {:#x}..{:#x} canary {} usage {}",
            t.tid.as_u32(),
            t.stack_base(),
            t.stack_top(),
            if verify_canary(t) { "ok" } else { "SMASHED" },
            match usage {
                Some(pct) => pct,
                None => 100,
            }
        );
    });
}
