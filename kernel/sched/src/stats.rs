//! Per-thread CPU accounting and the telemetry report.
//!
//! Tick attribution happens at context-switch boundaries, never inside the
//! timer interrupt, so a tick is counted against exactly one thread.

use core::sync::atomic::{AtomicU64, Ordering};

use sys7_core::kprintln;

use crate::thread::Thread;
use crate::timer;

/// Per-thread performance counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadStats {
    /// Times this thread has been switched in.
    pub context_switches: u64,
    /// Ticks attributed to this thread.
    pub cpu_ticks: u64,
    /// Tick at which the thread was last switched in.
    pub last_scheduled_tick: u64,
}

static TOTAL_SWITCHES: AtomicU64 = AtomicU64::new(0);

/// Records a context switch from `prev` to `next` at the current tick.
///
/// The elapsed ticks since `prev` was scheduled are charged to `prev`;
/// `next` gets its switch count bumped and its schedule timestamp set.
pub fn record_switch(prev: Option<&mut Thread>, next: &mut Thread) {
    record_switch_at(timer::ticks(), prev, next);
}

/// [`record_switch`] with an explicit tick value.
pub fn record_switch_at(now: u64, prev: Option<&mut Thread>, next: &mut Thread) {
    if let Some(prev) = prev {
        prev.stats.cpu_ticks += now.saturating_sub(prev.stats.last_scheduled_tick);
    }

    next.stats.context_switches += 1;
    next.stats.last_scheduled_tick = now;
    TOTAL_SWITCHES.fetch_add(1, Ordering::Relaxed);
}

/// Total context switches since boot.
#[must_use]
pub fn total_switches() -> u64 {
    TOTAL_SWITCHES.load(Ordering::Relaxed)
}

/// Prints the scheduler telemetry report for every live thread.
pub fn dump_stats() {
    let total_ticks = timer::ticks();
    let total_switches = total_switches();

    kprintln!();
    kprintln!("========================================");
    kprintln!("  Scheduler Telemetry Report");
    kprintln!("========================================");
    kprintln!("  total ticks:    {total_ticks}");
    kprintln!("  total switches: {total_switches}");
    if total_switches > 0 {
        kprintln!("  avg quantum:    {} ticks", total_ticks / total_switches);
    }
    kprintln!();
    kprintln!(
        "{:<8} {:>12} {:>12} {:>8} {:>12}",
        "thread", "switches", "ticks", "cpu %", "avg quantum"
    );

    crate::scheduler::for_each_thread(|t| {
        let switches = t.stats.context_switches;
        let ticks = t.stats.cpu_ticks;
        let (pct_int, pct_frac) = if total_ticks > 0 {
            (
                ticks * 100 / total_ticks,
                (ticks * 10_000 / total_ticks) % 100,
            )
        } else {
            (0, 0)
        };
        let avg = if switches > 0 { ticks / switches } else { 0 };
        if t.is_idle() {
            kprintln!("{:<8} {switches:>12} {ticks:>12} {pct_int:>4}.{pct_frac:02}% {avg:>12}", "IDLE");
        } else {
            kprintln!(
                "tid {:<4} {switches:>12} {ticks:>12} {pct_int:>4}.{pct_frac:02}% {avg:>12}",
                t.tid.as_u32()
            );
        }
    });
    kprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{task_create, task_destroy};
    use crate::thread::Thread;

    fn thread() -> alloc::boxed::Box<Thread> {
        let task = task_create();
        let t = Thread::create(&task, 0x1000, 0x2000, 0, 8192, 10).expect("create");
        task_destroy(&task);
        t
    }

    #[test]
    fn switch_charges_previous_thread() {
        let mut a = thread();
        let mut b = thread();

        record_switch_at(100, None, &mut a);
        assert_eq!(a.stats.context_switches, 1);
        assert_eq!(a.stats.last_scheduled_tick, 100);

        record_switch_at(105, Some(&mut a), &mut b);
        assert_eq!(a.stats.cpu_ticks, 5);
        assert_eq!(b.stats.context_switches, 1);
        assert_eq!(b.stats.last_scheduled_tick, 105);
    }

    #[test]
    fn repeated_slices_accumulate() {
        let mut a = thread();
        let mut b = thread();

        record_switch_at(0, None, &mut a);
        record_switch_at(10, Some(&mut a), &mut b);
        record_switch_at(13, Some(&mut b), &mut a);
        record_switch_at(20, Some(&mut a), &mut b);

        assert_eq!(a.stats.cpu_ticks, 17);
        assert_eq!(b.stats.cpu_ticks, 3);
        assert_eq!(a.stats.context_switches, 2);
        assert_eq!(b.stats.context_switches, 2);
    }

    #[test]
    fn total_switch_counter_increases() {
        let mut a = thread();
        let before = total_switches();
        record_switch_at(0, None, &mut a);
        assert_eq!(total_switches(), before + 1);
    }
}
