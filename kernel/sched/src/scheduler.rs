//! Round-robin scheduler: one ready queue, one idle thread, one `current`.
//!
//! [`schedule`] picks the head of the ready FIFO (the idle thread when the
//! queue is empty), requeues a still-running predecessor, records stats,
//! and branches on execution context:
//!
//! - outside interrupts, the cooperative path saves the outgoing
//!   [`CpuContext`] and resumes the incoming thread through whichever
//!   channel is valid for it;
//! - inside an interrupt, the outgoing thread's state already lives in
//!   the interrupt frame the ISR prologue built on its stack, so the
//!   frame pointer is recorded and the incoming thread is resumed without
//!   saving registers (the IRQ-safe path).
//!
//! Terminated threads are parked as zombies and reaped on the next pass
//! through the scheduler, once their stack is no longer the active one.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr;

use sys7_core::cpu::CpuContext;
use sys7_core::id::{Pid, Tid};
use sys7_core::irq;
use sys7_core::sync::IrqSpinLock;

use crate::task::{Task, task_create};
use crate::thread::{ResumeChannel, Thread, ThreadState};
use crate::timer::{self, SleeperQueue};
use crate::{ArchHooks, IDLE_PRIORITY, arch_hooks, resched, stats};

/// How the incoming thread is entered.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ResumeTarget {
    /// Restore a saved register context.
    Context(*const CpuContext),
    /// Switch the stack to a saved interrupt frame and run the ISR
    /// epilogue.
    Frame(usize),
}

/// Everything `schedule` needs after the lock is released.
pub(crate) struct SwitchPlan {
    /// Where to save the outgoing registers; null when there is nothing
    /// to save (first switch, or the state is already in a frame).
    pub prev_ctx: *mut CpuContext,
    pub target: ResumeTarget,
}

/// Scheduler state; a single instance lives behind [`SCHED`].
pub(crate) struct Scheduler {
    ready: VecDeque<Box<Thread>>,
    current: Option<Box<Thread>>,
    /// The idle thread while it is not running.
    idle: Option<Box<Thread>>,
    idle_tid: Option<Tid>,
    blocked: Vec<Box<Thread>>,
    zombies: Vec<Box<Thread>>,
    sleepers: SleeperQueue,
}

impl Scheduler {
    pub(crate) const fn new() -> Self {
        Self {
            ready: VecDeque::new(),
            current: None,
            idle: None,
            idle_tid: None,
            blocked: Vec::new(),
            zombies: Vec::new(),
            sleepers: SleeperQueue::new(),
        }
    }

    pub(crate) fn enqueue(&mut self, mut thread: Box<Thread>) {
        thread.state = ThreadState::Ready;
        self.ready.push_back(thread);
    }

    pub(crate) fn install_idle(&mut self, mut idle: Box<Thread>) {
        idle.state = ThreadState::Ready;
        self.idle_tid = Some(idle.tid);
        self.idle = Some(idle);
    }

    /// Core of [`schedule`]: dispose of the current thread according to
    /// its state, pick the next one, and describe the switch.
    ///
    /// Returns `None` when there is nothing to switch to, in which case
    /// the caller simply keeps running.
    pub(crate) fn prepare_switch(
        &mut self,
        now: u64,
        in_irq: bool,
        live_frame: usize,
    ) -> Option<SwitchPlan> {
        // Zombies parked on earlier passes are off-stack by now.
        self.zombies.clear();

        let mut next = self.ready.pop_front().or_else(|| self.idle.take())?;

        let mut prev_ctx: *mut CpuContext = ptr::null_mut();
        if let Some(mut prev) = self.current.take() {
            if in_irq {
                // The ISR prologue saved everything into the frame on the
                // outgoing thread's own stack; resuming goes through it.
                prev.irq_frame = live_frame;
                prev.resume = ResumeChannel::Frame;
            } else {
                // The switch primitive fills the context on the way out.
                prev.resume = ResumeChannel::Context;
                prev_ctx = &mut prev.context;
            }

            stats::record_switch_at(now, Some(&mut prev), &mut next);

            match prev.state {
                ThreadState::Running | ThreadState::Ready => {
                    prev.state = ThreadState::Ready;
                    if Some(prev.tid) == self.idle_tid {
                        self.idle = Some(prev);
                    } else {
                        self.ready.push_back(prev);
                    }
                }
                ThreadState::Sleeping => self.sleepers.park(prev),
                ThreadState::Blocked => self.blocked.push(prev),
                ThreadState::Terminated => self.zombies.push(prev),
            }
        } else {
            stats::record_switch_at(now, None, &mut next);
        }

        next.state = ThreadState::Running;
        let target = match next.resume {
            ResumeChannel::Context => ResumeTarget::Context(&raw const next.context),
            ResumeChannel::Frame => ResumeTarget::Frame(next.irq_frame),
        };
        self.current = Some(next);

        Some(SwitchPlan { prev_ctx, target })
    }

    pub(crate) fn wake_expired(&mut self, now: u64) {
        for mut t in self.sleepers.drain_expired(now) {
            t.state = ThreadState::Ready;
            t.wake_time = 0;
            self.ready.push_back(t);
        }
    }

    pub(crate) fn unblock(&mut self, tid: Tid) -> bool {
        if let Some(pos) = self.blocked.iter().position(|t| t.tid == tid) {
            let mut t = self.blocked.remove(pos);
            t.state = ThreadState::Ready;
            self.ready.push_back(t);
            true
        } else {
            false
        }
    }

    pub(crate) fn terminate_task_threads(&mut self, pid: Pid) {
        self.ready.retain(|t| t.pid != pid);
        self.blocked.retain(|t| t.pid != pid);
        drop(self.sleepers.remove_task(pid));
        if let Some(cur) = self.current.as_mut() {
            if cur.pid == pid {
                cur.state = ThreadState::Terminated;
            }
        }
    }

    pub(crate) fn for_each_thread(&self, mut f: impl FnMut(&Thread)) {
        if let Some(cur) = &self.current {
            f(cur);
        }
        for t in &self.ready {
            f(t);
        }
        if let Some(idle) = &self.idle {
            f(idle);
        }
        for t in &self.blocked {
            f(t);
        }
        self.sleepers.for_each(&mut f);
    }

    pub(crate) fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub(crate) fn current_tid(&self) -> Option<Tid> {
        self.current.as_ref().map(|t| t.tid)
    }
}

// Shared with the timer interrupt path; must disable interrupts while held.
static SCHED: IrqSpinLock<Scheduler> = IrqSpinLock::new(Scheduler::new());

/// Initializes the scheduler: creates the idle task and thread.
///
/// `idle_entry` is the address of the idle loop (poll the reschedule flag,
/// `hlt`, repeat).
///
/// # Panics
///
/// Panics if the idle thread cannot be allocated; the system cannot run
/// without it.
pub fn init(idle_entry: usize) {
    let hooks = arch_hooks();
    let idle_task = task_create();
    let idle = Thread::create(
        &idle_task,
        hooks.trampoline,
        idle_entry,
        0,
        4096,
        IDLE_PRIORITY,
    )
    .expect("failed to allocate idle thread");

    SCHED.lock().install_idle(idle);
    sys7_core::kinfo!("sched: initialized (idle pid {})", idle_task.pid());
}

/// Creates a thread in `task` and adds it to the ready queue.
///
/// Returns `None` if allocation fails; the caller decides policy.
#[must_use]
pub fn spawn(
    task: &Arc<Task>,
    entry: usize,
    arg: usize,
    stack_size: usize,
    priority: u8,
) -> Option<Tid> {
    let hooks = arch_hooks();
    let thread = Thread::create(task, hooks.trampoline, entry, arg, stack_size, priority)?;
    let tid = thread.tid;
    SCHED.lock().enqueue(thread);
    Some(tid)
}

/// Selects and switches to the next thread.
pub fn schedule() {
    let hooks = arch_hooks();
    let in_irq = irq::in_interrupt();
    let live_frame = irq::current_frame();
    let now = timer::ticks();

    let plan = {
        let mut sched = SCHED.lock();
        sched.prepare_switch(now, in_irq, live_frame)
    };

    let Some(plan) = plan else {
        return;
    };

    // SAFETY: The plan's pointers address context/frame storage inside
    // boxed threads owned by the scheduler queues; boxes keep them stable
    // across the switch. The hooks implement the documented contracts.
    unsafe { perform_switch(&hooks, &plan, in_irq) };
}

/// Executes a prepared switch. Never returns on the diverging paths.
unsafe fn perform_switch(hooks: &ArchHooks, plan: &SwitchPlan, in_irq: bool) {
    if plan.prev_ctx.is_null() {
        // Nothing to save: first-ever switch, or the outgoing state lives
        // in an interrupt frame. Clear interrupt context before leaving
        // it behind for good.
        if in_irq {
            irq::leave();
        }
        match plan.target {
            // SAFETY: Caller contract.
            ResumeTarget::Context(ctx) => unsafe { (hooks.resume_context)(ctx) },
            // SAFETY: Caller contract.
            ResumeTarget::Frame(frame) => unsafe { (hooks.resume_frame)(frame) },
        }
    } else {
        match plan.target {
            // SAFETY: Caller contract.
            ResumeTarget::Context(ctx) => unsafe { (hooks.switch_context)(plan.prev_ctx, ctx) },
            // SAFETY: Caller contract.
            ResumeTarget::Frame(frame) => unsafe { (hooks.switch_to_frame)(plan.prev_ctx, frame) },
        }
    }
}

/// Voluntarily yields the CPU.
pub fn thread_yield() {
    schedule();
}

/// Terminates the calling thread. Never returns.
pub fn thread_exit() -> ! {
    {
        let mut sched = SCHED.lock();
        if let Some(cur) = sched.current.as_mut() {
            cur.state = ThreadState::Terminated;
        }
    }
    loop {
        schedule();
    }
}

/// Sleeps the calling thread for `millis` milliseconds (0 yields).
pub fn thread_sleep(millis: u64) {
    if millis == 0 {
        thread_yield();
        return;
    }
    {
        let mut sched = SCHED.lock();
        if let Some(cur) = sched.current.as_mut() {
            cur.state = ThreadState::Sleeping;
            cur.wake_time = timer::ticks() + millis;
        }
    }
    schedule();
}

/// Parks the calling thread until [`unblock`] is called with its tid.
pub fn block_current() {
    {
        let mut sched = SCHED.lock();
        if let Some(cur) = sched.current.as_mut() {
            cur.state = ThreadState::Blocked;
        }
    }
    schedule();
}

/// Moves a blocked thread back to the ready queue.
pub fn unblock(tid: Tid) -> bool {
    SCHED.lock().unblock(tid)
}

/// Moves expired sleepers to the ready queue. Called from the timer tick.
pub fn wake_expired(now: u64) {
    SCHED.lock().wake_expired(now);
}

/// Marks every thread of `pid` terminated or removes it from its queue.
pub fn terminate_task_threads(pid: Pid) {
    SCHED.lock().terminate_task_threads(pid);
}

/// Tid of the running thread, if the scheduler has started.
#[must_use]
pub fn current_tid() -> Option<Tid> {
    SCHED.lock().current_tid()
}

/// `(ready, running)` thread counts for diagnostics.
#[must_use]
pub fn counts() -> (usize, usize) {
    let sched = SCHED.lock();
    (sched.ready_count(), usize::from(sched.current_tid().is_some()))
}

/// Runs a closure over every live thread (current, ready, idle, blocked,
/// sleeping).
pub fn for_each_thread(f: impl FnMut(&Thread)) {
    SCHED.lock().for_each_thread(f);
}

/// Hands the CPU to the first thread. Never returns.
///
/// # Panics
///
/// Panics if no thread (not even the idle thread) is runnable.
pub fn start() -> ! {
    schedule();
    unreachable!("start: no runnable thread");
}

/// Services a pending deferred reschedule, if any.
///
/// The idle loop calls this after every `hlt`; the software reschedule
/// interrupt handler is the other service point.
pub fn service_resched() {
    if resched::pending() {
        resched::clear();
        schedule();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{task_create, task_destroy};

    fn thread_with_priority(priority: u8) -> Box<Thread> {
        let task = task_create();
        let t = Thread::create(&task, 0x1000, 0x2000, 0, 8192, priority).expect("create");
        task_destroy(&task);
        t
    }

    fn thread() -> Box<Thread> {
        thread_with_priority(10)
    }

    fn idle_thread() -> Box<Thread> {
        thread_with_priority(IDLE_PRIORITY)
    }

    #[test]
    fn first_switch_has_nothing_to_save() {
        let mut s = Scheduler::new();
        s.enqueue(thread());
        let plan = s.prepare_switch(0, false, 0).expect("plan");
        assert!(plan.prev_ctx.is_null());
        assert!(matches!(plan.target, ResumeTarget::Context(_)));
        assert!(s.current_tid().is_some());
    }

    #[test]
    fn exactly_one_thread_running() {
        let mut s = Scheduler::new();
        s.enqueue(thread());
        s.enqueue(thread());
        s.prepare_switch(0, false, 0).expect("plan");

        let mut running = 0;
        let mut ready = 0;
        s.for_each_thread(|t| match t.state {
            ThreadState::Running => running += 1,
            ThreadState::Ready => ready += 1,
            _ => {}
        });
        assert_eq!(running, 1);
        assert_eq!(ready, 1);
    }

    #[test]
    fn round_robin_requeues_running_current() {
        let mut s = Scheduler::new();
        let a = thread();
        let b = thread();
        let (ida, idb) = (a.tid, b.tid);
        s.enqueue(a);
        s.enqueue(b);

        s.prepare_switch(0, false, 0).expect("plan");
        assert_eq!(s.current_tid(), Some(ida));

        // A yields: B runs, A back at the tail.
        s.prepare_switch(1, false, 0).expect("plan");
        assert_eq!(s.current_tid(), Some(idb));
        assert_eq!(s.ready_count(), 1);

        s.prepare_switch(2, false, 0).expect("plan");
        assert_eq!(s.current_tid(), Some(ida));
    }

    #[test]
    fn falls_back_to_idle_when_ready_empty() {
        let mut s = Scheduler::new();
        s.install_idle(idle_thread());
        let t = thread();
        let tid = t.tid;
        s.enqueue(t);

        s.prepare_switch(0, false, 0).expect("plan");
        assert_eq!(s.current_tid(), Some(tid));

        // The only thread yields; idle takes over, the thread requeues.
        s.prepare_switch(1, false, 0).expect("plan");
        assert_eq!(s.current_tid(), s.idle_tid);
        assert_eq!(s.ready_count(), 1);
    }

    #[test]
    fn idle_never_enters_ready_queue() {
        let mut s = Scheduler::new();
        s.install_idle(idle_thread());
        let t = thread();
        s.enqueue(t);

        s.prepare_switch(0, false, 0).expect("plan"); // thread runs
        s.prepare_switch(1, false, 0).expect("plan"); // idle runs
        s.prepare_switch(2, false, 0).expect("plan"); // thread runs again

        // Idle went back to its slot, not the ready queue.
        assert!(s.idle.is_some());
        assert_eq!(s.ready_count(), 0);
    }

    #[test]
    fn nothing_runnable_keeps_current() {
        let mut s = Scheduler::new();
        let t = thread();
        let tid = t.tid;
        s.enqueue(t);
        s.prepare_switch(0, false, 0).expect("plan");
        // No idle installed, ready empty: current keeps the CPU.
        assert!(s.prepare_switch(1, false, 0).is_none());
        assert_eq!(s.current_tid(), Some(tid));
    }

    #[test]
    fn sleeping_current_moves_to_sleep_queue() {
        let mut s = Scheduler::new();
        s.install_idle(idle_thread());
        let t = thread();
        let tid = t.tid;
        s.enqueue(t);
        s.prepare_switch(0, false, 0).expect("plan");

        s.current.as_mut().unwrap().state = ThreadState::Sleeping;
        s.current.as_mut().unwrap().wake_time = 10;
        s.prepare_switch(0, false, 0).expect("plan");

        assert_eq!(s.sleepers.len(), 1);
        assert_eq!(s.ready_count(), 0);

        // Not re-entered before its wake time.
        s.wake_expired(9);
        assert_eq!(s.ready_count(), 0);
        s.wake_expired(10);
        assert_eq!(s.ready_count(), 1);
        let mut woken_tid = None;
        s.for_each_thread(|t| {
            if t.state == ThreadState::Ready && !t.is_idle() {
                woken_tid = Some(t.tid);
            }
        });
        assert_eq!(woken_tid, Some(tid));
    }

    #[test]
    fn terminated_current_becomes_zombie_and_is_reaped() {
        let mut s = Scheduler::new();
        s.install_idle(idle_thread());
        s.enqueue(thread());
        s.prepare_switch(0, false, 0).expect("plan");

        s.current.as_mut().unwrap().state = ThreadState::Terminated;
        s.prepare_switch(1, false, 0).expect("plan");
        assert_eq!(s.zombies.len(), 1);

        // Reaped on the next pass.
        s.current.as_mut().unwrap().state = ThreadState::Terminated;
        s.prepare_switch(2, false, 0).expect("plan");
        assert_eq!(s.zombies.len(), 1); // the new zombie; old one dropped
    }

    #[test]
    fn irq_suspend_records_live_frame() {
        let mut s = Scheduler::new();
        s.install_idle(idle_thread());
        let a = thread();
        let b = thread();
        let ida = a.tid;
        s.enqueue(a);
        s.enqueue(b);
        s.prepare_switch(0, false, 0).expect("plan");

        // Timer preemption: switch away from A inside an interrupt.
        let plan = s.prepare_switch(1, true, 0xDEAD_BEE0).expect("plan");
        assert!(plan.prev_ctx.is_null(), "IRQ path saves nothing");

        let mut found = false;
        s.for_each_thread(|t| {
            if t.tid == ida {
                assert_eq!(t.irq_frame, 0xDEAD_BEE0);
                assert_eq!(t.resume, ResumeChannel::Frame);
                found = true;
            }
        });
        assert!(found);
    }

    #[test]
    fn frame_suspended_thread_resumes_through_frame() {
        let mut s = Scheduler::new();
        s.install_idle(idle_thread());
        let a = thread();
        let b = thread();
        let ida = a.tid;
        s.enqueue(a);
        s.enqueue(b);
        s.prepare_switch(0, false, 0).expect("plan"); // A runs
        s.prepare_switch(1, true, 0x1000_0000).expect("plan"); // B runs, A preempted

        // B yields cooperatively; A must come back via its frame.
        let plan = s.prepare_switch(2, false, 0).expect("plan");
        assert_eq!(s.current_tid(), Some(ida));
        match plan.target {
            ResumeTarget::Frame(f) => assert_eq!(f, 0x1000_0000),
            ResumeTarget::Context(_) => panic!("expected frame resume"),
        }
        assert!(!plan.prev_ctx.is_null(), "cooperative suspend saves context");
    }

    #[test]
    fn blocked_current_parks_until_unblocked() {
        let mut s = Scheduler::new();
        s.install_idle(idle_thread());
        let t = thread();
        let tid = t.tid;
        s.enqueue(t);
        s.prepare_switch(0, false, 0).expect("plan");

        s.current.as_mut().unwrap().state = ThreadState::Blocked;
        s.prepare_switch(1, false, 0).expect("plan");
        assert_eq!(s.ready_count(), 0);

        assert!(s.unblock(tid));
        assert_eq!(s.ready_count(), 1);
        assert!(!s.unblock(tid));
    }

    #[test]
    fn terminate_task_threads_clears_queues() {
        let task = task_create();
        let t1 = Thread::create(&task, 0x1000, 0x2000, 0, 8192, 10).expect("create");
        let t2 = Thread::create(&task, 0x1000, 0x2000, 0, 8192, 10).expect("create");
        let pid = task.pid();

        let mut s = Scheduler::new();
        s.enqueue(t1);
        s.enqueue(t2);
        s.terminate_task_threads(pid);
        assert_eq!(s.ready_count(), 0);
        task_destroy(&task);
    }
}
