//! Tasks: process containers for threads.
//!
//! A task owns nothing but an identity and bookkeeping in this kernel —
//! address-space isolation is out of scope, so `page_table_root` is a stub
//! that a paging port will start filling in. Threads reference their task
//! weakly; destroying a task terminates its threads.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use sys7_core::id::Pid;
use sys7_core::sync::SpinLock;

/// A process container.
pub struct Task {
    /// Process id; monotonic, never reused within a run.
    pid: Pid,
    /// Physical address of the task's page table root. Stub until the
    /// kernel gains address-space isolation.
    page_table_root: AtomicU32,
    /// Number of live threads in this task.
    thread_count: AtomicU32,
}

impl Task {
    /// Returns the task's pid.
    #[must_use]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Returns the stub page table root.
    #[must_use]
    pub fn page_table_root(&self) -> u32 {
        self.page_table_root.load(Ordering::Relaxed)
    }

    /// Returns the number of live threads.
    #[must_use]
    pub fn thread_count(&self) -> u32 {
        self.thread_count.load(Ordering::Relaxed)
    }

    pub(crate) fn note_thread_added(&self) {
        self.thread_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_thread_removed(&self) {
        self.thread_count.fetch_sub(1, Ordering::Relaxed);
    }
}

static NEXT_PID: AtomicU32 = AtomicU32::new(1);
static TASK_LIST: SpinLock<Vec<Arc<Task>>> = SpinLock::new(Vec::new());

/// Creates a new task and links it into the global task list.
#[must_use]
pub fn task_create() -> Arc<Task> {
    let task = Arc::new(Task {
        pid: Pid::new(NEXT_PID.fetch_add(1, Ordering::SeqCst)),
        page_table_root: AtomicU32::new(0),
        thread_count: AtomicU32::new(0),
    });
    TASK_LIST.lock().push(task.clone());
    task
}

/// Destroys a task: unlinks it from the task list and terminates all of
/// its threads (the currently running one, if any, dies at its next pass
/// through the scheduler).
pub fn task_destroy(task: &Arc<Task>) {
    TASK_LIST.lock().retain(|t| t.pid != task.pid);
    crate::scheduler::terminate_task_threads(task.pid);
}

/// Looks up a task by pid.
#[must_use]
pub fn task_by_pid(pid: Pid) -> Option<Arc<Task>> {
    TASK_LIST.lock().iter().find(|t| t.pid == pid).cloned()
}

/// Runs a closure over every live task.
pub fn for_each_task(mut f: impl FnMut(&Arc<Task>)) {
    for task in TASK_LIST.lock().iter() {
        f(task);
    }
}

/// Downgrades to the weak reference threads hold.
#[must_use]
pub fn downgrade(task: &Arc<Task>) -> Weak<Task> {
    Arc::downgrade(task)
}
