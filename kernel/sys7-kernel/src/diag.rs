//! Supervisor diagnostics.
//!
//! Thin front door over the per-subsystem printers, callable from any
//! supervisor context (the printers serialize serial access themselves).

use sys7_fs::{block, daemon, fd, mount, vfs};
use sys7_sched::{stack_debug, stats};

/// Prints all mounted volumes.
pub fn list_volumes() {
    vfs::list_volumes();
}

/// Prints the mount table.
pub fn list_mounts() {
    mount::list_mounts();
}

/// Prints registered filesystem daemons.
pub fn list_daemons() {
    daemon::list_daemons();
}

/// Prints the block device registry.
pub fn list_block_devices() {
    block::list_devices();
}

/// Prints open file descriptors.
pub fn list_fds() {
    fd::list_fds();
}

/// Prints the scheduler telemetry report.
pub fn dump_stats() {
    stats::dump_stats();
}

/// Prints the per-thread stack report.
pub fn dump_stacks() {
    stack_debug::dump_stacks();
}

/// Checks the running thread's canary and usage against its live stack
/// pointer (saved contexts go stale while a thread runs).
#[cfg(all(target_os = "none", target_arch = "x86"))]
pub fn check_current_stack() {
    let esp = crate::arch::x86::read_esp();
    let current = sys7_sched::scheduler::current_tid();
    sys7_sched::scheduler::for_each_thread(|t| {
        if Some(t.tid) == current {
            stack_debug::check_thread(t, Some(esp));
        }
    });
}

/// Prints everything.
pub fn dump_all() {
    list_block_devices();
    list_volumes();
    list_mounts();
    list_daemons();
    list_fds();
    dump_stats();
    dump_stacks();
}
