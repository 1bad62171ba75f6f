//! sys7 platform crate: x86 protected-mode plumbing and the boot
//! sequence.
//!
//! The portable kernel logic lives in the sibling crates (`sys7-mm`,
//! `sys7-sched`, `sys7-ipc`, `sys7-fs`); this crate supplies what only
//! the target can: IDT/PIC/PIT programming, ISR stubs, the context-switch
//! and trampoline assembly, the exception/panic path, the serial logger
//! glue, and [`boot::kernel_init`] wiring it all together.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

// ── Kernel-runtime modules (require the bare-metal x86 target) ─────────

#[cfg(all(target_os = "none", target_arch = "x86"))]
pub mod arch;
#[cfg(all(target_os = "none", target_arch = "x86"))]
pub mod backtrace;
#[cfg(all(target_os = "none", target_arch = "x86"))]
pub mod boot;
#[cfg(all(target_os = "none", target_arch = "x86"))]
pub mod console;
#[cfg(all(target_os = "none", target_arch = "x86"))]
pub mod daemons;
#[cfg(all(target_os = "none", target_arch = "x86"))]
pub mod panic;

// ── Always-available modules ────────────────────────────────────────────

pub mod diag;

#[cfg(all(target_os = "none", target_arch = "x86"))]
pub use boot::{BootInfo, kernel_init};
