//! Kernel panic path.
//!
//! All roads end here: Rust panics, CPU exceptions, and explicit
//! integrity failures (heap corruption, double free, smashed canary).
//! The path disables interrupts, prints whatever context it was handed
//! plus a bounded frame-pointer backtrace, and halts the machine with
//! `cli; hlt` forever. A recursion guard turns a panic-inside-panic into
//! an immediate halt.

use core::sync::atomic::{AtomicBool, Ordering};

use sys7_core::kprintln;

use crate::arch::x86::{self, exceptions::ExceptionFrame};
use crate::backtrace;

/// What brought the system down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicCode {
    /// Explicit panic from kernel code.
    Software,
    /// Heap metadata failed validation.
    HeapCorruption,
    /// A block was freed twice.
    DoubleFree,
    /// A stack canary was smashed.
    StackOverflow,
    /// Divide error (vector 0).
    DivideError,
    /// Invalid opcode (vector 6).
    InvalidOpcode,
    /// Double fault (vector 8).
    DoubleFault,
    /// Stack-segment fault (vector 12).
    StackFault,
    /// General protection fault (vector 13).
    GeneralProtection,
    /// Page fault (vector 14).
    PageFault,
    /// Any other CPU exception.
    CpuException,
}

impl PanicCode {
    /// Short name for the banner.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Software => "SOFTWARE",
            Self::HeapCorruption => "HEAP_CORRUPTION",
            Self::DoubleFree => "DOUBLE_FREE",
            Self::StackOverflow => "STACK_OVERFLOW",
            Self::DivideError => "DIVIDE_ERROR",
            Self::InvalidOpcode => "INVALID_OPCODE",
            Self::DoubleFault => "DOUBLE_FAULT",
            Self::StackFault => "STACK_FAULT",
            Self::GeneralProtection => "GPF",
            Self::PageFault => "PAGE_FAULT",
            Self::CpuException => "CPU_EXCEPTION",
        }
    }
}

static IN_PANIC: AtomicBool = AtomicBool::new(false);

fn halt_forever() -> ! {
    loop {
        x86::disable_interrupts();
        x86::halt();
    }
}

fn enter_panic() {
    x86::disable_interrupts();
    if IN_PANIC.swap(true, Ordering::SeqCst) {
        // Recursed while already panicking; stop without printing.
        halt_forever();
    }
}

/// Panic with a CPU exception snapshot. Never returns.
pub fn panic_with_exception(code: PanicCode, frame: &ExceptionFrame, cr2: Option<u32>) -> ! {
    enter_panic();

    kprintln!();
    kprintln!("==== KERNEL PANIC: {} ====", code.name());
    kprintln!(
        "exception {} ({}), error code {:#x}",
        frame.vector,
        crate::arch::x86::exceptions::exception_name(frame.vector),
        frame.error_code
    );
    kprintln!(
        "eip={:#010x} cs={:#06x} eflags={:#010x}",
        frame.eip,
        frame.cs,
        frame.eflags
    );
    kprintln!(
        "eax={:#010x} ebx={:#010x} ecx={:#010x} edx={:#010x}",
        frame.eax,
        frame.ebx,
        frame.ecx,
        frame.edx
    );
    kprintln!(
        "esi={:#010x} edi={:#010x} ebp={:#010x}",
        frame.esi,
        frame.edi,
        frame.ebp
    );
    kprintln!(
        "ds={:#06x} es={:#06x} fs={:#06x} gs={:#06x}",
        frame.ds,
        frame.es,
        frame.fs,
        frame.gs
    );
    if let Some(cr2) = cr2 {
        kprintln!("cr2={cr2:#010x}");
    }

    backtrace::print_backtrace(frame.ebp as usize);
    halt_forever();
}

/// Panic with a context code and message. Never returns.
pub fn panic_with_code(code: PanicCode, message: &str) -> ! {
    enter_panic();
    kprintln!();
    kprintln!("==== KERNEL PANIC: {} ====", code.name());
    kprintln!("{message}");
    backtrace::print_backtrace(backtrace::current_frame_pointer());
    halt_forever();
}

#[cfg(target_os = "none")]
#[panic_handler]
fn rust_panic(info: &core::panic::PanicInfo<'_>) -> ! {
    enter_panic();
    kprintln!();
    kprintln!("==== KERNEL PANIC: {} ====", PanicCode::Software.name());
    kprintln!("{info}");
    backtrace::print_backtrace(backtrace::current_frame_pointer());
    halt_forever();
}
