//! Serial console glue.
//!
//! The serial driver itself is external; its contract is a single
//! `serial_puts` taking a NUL-terminated string and safe to call with
//! interrupts disabled. This module formats kernel log output into
//! bounded chunks and feeds it through that contract, with interrupts
//! disabled around each chunk — serial I/O is not reentrant, so this is
//! the only sanctioned way to reach it from arbitrary supervisor
//! context.

use core::fmt::{self, Write};

use sys7_core::log::{self, LogLevel};

unsafe extern "C" {
    /// External serial console: prints a NUL-terminated string.
    fn serial_puts(s: *const u8);
}

const CHUNK: usize = 128;

struct SerialWriter {
    buf: [u8; CHUNK],
    len: usize,
}

impl SerialWriter {
    const fn new() -> Self {
        Self {
            buf: [0; CHUNK],
            len: 0,
        }
    }

    fn flush(&mut self) {
        if self.len == 0 {
            return;
        }
        self.buf[self.len] = 0;
        // SAFETY: The buffer is NUL-terminated within bounds, and the
        // serial contract allows calls with interrupts disabled.
        unsafe { serial_puts(self.buf.as_ptr()) };
        self.len = 0;
    }

    fn push(&mut self, byte: u8) {
        if self.len == CHUNK - 1 {
            self.flush();
        }
        self.buf[self.len] = byte;
        self.len += 1;
    }
}

impl Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &b in s.as_bytes() {
            self.push(b);
        }
        Ok(())
    }
}

/// Runs `f` with interrupts disabled, restoring the previous IF state.
fn with_interrupts_disabled<R>(f: impl FnOnce() -> R) -> R {
    let flags: u32;
    // SAFETY: pushfd/cli/popfd around the critical section.
    unsafe {
        core::arch::asm!("pushfd", "pop {}", "cli", out(reg) flags, options(preserves_flags));
    }
    let result = f();
    if flags & 0x200 != 0 {
        crate::arch::x86::enable_interrupts();
    }
    result
}

fn console_print(args: fmt::Arguments<'_>) {
    with_interrupts_disabled(|| {
        let mut writer = SerialWriter::new();
        let _ = writer.write_fmt(args);
        writer.flush();
    });
}

fn console_log(level: LogLevel, args: fmt::Arguments<'_>) {
    let ticks = sys7_sched::timer::ticks();
    console_print(format_args!(
        "[{:>6}.{:03}] {} {}\n",
        ticks / 1000,
        ticks % 1000,
        level.name(),
        args
    ));
}

/// Registers the serial console as the kernel log sink.
pub fn init() {
    // SAFETY: console_print/console_log are callable from any context;
    // they disable interrupts around the non-reentrant serial write.
    unsafe {
        log::set_print_fn(console_print);
        log::set_log_fn(console_log);
    }
    sys7_core::kinfo!("console: serial logger online");
}
