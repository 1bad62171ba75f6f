//! Frame-pointer backtraces for the panic path.
//!
//! Walks the saved-EBP chain: each frame holds `[saved ebp][return
//! address]`. The walk is bounded and every frame pointer is
//! sanity-checked, since the chain may be damaged by the very fault
//! being reported.

use sys7_core::kprintln;

/// Maximum frames printed.
pub const MAX_FRAMES: usize = 32;

/// Reads the current frame pointer.
#[inline]
#[must_use]
pub fn current_frame_pointer() -> usize {
    let ebp: usize;
    // SAFETY: Reading EBP has no side effects.
    unsafe {
        core::arch::asm!("mov {}, ebp", out(reg) ebp, options(nomem, preserves_flags));
    }
    ebp
}

fn plausible_frame(ebp: usize) -> bool {
    // Aligned, non-null, and below the 32-bit address space ceiling with
    // room for the two-word frame record.
    ebp != 0 && ebp % 4 == 0 && ebp < usize::MAX - 8
}

/// Prints up to [`MAX_FRAMES`] return addresses starting at `ebp`.
pub fn print_backtrace(mut ebp: usize) {
    kprintln!("backtrace:");

    for depth in 0..MAX_FRAMES {
        if !plausible_frame(ebp) {
            break;
        }

        // SAFETY: plausible_frame bounds the pointer; a torn frame at
        // worst reads garbage that the next check rejects.
        let (next_ebp, ret) = unsafe {
            let frame = ebp as *const usize;
            (frame.read_volatile(), frame.add(1).read_volatile())
        };

        if ret == 0 {
            break;
        }
        kprintln!("  #{depth:02} {ret:#010x}");

        // The chain must walk upward or it is cyclic/corrupt.
        if next_ebp <= ebp {
            break;
        }
        ebp = next_ebp;
    }
}
