//! CPU exception handlers (vectors 0..=31).
//!
//! Each stub normalizes the stack to one layout — vectors without a CPU
//! error code push a zero placeholder — then funnels into a common
//! prologue that snapshots every register and hands the frame to the
//! panic path. Exceptions in supervisor context do not return.

use sys7_core::cpu::KERNEL_DS as KERNEL_DS_U32;

use crate::panic::{self, PanicCode};

const KERNEL_DS: u16 = KERNEL_DS_U32 as u16;

/// Register snapshot built by the exception prologue, low address first.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ExceptionFrame {
    /// Saved GS.
    pub gs: u32,
    /// Saved FS.
    pub fs: u32,
    /// Saved ES.
    pub es: u32,
    /// Saved DS.
    pub ds: u32,
    /// Saved EDI (pusha).
    pub edi: u32,
    /// Saved ESI (pusha).
    pub esi: u32,
    /// Saved EBP (pusha).
    pub ebp: u32,
    /// ESP slot written by `pusha`.
    pub esp_dummy: u32,
    /// Saved EBX (pusha).
    pub ebx: u32,
    /// Saved EDX (pusha).
    pub edx: u32,
    /// Saved ECX (pusha).
    pub ecx: u32,
    /// Saved EAX (pusha).
    pub eax: u32,
    /// Exception vector number.
    pub vector: u32,
    /// CPU error code, or 0 for vectors without one.
    pub error_code: u32,
    /// Faulting instruction pointer.
    pub eip: u32,
    /// Faulting code segment.
    pub cs: u32,
    /// Flags at the fault.
    pub eflags: u32,
}

macro_rules! exception_stub {
    ($name:ident, $vector:literal) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() {
            core::arch::naked_asm!(
                "push 0",
                "push {vector}",
                "jmp {common}",
                vector = const $vector,
                common = sym exception_common,
            );
        }
    };
}

macro_rules! exception_stub_err {
    ($name:ident, $vector:literal) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() {
            core::arch::naked_asm!(
                // The CPU already pushed the error code.
                "push {vector}",
                "jmp {common}",
                vector = const $vector,
                common = sym exception_common,
            );
        }
    };
}

#[unsafe(naked)]
unsafe extern "C" fn exception_common() {
    core::arch::naked_asm!(
        "pusha",
        "push ds",
        "push es",
        "push fs",
        "push gs",
        "mov ax, {kds}",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "mov eax, esp",
        "push eax",
        "call {dispatch}",
        // exception_dispatch never returns.
        kds = const KERNEL_DS,
        dispatch = sym exception_dispatch,
    );
}

exception_stub!(exc_0, 0);
exception_stub!(exc_1, 1);
exception_stub!(exc_2, 2);
exception_stub!(exc_3, 3);
exception_stub!(exc_4, 4);
exception_stub!(exc_5, 5);
exception_stub!(exc_6, 6);
exception_stub!(exc_7, 7);
exception_stub_err!(exc_8, 8);
exception_stub!(exc_9, 9);
exception_stub_err!(exc_10, 10);
exception_stub_err!(exc_11, 11);
exception_stub_err!(exc_12, 12);
exception_stub_err!(exc_13, 13);
exception_stub_err!(exc_14, 14);
exception_stub!(exc_15, 15);
exception_stub!(exc_16, 16);
exception_stub_err!(exc_17, 17);
exception_stub!(exc_18, 18);
exception_stub!(exc_19, 19);
exception_stub!(exc_20, 20);
exception_stub_err!(exc_21, 21);
exception_stub!(exc_22, 22);
exception_stub!(exc_23, 23);
exception_stub!(exc_24, 24);
exception_stub!(exc_25, 25);
exception_stub!(exc_26, 26);
exception_stub!(exc_27, 27);
exception_stub!(exc_28, 28);
exception_stub_err!(exc_29, 29);
exception_stub_err!(exc_30, 30);
exception_stub!(exc_31, 31);

/// Stubs for vectors 0..=31.
pub static EXCEPTION_STUBS: [unsafe extern "C" fn(); 32] = [
    exc_0,
    exc_1,
    exc_2,
    exc_3,
    exc_4,
    exc_5,
    exc_6,
    exc_7,
    exc_8,
    exc_9,
    exc_10,
    exc_11,
    exc_12,
    exc_13,
    exc_14,
    exc_15,
    exc_16,
    exc_17,
    exc_18,
    exc_19,
    exc_20,
    exc_21,
    exc_22,
    exc_23,
    exc_24,
    exc_25,
    exc_26,
    exc_27,
    exc_28,
    exc_29,
    exc_30,
    exc_31,
];

/// Exception name for diagnostics.
#[must_use]
pub fn exception_name(vector: u32) -> &'static str {
    match vector {
        0 => "DIVIDE ERROR",
        1 => "DEBUG",
        2 => "NON-MASKABLE INTERRUPT",
        3 => "BREAKPOINT",
        4 => "OVERFLOW",
        5 => "BOUND RANGE EXCEEDED",
        6 => "INVALID OPCODE",
        7 => "DEVICE NOT AVAILABLE",
        8 => "DOUBLE FAULT",
        9 => "COPROCESSOR SEGMENT OVERRUN",
        10 => "INVALID TSS",
        11 => "SEGMENT NOT PRESENT",
        12 => "STACK-SEGMENT FAULT",
        13 => "GENERAL PROTECTION FAULT",
        14 => "PAGE FAULT",
        16 => "x87 FLOATING-POINT",
        17 => "ALIGNMENT CHECK",
        18 => "MACHINE CHECK",
        19 => "SIMD FLOATING-POINT",
        20 => "VIRTUALIZATION",
        21 => "CONTROL PROTECTION",
        _ => "RESERVED",
    }
}

fn panic_code(vector: u32) -> PanicCode {
    match vector {
        0 => PanicCode::DivideError,
        6 => PanicCode::InvalidOpcode,
        8 => PanicCode::DoubleFault,
        12 => PanicCode::StackFault,
        13 => PanicCode::GeneralProtection,
        14 => PanicCode::PageFault,
        _ => PanicCode::CpuException,
    }
}

fn read_cr2() -> u32 {
    let cr2: u32;
    // SAFETY: Reading CR2 is side-effect free in ring 0.
    unsafe {
        core::arch::asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags));
    }
    cr2
}

/// Packages the exception into a panic context and halts. Never returns.
extern "C" fn exception_dispatch(frame: *const ExceptionFrame) -> ! {
    // SAFETY: The exception prologue just built this frame on the stack
    // and it stays live for the duration of the panic.
    let frame = unsafe { &*frame };

    let cr2 = if frame.vector == 14 { Some(read_cr2()) } else { None };
    panic::panic_with_exception(panic_code(frame.vector), frame, cr2);
}
