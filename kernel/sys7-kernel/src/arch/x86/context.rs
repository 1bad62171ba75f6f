//! Context-switch primitives and the thread entry trampoline.
//!
//! Two suspend flavors and two resume flavors, combined by the
//! scheduler:
//!
//! - suspend into a [`CpuContext`] (cooperative) or leave the state in
//!   the interrupt frame the ISR prologue already built (IRQ path);
//! - resume from a [`CpuContext`] (restore registers, switch stacks,
//!   jump) or from an interrupt frame (switch stacks, run the ISR
//!   epilogue, `iretd`).
//!
//! A saved context records `eip` = resume address and `esp` = the stack
//! pointer *after* the switch call returns, so resuming is exactly
//! "continue as if the call came back".

use sys7_core::cpu::CpuContext;
use sys7_sched::ArchHooks;

use super::stubs::isr_exit;

/// Thread entry trampoline. On entry the stack carries
/// `[entry][arg]` (built by thread creation): call the entry with `arg`
/// as its one cdecl argument, then exit the thread.
#[unsafe(naked)]
pub unsafe extern "C" fn thread_entry_stub() {
    core::arch::naked_asm!(
        "pop eax",
        "call eax",
        "call {exit}",
        exit = sym thread_exit_trampoline,
    );
}

extern "C" fn thread_exit_trampoline() {
    sys7_sched::scheduler::thread_exit();
}

/// Saves the outgoing context and resumes the incoming one.
///
/// # Safety
///
/// Both pointers must address live `CpuContext` storage that outlives the
/// suspension; the incoming context must describe a resumable thread.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_old: *mut CpuContext, _new: *const CpuContext) {
    core::arch::naked_asm!(
        "mov eax, [esp + 4]",
        "mov edx, [esp + 8]",
        // Save callee-saved registers.
        "mov [eax + 0], ebx",
        "mov [eax + 4], esi",
        "mov [eax + 8], edi",
        "mov [eax + 12], ebp",
        // Resume point: our return address, with the stack as it will be
        // after this call returns.
        "mov ecx, [esp]",
        "mov [eax + 20], ecx",
        "lea ecx, [esp + 4]",
        "mov [eax + 16], ecx",
        "pushfd",
        "pop ecx",
        "mov [eax + 24], ecx",
        // Restore the incoming context.
        "mov ebx, [edx + 0]",
        "mov esi, [edx + 4]",
        "mov edi, [edx + 8]",
        "mov ebp, [edx + 12]",
        "mov esp, [edx + 16]",
        "push dword ptr [edx + 24]",
        "popfd",
        "jmp dword ptr [edx + 20]",
    );
}

/// Saves the outgoing context, then resumes the incoming thread from its
/// interrupt frame via the ISR epilogue.
///
/// # Safety
///
/// `_old` as in [`switch_context`]; `_frame` must point at a complete
/// ring-0 interrupt frame on the incoming thread's stack.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_to_frame(_old: *mut CpuContext, _frame: usize) {
    core::arch::naked_asm!(
        "mov eax, [esp + 4]",
        "mov edx, [esp + 8]",
        "mov [eax + 0], ebx",
        "mov [eax + 4], esi",
        "mov [eax + 8], edi",
        "mov [eax + 12], ebp",
        "mov ecx, [esp]",
        "mov [eax + 20], ecx",
        "lea ecx, [esp + 4]",
        "mov [eax + 16], ecx",
        "pushfd",
        "pop ecx",
        "mov [eax + 24], ecx",
        // Stack over to the saved frame and unwind it.
        "mov esp, edx",
        "jmp {exit}",
        exit = sym isr_exit,
    );
}

/// Resumes a context without saving anything. First-ever switch, and
/// resumes out of interrupt context.
///
/// # Safety
///
/// `_new` must describe a resumable thread.
#[unsafe(naked)]
pub unsafe extern "C" fn resume_context(_new: *const CpuContext) -> ! {
    core::arch::naked_asm!(
        "mov edx, [esp + 4]",
        "mov ebx, [edx + 0]",
        "mov esi, [edx + 4]",
        "mov edi, [edx + 8]",
        "mov ebp, [edx + 12]",
        "mov esp, [edx + 16]",
        "push dword ptr [edx + 24]",
        "popfd",
        "jmp dword ptr [edx + 20]",
    );
}

/// Resumes an interrupt frame without saving anything.
///
/// # Safety
///
/// `_frame` must point at a complete ring-0 interrupt frame.
#[unsafe(naked)]
pub unsafe extern "C" fn resume_frame(_frame: usize) -> ! {
    core::arch::naked_asm!(
        "mov eax, [esp + 4]",
        "mov esp, eax",
        "jmp {exit}",
        exit = sym isr_exit,
    );
}

/// The hook set the scheduler dispatches through.
#[must_use]
pub fn arch_hooks() -> ArchHooks {
    ArchHooks {
        trampoline: thread_entry_stub as usize,
        switch_context,
        switch_to_frame,
        resume_context,
        resume_frame,
    }
}
