//! Kernel initialization sequence.
//!
//! Order matters: serial logging first so everything after can speak,
//! then physical memory and the heap (the allocator everything else
//! leans on), interrupt plumbing, the scheduler with its idle thread,
//! IPC, and finally the filesystem stack and automatic mounts. The boot
//! loader and GDT are external; [`kernel_init`] takes over with
//! interrupts disabled and never returns.

use sys7_core::{kinfo, kwarn};
use sys7_fs::{autodetect, devfs, fd, hfs, procfs, ramfs, vfs};
use sys7_mm::{PAGE_SIZE, heap, pmm};
use sys7_sched::{scheduler, task};

use crate::arch::x86::{self, context, idt, pic, pit};
use crate::console;

/// Initial heap: 1 MiB carved out of the PMM.
const INITIAL_HEAP_PAGES: usize = 256;

/// What the boot loader hands the kernel.
pub struct BootInfo {
    /// Size of the managed physical region in bytes.
    pub mem_size: usize,
    /// Base of the managed physical region (page-aligned).
    pub phys_base: usize,
}

fn heap_grow(min_bytes: usize) -> Option<(usize, usize)> {
    let pages = min_bytes.div_ceil(PAGE_SIZE);
    let base = pmm::with_pmm(|p| p.alloc_contiguous(pages))?;
    Some((base, pages * PAGE_SIZE))
}

/// Idle loop: service deferred reschedules, then halt until the next
/// interrupt.
extern "C" fn idle_entry(_arg: usize) {
    loop {
        scheduler::service_resched();
        x86::halt();
    }
}

/// Brings the kernel up and hands the CPU to the scheduler.
///
/// `main_entry` becomes the first kernel thread (the supervisor shell,
/// test driver, whatever the image wired in).
///
/// # Panics
///
/// Panics when a resource the kernel cannot run without fails to
/// initialize (heap region, idle thread, main thread).
///
/// # Safety
///
/// `boot` must describe exclusively-owned, writable physical memory; the
/// GDT must be live with the selectors `sys7-core::cpu` documents;
/// interrupts must be disabled on entry. Must be called exactly once.
pub unsafe fn kernel_init(boot: &BootInfo, main_entry: extern "C" fn(usize)) -> ! {
    console::init();
    kinfo!(
        "sys7: booting, {} MiB at {:#x}",
        boot.mem_size / (1024 * 1024),
        boot.phys_base
    );

    // Memory first: PMM over the boot region, heap carved from it.
    // SAFETY: Caller owns the region.
    unsafe { pmm::init(boot.mem_size, boot.phys_base) };
    let heap_base = pmm::with_pmm(|p| p.alloc_contiguous(INITIAL_HEAP_PAGES))
        .expect("no contiguous region for the initial heap");
    // SAFETY: Freshly allocated, exclusively owned pages.
    unsafe { heap::init(heap_base, INITIAL_HEAP_PAGES * PAGE_SIZE) };
    heap::register_grow_fn(heap_grow);

    // Interrupt plumbing: IDT gates, remapped PIC, 1000 Hz PIT.
    // SAFETY: Interrupts are disabled and the GDT is live.
    unsafe {
        idt::init();
        pic::remap();
        pit::init();
    }
    pic::unmask(0); // timer

    // Threading: arch switch primitives, idle thread, IPC yield hook.
    // SAFETY: The context primitives implement the documented contracts.
    unsafe {
        sys7_sched::set_arch_hooks(context::arch_hooks());
        sys7_ipc::set_yield_fn(scheduler::thread_yield);
    }
    scheduler::init(idle_entry as usize);

    // Filesystem stack: descriptors, virtual filesystems, drivers,
    // automatic mounts.
    fd::init();
    if let Err(e) = procfs::mount_procfs() {
        kwarn!("boot: /proc mount failed: {e}");
    }
    if let Err(e) = devfs::mount_devfs() {
        kwarn!("boot: /dev mount failed: {e}");
    }
    vfs::register_filesystem(&ramfs::RAMFS);
    vfs::register_filesystem(&hfs::HFS);
    autodetect::autodetect_mount();

    // First real thread, then hand over the CPU.
    let main_task = task::task_create();
    scheduler::spawn(
        &main_task,
        main_entry as usize,
        0,
        sys7_sched::DEFAULT_STACK_SIZE,
        10,
    )
    .expect("failed to spawn the main kernel thread");

    kinfo!("sys7: boot complete, starting scheduler");
    x86::enable_interrupts();
    scheduler::start();
}
