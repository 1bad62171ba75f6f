//! Kernel heap: first-fit free list over a PMM-backed region.
//!
//! The heap deals in whole pages. Free space is kept as an address-sorted
//! list of page runs, each headed by a [`FreeBlock`], coalesced with its
//! neighbors on insert. Every allocation is therefore page-aligned and
//! page-granular.
//!
//! Two surfaces sit on top:
//!
//! - [`GlobalAlloc`] for the `alloc` crate (`Box`, `Vec`, ...). The layout
//!   carries the size, so allocations are raw page runs with no header.
//! - The C-style [`kmalloc`] / [`kfree`] / [`krealloc`] triple. These must
//!   recover the size from the pointer alone, so they prepend one header
//!   page carrying the run length; the payload starts on the next page
//!   boundary.
//!
//! When the free list has no fit, the heap asks a registered grow callback
//! for more contiguous pages (the boot code backs it with the PMM).

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use sys7_core::sync::IrqSpinLock;

use crate::{PAGE_SIZE, page_align};

/// Free run header, stored in the first bytes of each free run.
#[repr(C)]
struct FreeBlock {
    /// Run size in bytes, always a page multiple, header included.
    size: usize,
    /// Next free run by ascending address, or null.
    next: *mut FreeBlock,
}

/// Header page prefix for `kmalloc` allocations.
#[repr(C)]
struct AllocHeader {
    /// Total run size in bytes, header page included.
    size: usize,
}

/// Callback used to grow the heap: takes the minimum number of bytes
/// needed, returns the base and actual size of a new page run.
pub type GrowFn = fn(usize) -> Option<(usize, usize)>;

struct HeapInner {
    /// Head of the free list (address-sorted).
    head: *mut FreeBlock,
    /// Lowest address the heap has ever managed.
    heap_start: usize,
    /// One past the highest address the heap has ever managed.
    heap_end: usize,
    /// Bytes currently handed out.
    used_bytes: usize,
    grow_fn: Option<GrowFn>,
}

// SAFETY: Only reachable through the IrqSpinLock.
unsafe impl Send for HeapInner {}

impl HeapInner {
    const fn empty() -> Self {
        Self {
            head: ptr::null_mut(),
            heap_start: 0,
            heap_end: 0,
            used_bytes: 0,
            grow_fn: None,
        }
    }

    /// Adds `[addr, addr + size)` as free space, coalescing neighbors.
    ///
    /// # Safety
    ///
    /// The range must be page-aligned, writable, and disjoint from every
    /// live allocation and existing free run.
    unsafe fn insert_free(&mut self, addr: usize, size: usize) {
        debug_assert!(addr % PAGE_SIZE == 0 && size % PAGE_SIZE == 0 && size > 0);

        let block = addr as *mut FreeBlock;
        // SAFETY: The caller hands us exclusive, writable memory.
        unsafe {
            (*block).size = size;
            (*block).next = ptr::null_mut();
        }

        // Find insertion point by address.
        let mut prev: *mut FreeBlock = ptr::null_mut();
        let mut cur = self.head;
        while !cur.is_null() && (cur as usize) < addr {
            prev = cur;
            // SAFETY: cur is a live free-list node.
            cur = unsafe { (*cur).next };
        }

        // Coalesce with predecessor.
        if !prev.is_null() {
            // SAFETY: prev is a live free-list node.
            let prev_end = prev as usize + unsafe { (*prev).size };
            if prev_end == addr {
                unsafe {
                    (*prev).size += size;
                    let merged_end = prev as usize + (*prev).size;
                    if !cur.is_null() && merged_end == cur as usize {
                        (*prev).size += (*cur).size;
                        (*prev).next = (*cur).next;
                    }
                }
                return;
            }
        }

        // Coalesce with successor or link before it.
        // SAFETY: block and cur are valid nodes; writes stay in their headers.
        unsafe {
            if !cur.is_null() && addr + size == cur as usize {
                (*block).size += (*cur).size;
                (*block).next = (*cur).next;
            } else {
                (*block).next = cur;
            }

            if prev.is_null() {
                self.head = block;
            } else {
                (*prev).next = block;
            }
        }
    }

    /// First-fit removal of `size` bytes (page multiple) from the free list.
    fn take_first_fit(&mut self, size: usize) -> Option<usize> {
        let mut prev: *mut FreeBlock = ptr::null_mut();
        let mut cur = self.head;

        while !cur.is_null() {
            // SAFETY: cur is a live free-list node.
            let (cur_size, next) = unsafe { ((*cur).size, (*cur).next) };

            if cur_size >= size {
                let addr = cur as usize;
                // Unlink.
                if prev.is_null() {
                    self.head = next;
                } else {
                    // SAFETY: prev is a live node.
                    unsafe { (*prev).next = next };
                }
                // Return the surviving remainder.
                let remainder = cur_size - size;
                if remainder > 0 {
                    // SAFETY: the tail of the run we just unlinked.
                    unsafe { self.insert_free(addr + size, remainder) };
                }
                return Some(addr);
            }

            prev = cur;
            cur = next;
        }

        None
    }

    fn alloc_run(&mut self, size: usize) -> Option<usize> {
        debug_assert!(size % PAGE_SIZE == 0);
        if let Some(addr) = self.take_first_fit(size) {
            self.used_bytes += size;
            return Some(addr);
        }
        None
    }

    fn free_run(&mut self, addr: usize, size: usize) {
        self.used_bytes = self.used_bytes.saturating_sub(size);
        // SAFETY: The caller returns a run previously handed out by
        // `alloc_run` with the same size.
        unsafe { self.insert_free(addr, size) };
    }
}

/// The kernel heap: an interrupt-safe, lock-guarded free list usable as
/// the global allocator.
pub struct KernelHeap {
    inner: IrqSpinLock<HeapInner>,
}

impl KernelHeap {
    /// Creates an uninitialized heap; call [`KernelHeap::init`] before use.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: IrqSpinLock::new(HeapInner::empty()),
        }
    }

    /// Hands the heap its initial region.
    ///
    /// # Safety
    ///
    /// `start` must be page-aligned and point to `size` bytes of writable
    /// memory owned exclusively by the heap. Must be called exactly once.
    pub unsafe fn init(&self, start: usize, size: usize) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.head.is_null(), "heap already initialized");
        inner.heap_start = start;
        inner.heap_end = start + size;
        // SAFETY: Forwarded caller contract.
        unsafe { inner.insert_free(start, size) };
    }

    /// Registers the callback used to request more pages when the free
    /// list has no fit.
    pub fn register_grow_fn(&self, f: GrowFn) {
        self.inner.lock().grow_fn = Some(f);
    }

    /// Allocates a page-aligned run of at least `size` bytes (rounded up to
    /// a page multiple). Returns `None` when the heap and the grow callback
    /// are both exhausted.
    pub fn alloc_bytes(&self, size: usize) -> Option<usize> {
        let size = page_align(size.max(1));

        let mut inner = self.inner.lock();
        if let Some(addr) = inner.alloc_run(size) {
            return Some(addr);
        }

        let grow = inner.grow_fn?;
        // Release the lock across the callback; it may take the PMM lock.
        drop(inner);

        let (addr, got) = grow(size)?;
        let mut inner = self.inner.lock();
        inner.heap_end = inner.heap_end.max(addr + got);
        if inner.heap_start == 0 || addr < inner.heap_start {
            inner.heap_start = addr;
        }
        // SAFETY: The grow callback hands over exclusive pages.
        unsafe { inner.insert_free(addr, got) };
        inner.alloc_run(size)
    }

    /// Returns a run obtained from [`KernelHeap::alloc_bytes`].
    ///
    /// # Safety
    ///
    /// `addr`/`size` must describe exactly one live allocation (same
    /// rounding as the alloc side).
    pub unsafe fn free_bytes(&self, addr: usize, size: usize) {
        let size = page_align(size.max(1));
        self.inner.lock().free_run(addr, size);
    }

    /// Bytes currently handed out.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.inner.lock().used_bytes
    }

    /// Bytes in the managed range (grown regions included).
    #[must_use]
    pub fn managed_bytes(&self) -> usize {
        let inner = self.inner.lock();
        inner.heap_end.saturating_sub(inner.heap_start)
    }
}

impl Default for KernelHeap {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: Allocation hands out disjoint page runs; the free list is
// lock-guarded.
unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > PAGE_SIZE {
            return ptr::null_mut();
        }
        match self.alloc_bytes(layout.size()) {
            Some(addr) => addr as *mut u8,
            None => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: `ptr` came from `alloc` with this layout.
        unsafe { self.free_bytes(ptr as usize, layout.size()) };
    }
}

// ── Global instance and C-style surface ─────────────────────────────────

#[cfg_attr(target_os = "none", global_allocator)]
static HEAP: KernelHeap = KernelHeap::new();

/// Initializes the global kernel heap.
///
/// # Safety
///
/// Same contract as [`KernelHeap::init`].
pub unsafe fn init(start: usize, size: usize) {
    // SAFETY: Forwarded caller contract.
    unsafe { HEAP.init(start, size) };
    sys7_core::kinfo!("heap: {} KiB at {:#x}", size / 1024, start);
}

/// Registers the grow callback on the global heap.
pub fn register_grow_fn(f: GrowFn) {
    HEAP.register_grow_fn(f);
}

/// Bytes currently allocated from the global heap.
#[must_use]
pub fn used_bytes() -> usize {
    HEAP.used_bytes()
}

/// Bytes under global heap management.
#[must_use]
pub fn managed_bytes() -> usize {
    HEAP.managed_bytes()
}

/// Allocates `size` bytes, returning a page-aligned pointer or null.
///
/// The run length is recorded in a header page in front of the payload so
/// [`kfree`] and [`krealloc`] can recover it from the pointer alone.
#[must_use]
pub fn kmalloc(size: usize) -> *mut u8 {
    kmalloc_in(&HEAP, size)
}

/// Frees a pointer returned by [`kmalloc`] or [`krealloc`]. Null is a no-op.
pub fn kfree(ptr: *mut u8) {
    kfree_in(&HEAP, ptr);
}

/// Resizes a [`kmalloc`] allocation, preserving `min(old, new)` bytes.
///
/// Returns the pointer unchanged when the existing run already covers
/// `new_size`; otherwise allocates, copies, and frees the old run.
#[must_use]
pub fn krealloc(ptr: *mut u8, new_size: usize) -> *mut u8 {
    krealloc_in(&HEAP, ptr, new_size)
}

fn kmalloc_in(heap: &KernelHeap, size: usize) -> *mut u8 {
    let total = page_align(size.max(1)) + PAGE_SIZE;
    let Some(base) = heap.alloc_bytes(total) else {
        return ptr::null_mut();
    };
    let header = base as *mut AllocHeader;
    // SAFETY: `base` heads a fresh run of `total` writable bytes.
    unsafe { (*header).size = total };
    (base + PAGE_SIZE) as *mut u8
}

fn kfree_in(heap: &KernelHeap, ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let base = ptr as usize - PAGE_SIZE;
    // SAFETY: `ptr` came from kmalloc, so a header page precedes it.
    let total = unsafe { (*(base as *const AllocHeader)).size };
    // SAFETY: Returning the exact run kmalloc took.
    unsafe { heap.free_bytes(base, total) };
}

fn krealloc_in(heap: &KernelHeap, ptr: *mut u8, new_size: usize) -> *mut u8 {
    if ptr.is_null() {
        return kmalloc_in(heap, new_size);
    }

    let base = ptr as usize - PAGE_SIZE;
    // SAFETY: `ptr` came from kmalloc, so a header page precedes it.
    let total = unsafe { (*(base as *const AllocHeader)).size };
    let capacity = total - PAGE_SIZE;

    if capacity >= new_size {
        return ptr;
    }

    let new_ptr = kmalloc_in(heap, new_size);
    if new_ptr.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: Both runs are live and at least `capacity.min(new_size)` long.
    unsafe {
        ptr::copy_nonoverlapping(ptr, new_ptr, capacity.min(new_size));
    }
    kfree_in(heap, ptr);
    new_ptr
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_test_heap<F: FnOnce(&KernelHeap)>(pages: usize, f: F) {
        let buf = vec![0u8; (pages + 1) * PAGE_SIZE];
        let start = page_align(buf.as_ptr() as usize);
        let heap = KernelHeap::new();
        unsafe { heap.init(start, pages * PAGE_SIZE) };
        f(&heap);
        drop(buf);
    }

    #[test]
    fn alloc_is_page_aligned() {
        with_test_heap(8, |heap| {
            let p = heap.alloc_bytes(100).expect("alloc");
            assert_eq!(p % PAGE_SIZE, 0);
        });
    }

    #[test]
    fn allocations_do_not_overlap() {
        with_test_heap(16, |heap| {
            let a = heap.alloc_bytes(PAGE_SIZE).unwrap();
            let b = heap.alloc_bytes(PAGE_SIZE).unwrap();
            let c = heap.alloc_bytes(2 * PAGE_SIZE).unwrap();
            let runs = [(a, PAGE_SIZE), (b, PAGE_SIZE), (c, 2 * PAGE_SIZE)];
            for (i, &(s1, l1)) in runs.iter().enumerate() {
                for &(s2, l2) in &runs[i + 1..] {
                    assert!(s1 + l1 <= s2 || s2 + l2 <= s1, "runs overlap");
                }
            }
        });
    }

    #[test]
    fn free_then_alloc_stays_inside_heap() {
        with_test_heap(8, |heap| {
            let p = heap.alloc_bytes(PAGE_SIZE).unwrap();
            unsafe { heap.free_bytes(p, PAGE_SIZE) };
            let q = heap.alloc_bytes(PAGE_SIZE).unwrap();
            // May or may not be the same address, but must be managed.
            assert!(heap.managed_bytes() >= PAGE_SIZE);
            assert!(q % PAGE_SIZE == 0);
        });
    }

    #[test]
    fn exhaustion_returns_none() {
        with_test_heap(4, |heap| {
            assert!(heap.alloc_bytes(4 * PAGE_SIZE).is_some());
            assert!(heap.alloc_bytes(PAGE_SIZE).is_none());
        });
    }

    #[test]
    fn coalescing_reassembles_full_region() {
        with_test_heap(8, |heap| {
            let a = heap.alloc_bytes(2 * PAGE_SIZE).unwrap();
            let b = heap.alloc_bytes(2 * PAGE_SIZE).unwrap();
            let c = heap.alloc_bytes(4 * PAGE_SIZE).unwrap();
            unsafe {
                heap.free_bytes(b, 2 * PAGE_SIZE);
                heap.free_bytes(a, 2 * PAGE_SIZE);
                heap.free_bytes(c, 4 * PAGE_SIZE);
            }
            // All eight pages must be a single run again.
            assert!(heap.alloc_bytes(8 * PAGE_SIZE).is_some());
        });
    }

    #[test]
    fn used_bytes_tracks_allocations() {
        with_test_heap(8, |heap| {
            assert_eq!(heap.used_bytes(), 0);
            let p = heap.alloc_bytes(3 * PAGE_SIZE).unwrap();
            assert_eq!(heap.used_bytes(), 3 * PAGE_SIZE);
            unsafe { heap.free_bytes(p, 3 * PAGE_SIZE) };
            assert_eq!(heap.used_bytes(), 0);
        });
    }

    #[test]
    fn grow_callback_supplies_pages() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static GROW_BASE: AtomicUsize = AtomicUsize::new(0);

        fn grow(min: usize) -> Option<(usize, usize)> {
            let base = GROW_BASE.load(Ordering::SeqCst);
            if base == 0 {
                return None;
            }
            GROW_BASE.store(0, Ordering::SeqCst);
            Some((base, page_align(min)))
        }

        let extra = vec![0u8; 3 * PAGE_SIZE];
        GROW_BASE.store(page_align(extra.as_ptr() as usize), Ordering::SeqCst);

        with_test_heap(1, |heap| {
            heap.register_grow_fn(grow);
            let a = heap.alloc_bytes(PAGE_SIZE).unwrap();
            // Heap exhausted; this one comes from the grow callback.
            let b = heap.alloc_bytes(PAGE_SIZE).unwrap();
            assert_ne!(a, b);
        });
        drop(extra);
    }

    #[test]
    fn kmalloc_payload_is_page_aligned() {
        with_test_heap(8, |heap| {
            let p = kmalloc_in(heap, 100);
            assert!(!p.is_null());
            assert_eq!(p as usize % PAGE_SIZE, 0);
            kfree_in(heap, p);
        });
    }

    #[test]
    fn krealloc_preserves_contents() {
        with_test_heap(16, |heap| {
            let p = kmalloc_in(heap, 64);
            assert!(!p.is_null());
            unsafe {
                for i in 0..64 {
                    *p.add(i) = i as u8;
                }
            }
            let q = krealloc_in(heap, p, 3 * PAGE_SIZE);
            assert!(!q.is_null());
            unsafe {
                for i in 0..64 {
                    assert_eq!(*q.add(i), i as u8);
                }
            }
            kfree_in(heap, q);
        });
    }

    #[test]
    fn krealloc_in_place_when_it_fits() {
        with_test_heap(8, |heap| {
            let p = kmalloc_in(heap, 100);
            // Rounded to one page; anything under that fits in place.
            let q = krealloc_in(heap, p, PAGE_SIZE);
            assert_eq!(p, q);
            kfree_in(heap, q);
        });
    }

    #[test]
    fn kfree_null_is_noop() {
        with_test_heap(4, |heap| {
            kfree_in(heap, ptr::null_mut());
        });
    }
}
